use serde::{Deserialize, Serialize};

/// Where a match's report can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReference {
    pub report_url: String,
    /// False if the report already existed and was not rebuilt.
    pub generated: bool,
}

/// Response to discarding a match's report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReset {
    pub previous_report_url: Option<String>,
}
