use rocket::{fs::NamedFile, Route, State};

use crate::{
    config::Config,
    error::{Error, Result},
    model::common::match_id::MatchId,
    report,
};

pub fn routes() -> Vec<Route> {
    routes![get_report]
}

/// Serve a generated report artifact.
#[get("/reports/<file>")]
async fn get_report(file: &str, config: &State<Config>) -> Result<NamedFile> {
    let match_id: MatchId = file
        .strip_suffix(".pdf")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::NotFound(format!("Report {file}")))?;
    NamedFile::open(report::report_file(config, &match_id))
        .await
        .map_err(|_| Error::NotFound(format!("Report for match {match_id}")))
}
