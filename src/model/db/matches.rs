use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::common::{match_id::MatchId, phone::Phone, status::MatchStatus};

/// A teacher/student pairing, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    #[serde(rename = "_id")]
    pub id: MatchId,
    pub teacher_name: String,
    pub teacher_phone: Phone,
    pub student_name: String,
    pub student_phone: Phone,
    pub status: MatchStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    /// Reference to the generated report, once there is one.
    pub report_url: Option<String>,
}
