use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{
    common::{match_id::MatchId, phone::Phone, role::Role, status::MatchStatus},
    db::matches::Match,
};

/// Maximum length of a participant's name.
pub const MAX_NAME_LENGTH: usize = 100;

/// An admin's request to pair a teacher and a student.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSpec {
    /// Leave empty to have an ID generated.
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub teacher_name: String,
    #[serde(default)]
    pub teacher_phone: String,
    #[serde(default)]
    pub student_name: String,
    #[serde(default)]
    pub student_phone: String,
}

impl MatchSpec {
    /// Whether the match ID is left for the server to generate.
    pub fn generates_id(&self) -> bool {
        self.match_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty())
    }

    /// Validate the request and turn it into a fresh match in the `waiting` state.
    pub fn into_match(self) -> Result<Match, Error> {
        let id = match self.match_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id
                .parse()
                .map_err(|e| Error::Validation(format!("matchId: {e}")))?,
            _ => MatchId::generate(),
        };
        Ok(Match {
            id,
            teacher_name: required_name("teacherName", &self.teacher_name)?,
            teacher_phone: required_phone("teacherPhone", &self.teacher_phone)?,
            student_name: required_name("studentName", &self.student_name)?,
            student_phone: required_phone("studentPhone", &self.student_phone)?,
            status: MatchStatus::Waiting,
            created_at: Utc::now(),
            report_url: None,
        })
    }
}

fn required_name(field: &str, value: &str) -> Result<String, Error> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(value.to_string())
}

fn required_phone(field: &str, value: &str) -> Result<Phone, Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    value
        .parse()
        .map_err(|e| Error::Validation(format!("{field}: {e}")))
}

/// The full view of a match, for admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDescription {
    pub id: MatchId,
    pub teacher_name: String,
    pub teacher_phone: String,
    pub student_name: String,
    pub student_phone: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub report_url: Option<String>,
}

impl From<Match> for MatchDescription {
    fn from(m: Match) -> Self {
        Self {
            id: m.id,
            teacher_name: m.teacher_name,
            teacher_phone: m.teacher_phone.to_string(),
            student_name: m.student_name,
            student_phone: m.student_phone.to_string(),
            status: m.status,
            created_at: m.created_at,
            report_url: m.report_url,
        }
    }
}

/// The public view of a match, as seen through a session link. Contact details are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub id: MatchId,
    pub teacher_name: String,
    pub student_name: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub report_url: Option<String>,
}

impl From<Match> for MatchSummary {
    fn from(m: Match) -> Self {
        Self {
            id: m.id,
            teacher_name: m.teacher_name,
            student_name: m.student_name,
            status: m.status,
            created_at: m.created_at,
            report_url: m.report_url,
        }
    }
}

/// Response to creating a match: the match plus the two session links to hand out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMatch {
    #[serde(rename = "match")]
    pub description: MatchDescription,
    pub teacher_path: String,
    pub student_path: String,
}

impl From<Match> for CreatedMatch {
    fn from(m: Match) -> Self {
        Self {
            teacher_path: session_path(&m.id, Role::Teacher),
            student_path: session_path(&m.id, Role::Student),
            description: m.into(),
        }
    }
}

/// The link path at which `role` answers their questions for a match.
pub fn session_path(match_id: &MatchId, role: Role) -> String {
    format!("/session/{match_id}/{role}")
}

/// One answer as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerDescription {
    pub question_id: u32,
    pub question_text: String,
    pub category_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Everything both sides have answered for a match, for admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAnswers {
    #[serde(rename = "match")]
    pub description: MatchDescription,
    pub teacher_answers: Vec<AnswerDescription>,
    pub student_answers: Vec<AnswerDescription>,
    pub total_answers: usize,
}
