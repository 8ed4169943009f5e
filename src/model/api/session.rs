use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalogue::SelectedCategory;
use crate::error::Error;
use crate::model::{
    api::matches::MatchSummary,
    common::{role::Role, status::MatchStatus},
    db::answer::Answer,
};

/// Maximum length of a single answer, in characters.
pub const MAX_ANSWER_LENGTH: usize = 2000;

/// A question as shown to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuestion {
    pub id: u32,
    pub category_id: u32,
    pub category_name: String,
    pub text: String,
}

impl SessionQuestion {
    /// Flatten a selection into questions, keeping selection order.
    pub fn from_selection(selection: &[SelectedCategory]) -> Vec<Self> {
        selection
            .iter()
            .flat_map(|s| {
                s.questions.iter().map(|q| Self {
                    id: q.id,
                    category_id: s.category.id,
                    category_name: s.category.name.clone(),
                    text: q.text.clone(),
                })
            })
            .collect()
    }
}

/// An answer already on record, for resuming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingAnswer {
    pub question_id: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Answer> for ExistingAnswer {
    fn from(answer: Answer) -> Self {
        Self {
            question_id: answer.question_id,
            content: answer.answer.content,
            created_at: answer.answer.created_at,
        }
    }
}

/// Everything a participant needs to fill in their side of a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSet {
    #[serde(rename = "match")]
    pub summary: MatchSummary,
    pub role: Role,
    pub questions: Vec<SessionQuestion>,
    pub existing_answers: Vec<ExistingAnswer>,
}

/// One answer in a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    #[serde(default)]
    pub question_id: Option<u32>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A participant's full answer set, replacing any previous one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub answers: Vec<SubmittedAnswer>,
}

impl Submission {
    /// Check the submission against the questions currently selected for the
    /// participant, returning `(question_id, content)` pairs ready to store.
    pub fn validate(self, selected: &[u32]) -> Result<Vec<(u32, String)>, Error> {
        if self.answers.is_empty() {
            return Err(Error::Validation("No answers submitted".to_string()));
        }

        let allowed: HashSet<u32> = selected.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut valid = Vec::with_capacity(self.answers.len());
        for (i, answer) in self.answers.into_iter().enumerate() {
            let question_id = answer
                .question_id
                .ok_or_else(|| Error::Validation(format!("Answer {i} has no questionId")))?;
            let content = answer
                .content
                .ok_or_else(|| Error::Validation(format!("Answer {i} has no content")))?;
            if !seen.insert(question_id) {
                return Err(Error::Validation(format!(
                    "Question {question_id} answered more than once"
                )));
            }
            if !allowed.contains(&question_id) {
                return Err(Error::Validation(format!(
                    "Question {question_id} was not asked in this session"
                )));
            }
            if content.chars().count() > MAX_ANSWER_LENGTH {
                return Err(Error::Validation(format!(
                    "Answer to question {question_id} exceeds {MAX_ANSWER_LENGTH} characters"
                )));
            }
            valid.push((question_id, content));
        }
        Ok(valid)
    }
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub new_status: MatchStatus,
    pub answer_count: usize,
}
