use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{match_id::MatchId, role::Role},
    mongodb::Id,
};

/// Core answer data: one side's free-text answer to one question of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCore {
    pub match_id: MatchId,
    pub role: Role,
    pub question_id: u32,
    pub content: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl AnswerCore {
    pub fn new(match_id: MatchId, role: Role, question_id: u32, content: String) -> Self {
        Self {
            match_id,
            role,
            question_id,
            content,
            created_at: Utc::now(),
        }
    }
}

/// An answer without an ID.
pub type NewAnswer = AnswerCore;

/// An answer from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub answer: AnswerCore,
}

impl Deref for Answer {
    type Target = AnswerCore;

    fn deref(&self) -> &Self::Target {
        &self.answer
    }
}

impl DerefMut for Answer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.answer
    }
}

/// Filter for every answer given by `role` in the given match.
pub fn answers_by(match_id: &MatchId, role: Role) -> Document {
    doc! {
        "match_id": match_id.as_str(),
        "role": role,
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Answer {
        pub fn example(role: Role, question_id: u32, content: &str) -> Self {
            Self {
                id: Id::new(),
                answer: AnswerCore::new(
                    MatchId::example(),
                    role,
                    question_id,
                    content.to_string(),
                ),
            }
        }
    }
}
