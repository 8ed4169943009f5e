use std::fmt::Display;
use std::str::FromStr;

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two sides of a match. Each side answers its own pool of questions.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    /// Both roles, in report order.
    pub const ALL: [Role; 2] = [Role::Teacher, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role string that is neither `teacher` nor `student`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid role: {0:?}")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

impl From<Role> for Bson {
    fn from(role: Role) -> Self {
        to_bson(&role).expect("Serialisation is infallible")
    }
}
