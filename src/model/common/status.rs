use std::fmt::Display;

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use super::role::Role;

/// States in the match lifecycle.
///
/// A match only ever moves forward: resubmissions never undo a completed side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Nobody has submitted yet.
    Waiting,
    /// Only the teacher has submitted.
    TeacherCompleted,
    /// Only the student has submitted.
    StudentCompleted,
    /// Both sides have submitted; a report may be generated.
    BothCompleted,
}

impl MatchStatus {
    /// The status after `role` submits a complete answer set.
    pub fn after_submission(self, role: Role) -> Self {
        match (self, role) {
            (Self::Waiting, Role::Teacher) => Self::TeacherCompleted,
            (Self::Waiting, Role::Student) => Self::StudentCompleted,
            (Self::TeacherCompleted, Role::Student) => Self::BothCompleted,
            (Self::StudentCompleted, Role::Teacher) => Self::BothCompleted,
            (unchanged, _) => unchanged,
        }
    }

    /// Has `role` submitted at least once?
    pub fn has_submitted(self, role: Role) -> bool {
        match (self, role) {
            (Self::BothCompleted, _) => true,
            (Self::TeacherCompleted, Role::Teacher) => true,
            (Self::StudentCompleted, Role::Student) => true,
            _ => false,
        }
    }

    /// Have both sides submitted?
    pub fn is_complete(self) -> bool {
        self == Self::BothCompleted
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::TeacherCompleted => "teacher_completed",
            Self::StudentCompleted => "student_completed",
            Self::BothCompleted => "both_completed",
        }
    }
}

impl Default for MatchStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MatchStatus> for Bson {
    fn from(status: MatchStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
