use serde::{Deserialize, Serialize};

use crate::model::common::role::Role;

/// A named group of questions, belonging to exactly one role's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "_id")]
    pub id: u32,
    pub role: Role,
    pub name: String,
}
