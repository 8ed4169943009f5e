use serde::{Deserialize, Serialize};

use crate::sampler::Sampled;

/// A single catalogue question. Retired questions are kept but flagged inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: u32,
    pub category_id: u32,
    pub text: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Sampled for Question {
    fn sample_id(&self) -> u32 {
        self.id
    }
}
