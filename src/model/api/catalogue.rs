use serde::{Deserialize, Serialize};

use crate::model::{
    common::role::Role,
    db::{category::Category, question::Question},
};

/// A catalogue question, as listed to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionListing {
    pub id: u32,
    pub text: String,
    pub is_active: bool,
}

/// A category and all of its questions, retired ones included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryListing {
    pub id: u32,
    pub role: Role,
    pub name: String,
    pub questions: Vec<QuestionListing>,
}

impl CategoryListing {
    /// Group questions under their categories, keeping the input order of both.
    pub fn group(categories: Vec<Category>, questions: &[Question]) -> Vec<Self> {
        categories
            .into_iter()
            .map(|c| Self {
                questions: questions
                    .iter()
                    .filter(|q| q.category_id == c.id)
                    .map(|q| QuestionListing {
                        id: q.id,
                        text: q.text.clone(),
                        is_active: q.is_active,
                    })
                    .collect(),
                id: c.id,
                role: c.role,
                name: c.name,
            })
            .collect()
    }
}
