//! The question catalogue: categories and questions for both roles, and the per-match
//! selection drawn from it.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info};
use mongodb::{bson::doc, options::FindOptions, Database};
use rocket::{
    futures::TryStreamExt,
    request::{FromRequest, Outcome, Request},
    serde::json::serde_json,
    State,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::role::Role,
    db::{category::Category, question::Question},
    mongodb::Coll,
};
use crate::sampler;

/// A catalogue file, as edited by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalogue {
    pub categories: Vec<CatalogueCategory>,
    pub questions: Vec<CatalogueQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueCategory {
    pub id: u32,
    pub role: Role,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueQuestion {
    pub id: u32,
    pub category_id: u32,
    pub text: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Catalogue {
    /// Parse and check a catalogue.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalogue: Self = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("Malformed catalogue: {e}")))?;
        catalogue.check()?;
        Ok(catalogue)
    }

    /// Read, parse and check a catalogue file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject duplicate IDs and questions in unknown categories.
    fn check(&self) -> Result<()> {
        let mut category_ids = HashSet::new();
        for category in &self.categories {
            if !category_ids.insert(category.id) {
                return Err(Error::Validation(format!(
                    "Duplicate category ID {}",
                    category.id
                )));
            }
        }
        let mut question_ids = HashSet::new();
        for question in &self.questions {
            if !question_ids.insert(question.id) {
                return Err(Error::Validation(format!(
                    "Duplicate question ID {}",
                    question.id
                )));
            }
            if !category_ids.contains(&question.category_id) {
                return Err(Error::Validation(format!(
                    "Question {} refers to unknown category {}",
                    question.id, question.category_id
                )));
            }
        }
        Ok(())
    }

    /// Split into database records.
    pub fn into_records(self) -> (Vec<Category>, Vec<Question>) {
        let categories = self
            .categories
            .into_iter()
            .map(|c| Category {
                id: c.id,
                role: c.role,
                name: c.name,
            })
            .collect();
        let questions = self
            .questions
            .into_iter()
            .map(|q| Question {
                id: q.id,
                category_id: q.category_id,
                text: q.text,
                is_active: q.is_active,
            })
            .collect();
        (categories, questions)
    }
}

/// Load the catalogue at `path` into the database, unless one is already there.
pub async fn seed_catalogue(db: &Database, path: &Path) -> Result<()> {
    let questions = Coll::<Question>::from_db(db)
        .count_documents(None, None)
        .await?;
    let categories = Coll::<Category>::from_db(db)
        .count_documents(None, None)
        .await?;
    if questions > 0 || categories > 0 {
        debug!("Catalogue present ({categories} categories, {questions} questions), not seeding");
        return Ok(());
    }

    info!("Seeding catalogue from {}", path.display());
    insert_catalogue(db, Catalogue::from_file(path)?).await
}

/// Insert every category and question of `catalogue`.
pub async fn insert_catalogue(db: &Database, catalogue: Catalogue) -> Result<()> {
    let (categories, questions) = catalogue.into_records();
    info!(
        "Inserting {} categories and {} questions",
        categories.len(),
        questions.len()
    );
    if !categories.is_empty() {
        Coll::<Category>::from_db(db)
            .insert_many(categories, None)
            .await?;
    }
    if !questions.is_empty() {
        Coll::<Question>::from_db(db)
            .insert_many(questions, None)
            .await?;
    }
    Ok(())
}

/// A category together with the questions drawn from it for one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCategory {
    pub category: Category,
    pub questions: Vec<Question>,
}

/// Draw the questions `role` answers for a match.
///
/// Categories of the role are visited in ascending ID order; from each, the active
/// questions are sampled. Questions of other roles' categories are ignored.
pub fn select(
    categories: &[Category],
    questions: &[Question],
    match_id: &str,
    role: Role,
) -> Vec<SelectedCategory> {
    let mut own: Vec<&Category> = categories.iter().filter(|c| c.role == role).collect();
    own.sort_by_key(|c| c.id);
    own.into_iter()
        .map(|category| {
            let pool = questions
                .iter()
                .filter(|q| q.category_id == category.id && q.is_active)
                .cloned()
                .collect();
            SelectedCategory {
                category: category.clone(),
                questions: sampler::sample(pool, match_id, category.id, role),
            }
        })
        .collect()
}

/// IDs of every selected question, in selection order.
pub fn selected_ids(selection: &[SelectedCategory]) -> Vec<u32> {
    selection
        .iter()
        .flat_map(|s| s.questions.iter().map(|q| q.id))
        .collect()
}

/// Read access to the catalogue stored in the database.
pub struct QuestionStore {
    categories: Coll<Category>,
    questions: Coll<Question>,
}

impl QuestionStore {
    pub fn from_db(db: &Database) -> Self {
        Self {
            categories: Coll::from_db(db),
            questions: Coll::from_db(db),
        }
    }

    /// Every category, by ascending ID.
    pub async fn categories(&self) -> Result<Vec<Category>> {
        let sort = FindOptions::builder().sort(doc! {"_id": 1}).build();
        Ok(self.categories.find(None, sort).await?.try_collect().await?)
    }

    /// Every question, retired ones included, by ascending ID.
    pub async fn questions(&self) -> Result<Vec<Question>> {
        let sort = FindOptions::builder().sort(doc! {"_id": 1}).build();
        Ok(self.questions.find(None, sort).await?.try_collect().await?)
    }

    /// Recompute the selection `role` answers for a match.
    pub async fn selection_for(&self, match_id: &str, role: Role) -> Result<Vec<SelectedCategory>> {
        let sort = FindOptions::builder().sort(doc! {"_id": 1}).build();
        let categories: Vec<Category> = self
            .categories
            .find(doc! {"role": role}, sort)
            .await?
            .try_collect()
            .await?;
        let category_ids: Vec<u32> = categories.iter().map(|c| c.id).collect();
        let questions: Vec<Question> = self
            .questions
            .find(
                doc! {"category_id": {"$in": category_ids}, "is_active": true},
                None,
            )
            .await?
            .try_collect()
            .await?;
        Ok(select(&categories, &questions, match_id, role))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for QuestionStore {
    type Error = ();

    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        Outcome::Success(Self::from_db(db))
    }
}
