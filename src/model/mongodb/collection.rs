use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    admin::{Admin, NewAdmin},
    answer::{Answer, NewAnswer},
    category::Category,
    matches::Match,
    question::Question,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Admin collections
const ADMINS: &str = "admins";
impl MongoCollection for Admin {
    const NAME: &'static str = ADMINS;
}
impl MongoCollection for NewAdmin {
    const NAME: &'static str = ADMINS;
}

// Reference data collections
impl MongoCollection for Category {
    const NAME: &'static str = "categories";
}
impl MongoCollection for Question {
    const NAME: &'static str = "questions";
}

// Match collection
impl MongoCollection for Match {
    const NAME: &'static str = "matches";
}

// Answer collections
const ANSWERS: &str = "answers";
impl MongoCollection for Answer {
    const NAME: &'static str = ANSWERS;
}
impl MongoCollection for NewAnswer {
    const NAME: &'static str = ANSWERS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Admin collection.
    let admin_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    // Answer collection: one answer per question per side of a match.
    let answer_index = IndexModel::builder()
        .keys(doc! {"match_id": 1, "role": 1, "question_id": 1})
        .options(unique)
        .build();
    Coll::<Answer>::from_db(db)
        .create_index(answer_index, None)
        .await?;

    // Question collection, looked up by category.
    let question_index = IndexModel::builder()
        .keys(doc! {"category_id": 1})
        .build();
    Coll::<Question>::from_db(db)
        .create_index(question_index, None)
        .await?;

    // Match collection, listed newest first.
    let match_index = IndexModel::builder()
        .keys(doc! {"created_at": -1})
        .build();
    Coll::<Match>::from_db(db)
        .create_index(match_index, None)
        .await?;

    Ok(())
}
