use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use mongodb::bson::{doc, Bson, Document};
use rand::Rng;
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Formatter, Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_MATCH_ID_LENGTH: usize = 64;

/// Prefix of generated match IDs.
const GENERATED_PREFIX: &str = "ZIP";
/// Number of random digits in a generated match ID.
const GENERATED_DIGITS: usize = 6;

/// An opaque, stable match identifier.
///
/// Either chosen by the admin when creating a match or generated. It appears in session
/// links, so it is restricted to URL-safe characters.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchIdError {
    #[error("Match ID must not be empty")]
    Empty,
    #[error("Match ID must be at most {MAX_MATCH_ID_LENGTH} characters")]
    TooLong,
    #[error("Match ID may only contain letters, digits, '-' and '_'")]
    IllegalCharacter,
}

impl MatchId {
    /// Generate a fresh ID of the form `ZIP123456`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let digits: String = (0..GENERATED_DIGITS)
            .map(|_| char::from(b'0' + rng.gen_range(0..10)))
            .collect();
        Self(format!("{GENERATED_PREFIX}{digits}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filter document matching the match with this ID.
    pub fn as_doc(&self) -> Document {
        doc! { "_id": &self.0 }
    }
}

impl Deref for MatchId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MatchId {
    type Err = MatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(MatchIdError::Empty);
        }
        if s.len() > MAX_MATCH_ID_LENGTH {
            return Err(MatchIdError::TooLong);
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(MatchIdError::IllegalCharacter);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for MatchId {
    type Error = MatchIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MatchId> for String {
    fn from(id: MatchId) -> Self {
        id.0
    }
}

impl From<MatchId> for Bson {
    fn from(id: MatchId) -> Self {
        Bson::String(id.0)
    }
}

impl<'a> FromParam<'a> for MatchId {
    type Error = MatchIdError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

impl UriDisplay<Path> for MatchId {
    fn fmt(&self, f: &mut Formatter<'_, Path>) -> std::fmt::Result {
        f.write_value(&self.0)
    }
}

impl_from_uri_param_identity!([Path] MatchId);
