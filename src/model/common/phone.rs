use std::{fmt::Display, ops::Deref, str::FromStr};

use phonenumber::{country, Mode, PhoneNumber};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Region assumed for numbers written without an international prefix, e.g. `010-1234-5678`.
pub const DEFAULT_REGION: country::Id = country::Id::KR;

/// A participant's contact number, normalised to E.164.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phone {
    inner: PhoneNumber,
}

#[derive(Debug, Error)]
pub enum PhoneError {
    #[error(transparent)]
    Parse(#[from] phonenumber::ParseError),
    #[error("Not a valid phone number: {0}")]
    Invalid(String),
}

impl Deref for Phone {
    type Target = PhoneNumber;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Display for Phone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.format().mode(Mode::E164))
    }
}

impl FromStr for Phone {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = phonenumber::parse(Some(DEFAULT_REGION), s.trim())?;
        if !phonenumber::is_valid(&inner) {
            return Err(PhoneError::Invalid(s.to_string()));
        }
        Ok(Self { inner })
    }
}

impl TryFrom<String> for Phone {
    type Error = PhoneError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Phone> for String {
    fn from(phone: Phone) -> Self {
        phone.to_string()
    }
}
