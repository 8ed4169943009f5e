use argon2::Error as Argon2Error;
use chromiumoxide::error::CdpError;
use jsonwebtoken::errors::Error as JwtError;
use log::error;
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::{serde_json::json, Json},
    Request,
};
use thiserror::Error;

use crate::model::common::role::InvalidRole;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Browser failure: {0}")]
    Browser(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidRole(#[from] InvalidRole),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} with ID {id}"))
    }

    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::InvalidRole(_) | Self::Validation(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::PreconditionFailed(_) | Self::Conflict(_) => Status::Conflict,
            Self::Db(_) | Self::Jwt(_) | Self::Argon2(_) | Self::Io(_) | Self::Browser(_) => {
                Status::InternalServerError
            }
        }
    }
}

impl From<CdpError> for Error {
    fn from(err: CdpError) -> Self {
        Self::Browser(err.to_string())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = if status == Status::InternalServerError {
            error!("{self}");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).respond_to(req)
    }
}
