use std::ops::{Deref, DerefMut};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    api::admin::AdminCredentials,
    mongodb::{Coll, Id},
};

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
}

impl AdminCore {
    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // A malformed stored hash can never match anything.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

impl DerefMut for Admin {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.admin
    }
}

/// Create the bootstrap admin from the config if no admin exists yet.
pub async fn ensure_admin_exists(admins: &Coll<NewAdmin>, config: &Config) -> Result<(), Error> {
    let count = admins.count_documents(None, None).await?;
    if count > 0 {
        debug!("{count} admin(s) present, skipping bootstrap");
        return Ok(());
    }

    let credentials = AdminCredentials {
        username: config.default_admin_username().to_string(),
        password: config.default_admin_password().to_string(),
    };
    match NewAdmin::try_from(credentials) {
        Ok(admin) => {
            warn!(
                "No admins found, creating bootstrap admin \"{}\"; change its password!",
                admin.username
            );
            admins.insert_one(admin, None).await?;
        }
        Err(Error::Validation(reason)) => {
            warn!("No admins found, and the configured bootstrap admin is invalid: {reason}")
        }
        Err(e) => return Err(e),
    }
    Ok(())
}
