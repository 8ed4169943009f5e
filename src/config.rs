use std::path::{Path, PathBuf};

use chrono::Duration;
use log::{error, info};
use mongodb::{Client as MongoClient, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    catalogue::seed_catalogue,
    error::Error,
    locks::{ReportLocks, SubmissionLocks},
    model::{
        db::admin::ensure_admin_exists,
        mongodb::{ensure_indexes_exist, Coll},
    },
    report::PdfPrinter,
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    report_dir: PathBuf,
    chrome_executable: Option<PathBuf>,
    catalogue_path: Option<PathBuf>,
    default_admin_username: String,
    // secrets
    jwt_secret: String,
    default_admin_password: String,
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Directory that generated report artifacts are written to.
    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Browser binary used to print reports. If unset, one is searched for.
    pub fn chrome_executable(&self) -> Option<&Path> {
        self.chrome_executable.as_deref()
    }

    /// Question catalogue loaded into an empty database at start-up.
    pub fn catalogue_path(&self) -> Option<&Path> {
        self.catalogue_path.as_deref()
    }

    /// Username of the admin created when none exists.
    pub fn default_admin_username(&self) -> &str {
        &self.default_admin_username
    }

    /// Password of the admin created when none exists.
    pub fn default_admin_password(&self) -> &str {
        &self.default_admin_password
    }

    /// Secret key used to encrypt JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
///
/// Must be attached after [`ConfigFairing`].
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        let app_config = match rocket.state::<Config>() {
            Some(config) => config,
            None => {
                error!("Database set-up needs the application config to be loaded first");
                return Err(rocket);
            }
        };
        if let Err(e) = prepare_database(&db, app_config).await {
            error!("Failed to prepare database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Ensure indexes, the bootstrap admin and the question catalogue exist.
///
/// This operation is idempotent.
pub async fn prepare_database(db: &Database, config: &Config) -> Result<(), Error> {
    ensure_indexes_exist(db).await?;
    ensure_admin_exists(&Coll::from_db(db), config).await?;
    if let Some(path) = config.catalogue_path() {
        seed_catalogue(db, path).await?;
    }
    Ok(())
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "icebreaker".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// A fairing that places the report printer and the per-key locks into managed state.
///
/// Must be attached after [`ConfigFairing`].
pub struct ReportFairing;

#[rocket::async_trait]
impl Fairing for ReportFairing {
    fn info(&self) -> Info {
        Info {
            name: "Reports",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let printer = match rocket.state::<Config>() {
            Some(config) => PdfPrinter::new(config.chrome_executable().map(Path::to_path_buf)),
            None => {
                error!("Report set-up needs the application config to be loaded first");
                return Err(rocket);
            }
        };
        info!("Report printer ready");

        Ok(rocket
            .manage(printer)
            .manage(SubmissionLocks::default())
            .manage(ReportLocks::default()))
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use rocket::figment::Figment;

    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self::example_with_secret("test secret")
        }

        pub fn example_with_secret(secret: &str) -> Self {
            Figment::new()
                .merge(("auth_ttl", 3600))
                .merge(("report_dir", "target/test-reports"))
                .merge(("default_admin_username", "admin"))
                .merge(("default_admin_password", "admin12345"))
                .merge(("jwt_secret", secret))
                .extract()
                .unwrap()
        }
    }
}
