#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, ReportFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod catalogue;
pub mod config;
pub mod error;
pub mod locks;
pub mod logging;
pub mod model;
pub mod report;
pub mod sampler;

/// Assemble the server: routes plus the fairings that load config, connect to the
/// database and prepare report generation.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(ReportFairing)
}

/// Environment variable naming the MongoDB deployment used by tests.
#[cfg(test)]
const TEST_DB_URI_VAR: &str = "ICEBREAKER_TEST_DB_URI";

#[cfg(test)]
const DEFAULT_TEST_DB_URI: &str = "mongodb://localhost:27017/?serverSelectionTimeoutMS=2000";

/// Connect to the test MongoDB deployment.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let uri = std::env::var(TEST_DB_URI_VAR).unwrap_or_else(|_| DEFAULT_TEST_DB_URI.to_string());
    connect_replica_set(&uri).await
}

/// Submissions use transactions, so this panics unless a replica set is reachable at `uri`.
#[cfg(test)]
async fn connect_replica_set(uri: &str) -> mongodb::Client {
    let client = mongodb::Client::with_uri_str(uri)
        .await
        .unwrap_or_else(|e| panic!("Invalid MongoDB URI `{uri}`: {e}"));
    let hello = client
        .database("admin")
        .run_command(mongodb::bson::doc! {"hello": 1}, None)
        .await
        .unwrap_or_else(|e| panic!("MongoDB unreachable at `{uri}` (set {TEST_DB_URI_VAR}): {e}"));
    assert!(
        hello.contains_key("setName"),
        "MongoDB at `{uri}` is not a replica set; transactions need one"
    );
    client
}

/// A fresh database name for one test.
#[cfg(test)]
pub(crate) fn database() -> String {
    config::get_database_name()
}

/// Where one test's reports are written, so tests do not see each other's files.
#[cfg(test)]
pub(crate) fn test_report_dir(db_name: &str) -> String {
    format!("target/test-reports/{db_name}")
}

/// Build a server on the given test database, with the bootstrap admin and the example
/// catalogue in place.
#[cfg(test)]
pub(crate) async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    use crate::catalogue::{insert_catalogue, Catalogue};
    use crate::config::Config;
    use crate::model::{
        db::admin::ensure_admin_exists,
        mongodb::{ensure_indexes_exist, Coll},
    };

    let figment = rocket::Config::figment().merge(("report_dir", test_report_dir(db_name)));
    let rocket = rocket::custom(figment);
    let config: Config = rocket.figment().extract().unwrap();

    let db = client.database(db_name);
    ensure_indexes_exist(&db).await.unwrap();
    ensure_admin_exists(&Coll::from_db(&db), &config)
        .await
        .unwrap();
    insert_catalogue(&db, Catalogue::example()).await.unwrap();

    rocket
        .mount("/", api::routes())
        .manage(config)
        .manage(client)
        .manage(db)
        .attach(ReportFairing)
}
