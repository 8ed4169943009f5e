use std::fmt::Display;

use log::debug;
use mongodb::{
    error::{Error as DbError, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    ClientSession,
};
use rocket::futures::{future::BoxFuture, FutureExt};

/// How often a commit whose outcome is unknown is retried before the error is surfaced.
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// Commit the running transaction, retrying a bounded number of times while the outcome
/// is unknown.
pub async fn commit(session: &mut ClientSession) -> Result<(), DbError> {
    retry(
        session,
        MAX_COMMIT_ATTEMPTS,
        |e: &DbError| e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT),
        |session| session.commit_transaction().boxed(),
    )
    .await
}

/// Run `attempt` against `target` until it succeeds, fails with an error that is not
/// `retryable`, or has failed `max_attempts` times. The last error is returned.
async fn retry<S, T, E: Display>(
    target: &mut S,
    max_attempts: usize,
    retryable: impl Fn(&E) -> bool,
    mut attempt: impl for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, E>>,
) -> Result<T, E> {
    let mut attempts = 1;
    loop {
        match attempt(&mut *target).await {
            Err(e) if attempts < max_attempts && retryable(&e) => {
                debug!("Retrying after attempt {attempts} of {max_attempts}: {e}");
                attempts += 1;
            }
            result => return result,
        }
    }
}
