use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use rocket::tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::common::{match_id::MatchId, role::Role};

/// Map from keys to the lock guarding that key.
type LockMap<K> = HashMap<K, Arc<Mutex<()>>>;

/// A set of in-process async locks, one per key, created on demand.
pub struct KeyedLocks<K> {
    locks: Arc<Mutex<LockMap<K>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Default::default(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Wait until no one else holds the lock for `key`, then take it.
    /// The lock is released when the guard is dropped.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Forget locks nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Serialises answer submissions per side of a match.
pub type SubmissionLocks = KeyedLocks<(MatchId, Role)>;

/// Serialises report generation per match.
pub type ReportLocks = KeyedLocks<MatchId>;
