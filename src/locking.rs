//! Advisory locking against the record store's `locks` collection.
//!
//! Mirrors the record store's `data-<name>`/`options` collections: a single
//! collection shared by every database, with a unique index on `lock_id` so
//! a duplicate-key error is the mechanism that makes acquisition atomic. No
//! heartbeat or TTL - a crashed committer strands its lock until an operator
//! clears it - left as a documented limitation rather than guessed-at
//! semantics; a TTL index or heartbeat would be a natural extension.

use std::sync::Arc;

use bson::doc;
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::core::error::LockError;
use crate::system::metrics::EngineMetrics;

/// The document stored in the `locks` collection for a held lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockMetadata {
    /// the lock's identifier - for database-level locks, the database name
    pub lock_id: String,
    /// when the lock was acquired, milliseconds since the Unix epoch
    pub locked_at: i64,
    /// hostname of the process that acquired the lock
    pub locked_by: String,
    /// arbitrary caller-supplied metadata (e.g. `{"stage": "commit"}`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The narrow slice of the record store the locker needs: insert-if-absent
/// on a unique key, delete-by-key, and a point lookup.
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// Insert a lock document. Must fail with
    /// [`LockError::AlreadyLocked`] if `lock_id` is already present -
    /// this is where the record store's unique index does the real work.
    async fn insert_lock(&self, metadata: LockMetadata) -> Result<(), LockError>;

    /// Remove a lock document. A no-op if it wasn't held.
    async fn remove_lock(&self, lock_id: &str) -> Result<(), LockError>;

    /// Look up a lock's metadata, if it is currently held.
    async fn find_lock(&self, lock_id: &str) -> Result<Option<LockMetadata>, LockError>;
}

/// Shared handle type passed around the facade: cheap to clone, one per process.
pub type SharedLockStore = Arc<dyn LockStore>;

/// Manages named advisory locks on top of a [`LockStore`].
pub struct Locker {
    store: SharedLockStore,
    hostname: String,
}

impl Locker {
    /// Build a locker over the given lock collection handle. `hostname`
    /// identifies this process in lock metadata, the way `platform.node()`
    /// does in the collaborator this mirrors.
    pub fn new(store: SharedLockStore, hostname: impl Into<String>) -> Self {
        Locker {
            store,
            hostname: hostname.into(),
        }
    }

    /// Attempt to acquire `lock_id`. Returns `Ok(true)` if acquired,
    /// `Ok(false)` if it was already held. `data` is stored alongside the
    /// lock for diagnostic purposes (e.g. which stage is holding it).
    pub async fn acquire(
        &self,
        lock_id: &str,
        now_millis: i64,
        data: Option<serde_json::Value>,
    ) -> Result<bool, LockError> {
        let metadata = LockMetadata {
            lock_id: lock_id.to_string(),
            locked_at: now_millis,
            locked_by: self.hostname.clone(),
            data,
        };
        match self.store.insert_lock(metadata).await {
            Ok(()) => {
                EngineMetrics::global().lock.acquired.inc();
                EngineMetrics::global().lock.held.inc();
                Ok(true)
            }
            Err(LockError::AlreadyLocked(_)) => {
                EngineMetrics::global().lock.contended.inc();
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    /// Like [`Locker::acquire`], but returns [`LockError::AlreadyLocked`]
    /// instead of `Ok(false)` when the lock is already held.
    pub async fn acquire_or_raise(
        &self,
        lock_id: &str,
        now_millis: i64,
        data: Option<serde_json::Value>,
    ) -> Result<(), LockError> {
        if self.acquire(lock_id, now_millis, data).await? {
            Ok(())
        } else {
            Err(LockError::AlreadyLocked(lock_id.to_string()))
        }
    }

    /// Release `lock_id`. Does nothing if it wasn't held.
    pub async fn release(&self, lock_id: &str) -> Result<(), LockError> {
        self.store.remove_lock(lock_id).await?;
        EngineMetrics::global().lock.held.dec();
        Ok(())
    }

    /// True if `lock_id` is currently held.
    pub async fn is_locked(&self, lock_id: &str) -> Result<bool, LockError> {
        Ok(self.store.find_lock(lock_id).await?.is_some())
    }

    /// Metadata for `lock_id`, if currently held.
    pub async fn get_metadata(&self, lock_id: &str) -> Result<Option<LockMetadata>, LockError> {
        self.store.find_lock(lock_id).await
    }

    /// Run `f` while holding `lock_id`, releasing it on both success and
    /// failure paths. Raises [`LockError::AlreadyLocked`] up front if the
    /// lock can't be acquired - there is no waiting/backoff here, callers
    /// that want retry semantics implement it themselves.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        lock_id: &str,
        now_millis: i64,
        data: Option<serde_json::Value>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.acquire_or_raise(lock_id, now_millis, data).await?;
        let result = f().await;
        // release regardless of outcome, mirroring the `contextmanager`'s
        // `finally` block in the collaborator this is modeled on
        self.release(lock_id)
            .await
            .map_err(|e| tracing::warn!(error = %e, lock_id, "failed to release lock after scoped use"))
            .ok();
        result
    }
}

/// Real [`LockStore`], backed by a unique index on `lock_id` in a shared
/// `locks` collection - the same collection every database's locks live in,
/// distinguished only by `lock_id`.
pub struct MongoLockStore {
    collection: Collection<LockMetadata>,
}

impl MongoLockStore {
    /// Build a lock store over the `locks` collection of `database`.
    pub fn new(client: &mongodb::Client, database: &str) -> Self {
        MongoLockStore {
            collection: client.database(database).collection("locks"),
        }
    }

    /// Ensure the unique index on `lock_id` exists. A no-op if it already does.
    pub async fn ensure_indexes(&self) -> Result<(), LockError> {
        let model = mongodb::IndexModel::builder()
            .keys(doc! { "lock_id": 1 })
            .options(mongodb::options::IndexOptions::builder().unique(true).build())
            .build();
        self.collection
            .create_index(model, None)
            .await
            .map_err(|e| LockError::NotHeld(e.to_string()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LockStore for MongoLockStore {
    async fn insert_lock(&self, metadata: LockMetadata) -> Result<(), LockError> {
        match self.collection.insert_one(metadata, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(LockError::AlreadyLocked(
                "lock is already held".to_string(),
            )),
            Err(e) => Err(LockError::NotHeld(e.to_string())),
        }
    }

    async fn remove_lock(&self, lock_id: &str) -> Result<(), LockError> {
        self.collection
            .delete_one(doc! { "lock_id": lock_id }, None)
            .await
            .map_err(|e| LockError::NotHeld(e.to_string()))?;
        Ok(())
    }

    async fn find_lock(&self, lock_id: &str) -> Result<Option<LockMetadata>, LockError> {
        self.collection
            .find_one(doc! { "lock_id": lock_id }, None)
            .await
            .map_err(|e| LockError::NotHeld(e.to_string()))
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        *error.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
            mongodb::error::WriteError { code: 11000, .. }
        ))
    )
}

/// In-memory fake [`LockStore`], used outside tests by embedders that don't
/// need locks to survive a process restart (e.g. the demo binary running
/// against [`crate::store::InMemoryRecordStore`]).
#[derive(Default)]
pub struct InMemoryLockStore {
    locks: parking_lot::Mutex<std::collections::HashMap<String, LockMetadata>>,
}

impl InMemoryLockStore {
    /// An empty lock store with nothing held.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LockStore for InMemoryLockStore {
    async fn insert_lock(&self, metadata: LockMetadata) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        if locks.contains_key(&metadata.lock_id) {
            return Err(LockError::AlreadyLocked(metadata.lock_id));
        }
        locks.insert(metadata.lock_id.clone(), metadata);
        Ok(())
    }

    async fn remove_lock(&self, lock_id: &str) -> Result<(), LockError> {
        self.locks.lock().remove(lock_id);
        Ok(())
    }

    async fn find_lock(&self, lock_id: &str) -> Result<Option<LockMetadata>, LockError> {
        Ok(self.locks.lock().get(lock_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLockStore {
        locks: Mutex<std::collections::HashMap<String, LockMetadata>>,
    }

    #[async_trait::async_trait]
    impl LockStore for FakeLockStore {
        async fn insert_lock(&self, metadata: LockMetadata) -> Result<(), LockError> {
            let mut locks = self.locks.lock().unwrap();
            if locks.contains_key(&metadata.lock_id) {
                return Err(LockError::AlreadyLocked(metadata.lock_id));
            }
            locks.insert(metadata.lock_id.clone(), metadata);
            Ok(())
        }

        async fn remove_lock(&self, lock_id: &str) -> Result<(), LockError> {
            self.locks.lock().unwrap().remove(lock_id);
            Ok(())
        }

        async fn find_lock(&self, lock_id: &str) -> Result<Option<LockMetadata>, LockError> {
            Ok(self.locks.lock().unwrap().get(lock_id).cloned())
        }
    }

    #[tokio::test]
    async fn acquire_then_contended_acquire_fails() {
        let locker = Locker::new(Arc::new(FakeLockStore::default()), "test-host");
        assert!(locker.acquire("db1", 1, None).await.unwrap());
        assert!(!locker.acquire("db1", 2, None).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_lock_for_reacquisition() {
        let locker = Locker::new(Arc::new(FakeLockStore::default()), "test-host");
        assert!(locker.acquire("db1", 1, None).await.unwrap());
        locker.release("db1").await.unwrap();
        assert!(locker.acquire("db1", 2, None).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_or_raise_surfaces_already_locked() {
        let locker = Locker::new(Arc::new(FakeLockStore::default()), "test-host");
        locker.acquire("db1", 1, None).await.unwrap();
        let err = locker.acquire_or_raise("db1", 2, None).await.unwrap_err();
        assert!(matches!(err, LockError::AlreadyLocked(id) if id == "db1"));
    }

    #[tokio::test]
    async fn with_lock_releases_on_success_and_on_error() {
        let locker = Locker::new(Arc::new(FakeLockStore::default()), "test-host");

        let result: Result<i32, LockError> = locker
            .with_lock("db1", 1, None, || async { Ok(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert!(!locker.is_locked("db1").await.unwrap());

        let result: Result<i32, LockError> = locker
            .with_lock("db1", 2, None, || async {
                Err(LockError::NotHeld("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(!locker.is_locked("db1").await.unwrap());
    }
}
