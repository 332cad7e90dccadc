//! The engine's top-level entry point: owns the collaborator handles shared
//! across every database and hands out [`Database`] facades by name.

use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::db::database::Database;
use crate::locking::{InMemoryLockStore, Locker, MongoLockStore, SharedLockStore};
use crate::store::{
    ElasticsearchStore, InMemoryRecordStore, InMemorySearchStore, MongoRecordStore,
    SharedRecordStore, SharedSearchStore,
};

/// Owns the record store, search store, and locker shared by every database
/// this process manages. Cheap to clone - every field is an `Arc`.
#[derive(Clone)]
pub struct Client {
    record_store: SharedRecordStore,
    search_store: SharedSearchStore,
    locker: Arc<Locker>,
    config: EngineConfig,
}

impl Client {
    /// Connect to the record store and search store named in `config`, using
    /// a real Mongo-backed lock store in the same Mongo database as the
    /// records. This is the path the demo binary and any real deployment uses.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let record_store = MongoRecordStore::connect(
            &config.record_store.uri,
            &config.record_store.database,
        )
        .await?;
        let mongo_client = mongodb::Client::with_uri_str(&config.record_store.uri)
            .await
            .map_err(|e| crate::core::error::RecordStoreError::Driver(e.to_string()))?;
        let lock_store: SharedLockStore = Arc::new(MongoLockStore::new(
            &mongo_client,
            &config.record_store.database,
        ));

        let search_store = ElasticsearchStore::new(
            &config.search_store.url,
            config.search_store.request_timeout,
        )?;

        let hostname = hostname_or_fallback();
        Ok(Client {
            record_store: Arc::new(record_store),
            search_store: Arc::new(search_store),
            locker: Arc::new(Locker::new(lock_store, hostname)),
            config,
        })
    }

    /// Build a client entirely in memory, useful for tests and for the demo
    /// binary's offline mode.
    pub fn in_memory(config: EngineConfig) -> Self {
        let lock_store: SharedLockStore = Arc::new(InMemoryLockStore::new());
        Client {
            record_store: Arc::new(InMemoryRecordStore::new()),
            search_store: Arc::new(InMemorySearchStore::new()),
            locker: Arc::new(Locker::new(lock_store, hostname_or_fallback())),
            config,
        }
    }

    /// Build a [`Database`] facade for `name`, sharing this client's
    /// collaborator handles.
    pub fn database(&self, name: impl Into<String>) -> Database {
        Database::new(
            name.into(),
            Arc::clone(&self.record_store),
            Arc::clone(&self.search_store),
            Arc::clone(&self.locker),
            self.config.clone(),
        )
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "stratum-index".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_client_hands_out_independent_database_facades() {
        let client = Client::in_memory(EngineConfig::default());
        let db1 = client.database("demo");
        let db2 = client.database("demo");
        assert_eq!(db1.name(), db2.name());
    }
}
