//! The record store collaborator: a document database holding, per
//! database, a `data-<name>` collection of [`StoredRecord`]s and a shared
//! `options` collection of parsing-option history.
//!
//! The core never talks to `mongodb` directly - it only depends on the
//! narrow [`RecordStore`] trait here, so the rest of the engine (and its
//! tests) can run against [`InMemoryRecordStore`] instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use bson::{doc, Bson, Document};
use mongodb::options::{FindOneOptions, FindOptions, IndexOptions};
use mongodb::{Client as MongoClient, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use crate::core::error::RecordStoreError;
use crate::model::diff::DiffOps;
use crate::model::options::ParsingOptions;
use crate::model::record::StoredRecord;

/// The record store operations the rest of the engine needs: CRUD on a
/// database's stored records, and shared parsing-option history.
///
/// Every method is scoped by `database`, the Splitgill-style database name;
/// implementations map that to a collection name (`data-<name>`) and/or a
/// filter (`{"name": database}` on the shared `options` collection).
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Ensure the indexes this store relies on exist: unique ascending `id`,
    /// descending `version`. A no-op if they already exist.
    async fn ensure_record_indexes(&self, database: &str) -> Result<(), RecordStoreError>;

    /// Look up one stored record by id.
    async fn find_by_id(
        &self,
        database: &str,
        id: &str,
    ) -> Result<Option<StoredRecord>, RecordStoreError>;

    /// Look up many stored records by id in one round trip.
    async fn find_by_ids(
        &self,
        database: &str,
        ids: &[String],
    ) -> Result<Vec<StoredRecord>, RecordStoreError>;

    /// Insert a brand new stored record (no existing row with this id).
    async fn insert_record(
        &self,
        database: &str,
        record: &StoredRecord,
    ) -> Result<(), RecordStoreError>;

    /// Replace an existing stored record wholesale, matched by id. Used both
    /// by ingest (new data + new diff entry) and by rollback (reverting to
    /// the last committed state).
    async fn replace_record(
        &self,
        database: &str,
        record: &StoredRecord,
    ) -> Result<(), RecordStoreError>;

    /// Set `version` on every row with `version = null` in this database's
    /// data collection. Returns the number of rows updated.
    async fn commit_staged_records(
        &self,
        database: &str,
        version: i64,
    ) -> Result<u64, RecordStoreError>;

    /// True if any row in this database's data collection has `version = null`.
    async fn has_uncommitted_records(&self, database: &str) -> Result<bool, RecordStoreError>;

    /// True if any row in this database's data collection has a committed version.
    async fn has_committed_records(&self, database: &str) -> Result<bool, RecordStoreError>;

    /// The greatest committed version in this database's data collection, if any.
    async fn max_committed_record_version(
        &self,
        database: &str,
    ) -> Result<Option<i64>, RecordStoreError>;

    /// Every row with `version = null` - staged but not yet committed.
    async fn find_uncommitted_records(
        &self,
        database: &str,
    ) -> Result<Vec<StoredRecord>, RecordStoreError>;

    /// Committed rows, optionally filtered to `version > after`. `after =
    /// None` means every committed row.
    async fn find_committed_records(
        &self,
        database: &str,
        after: Option<i64>,
    ) -> Result<Vec<StoredRecord>, RecordStoreError>;

    /// Insert a staged (uncommitted) parsing-options entry for `database`.
    async fn insert_options(
        &self,
        database: &str,
        options: &ParsingOptions,
    ) -> Result<(), RecordStoreError>;

    /// Every options entry for `database`, keyed by version.
    /// `include_uncommitted` also returns the (at most one) staged entry
    /// under the key `i64::MIN` as a sentinel for "uncommitted" - callers
    /// that care use [`RecordStore::has_uncommitted_options`] instead of
    /// relying on that sentinel meaning anything else.
    async fn get_options(
        &self,
        database: &str,
        include_uncommitted: bool,
    ) -> Result<BTreeMap<i64, ParsingOptions>, RecordStoreError>;

    /// True if `database` has a staged (uncommitted) options entry.
    async fn has_uncommitted_options(&self, database: &str) -> Result<bool, RecordStoreError>;

    /// True if `database` has at least one committed options entry.
    async fn has_committed_options(&self, database: &str) -> Result<bool, RecordStoreError>;

    /// Set `version` on every staged options row for `database`. Returns the
    /// number of rows updated.
    async fn commit_staged_options(
        &self,
        database: &str,
        version: i64,
    ) -> Result<u64, RecordStoreError>;

    /// Delete every staged options row for `database`. Returns the number deleted.
    async fn delete_uncommitted_options(&self, database: &str) -> Result<u64, RecordStoreError>;
}

/// Wire representation of a [`StoredRecord`] in the record store: `diffs`
/// keys are decimal strings (the record store forbids
/// non-string map keys), everything else maps across unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecordDoc {
    id: String,
    version: Option<i64>,
    data: crate::model::value::Value,
    #[serde(default)]
    diffs: BTreeMap<String, DiffOps>,
}

impl From<&StoredRecord> for StoredRecordDoc {
    fn from(record: &StoredRecord) -> Self {
        StoredRecordDoc {
            id: record.id.clone(),
            version: record.version,
            data: record.data.clone(),
            diffs: record
                .diffs
                .iter()
                .map(|(v, ops)| (v.to_string(), ops.clone()))
                .collect(),
        }
    }
}

impl TryFrom<StoredRecordDoc> for StoredRecord {
    type Error = RecordStoreError;

    fn try_from(doc: StoredRecordDoc) -> Result<Self, Self::Error> {
        let mut diffs = BTreeMap::new();
        for (k, ops) in doc.diffs {
            let version: i64 = k
                .parse()
                .map_err(|_| RecordStoreError::Bson(format!("non-numeric diff key: {}", k)))?;
            diffs.insert(version, ops);
        }
        Ok(StoredRecord {
            id: doc.id,
            version: doc.version,
            data: doc.data,
            diffs,
        })
    }
}

/// An options entry document as stored in the shared `options` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OptionsDoc {
    name: String,
    version: Option<i64>,
    options: ParsingOptions,
}

/// Real record store, backed by a `mongodb` database handle.
pub struct MongoRecordStore {
    client: MongoClient,
    database: String,
}

impl MongoRecordStore {
    /// Connect to `uri` and use `database` as the record store's own
    /// Mongo database name (distinct from the Splitgill "database" name
    /// that parameterizes every trait method here).
    pub async fn connect(uri: &str, database: impl Into<String>) -> Result<Self, RecordStoreError> {
        let client = MongoClient::with_uri_str(uri)
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(MongoRecordStore {
            client,
            database: database.into(),
        })
    }

    fn data_collection(&self, database: &str) -> Collection<Document> {
        self.client
            .database(&self.database)
            .collection(&format!("data-{}", database))
    }

    fn options_collection(&self) -> Collection<Document> {
        self.client.database(&self.database).collection("options")
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Document, RecordStoreError> {
    bson::to_document(value).map_err(|e| RecordStoreError::Bson(e.to_string()))
}

fn from_document<T: for<'de> Deserialize<'de>>(doc: Document) -> Result<T, RecordStoreError> {
    bson::from_document(doc).map_err(|e| RecordStoreError::Bson(e.to_string()))
}

#[async_trait::async_trait]
impl RecordStore for MongoRecordStore {
    async fn ensure_record_indexes(&self, database: &str) -> Result<(), RecordStoreError> {
        let collection = self.data_collection(database);
        let id_index = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let version_index = IndexModel::builder().keys(doc! { "version": -1 }).build();
        collection
            .create_indexes([id_index, version_index])
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        database: &str,
        id: &str,
    ) -> Result<Option<StoredRecord>, RecordStoreError> {
        let found = self
            .data_collection(database)
            .find_one(doc! { "id": id }, FindOneOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        found
            .map(|d| from_document::<StoredRecordDoc>(d).and_then(StoredRecord::try_from))
            .transpose()
    }

    async fn find_by_ids(
        &self,
        database: &str,
        ids: &[String],
    ) -> Result<Vec<StoredRecord>, RecordStoreError> {
        let filter = doc! { "id": { "$in": ids } };
        let mut cursor = self
            .data_collection(database)
            .find(filter, FindOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        collect_stored_records(&mut cursor).await
    }

    async fn insert_record(
        &self,
        database: &str,
        record: &StoredRecord,
    ) -> Result<(), RecordStoreError> {
        let doc = to_document(&StoredRecordDoc::from(record))?;
        self.data_collection(database)
            .insert_one(doc, None)
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(())
    }

    async fn replace_record(
        &self,
        database: &str,
        record: &StoredRecord,
    ) -> Result<(), RecordStoreError> {
        let doc = to_document(&StoredRecordDoc::from(record))?;
        self.data_collection(database)
            .replace_one(doc! { "id": &record.id }, doc, None)
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(())
    }

    async fn commit_staged_records(
        &self,
        database: &str,
        version: i64,
    ) -> Result<u64, RecordStoreError> {
        let result = self
            .data_collection(database)
            .update_many(
                doc! { "version": Bson::Null },
                doc! { "$set": { "version": version } },
                None,
            )
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(result.modified_count)
    }

    async fn has_uncommitted_records(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self
            .data_collection(database)
            .find_one(doc! { "version": Bson::Null }, FindOneOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?
            .is_some())
    }

    async fn has_committed_records(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self
            .data_collection(database)
            .find_one(doc! { "version": { "$ne": Bson::Null } }, FindOneOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?
            .is_some())
    }

    async fn max_committed_record_version(
        &self,
        database: &str,
    ) -> Result<Option<i64>, RecordStoreError> {
        let options = FindOneOptions::builder()
            .sort(doc! { "version": -1 })
            .build();
        let found = self
            .data_collection(database)
            .find_one(doc! { "version": { "$ne": Bson::Null } }, options)
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(found.and_then(|d| d.get_i64("version").ok()))
    }

    async fn find_uncommitted_records(
        &self,
        database: &str,
    ) -> Result<Vec<StoredRecord>, RecordStoreError> {
        let mut cursor = self
            .data_collection(database)
            .find(doc! { "version": Bson::Null }, FindOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        collect_stored_records(&mut cursor).await
    }

    async fn find_committed_records(
        &self,
        database: &str,
        after: Option<i64>,
    ) -> Result<Vec<StoredRecord>, RecordStoreError> {
        let filter = match after {
            Some(v) => doc! { "version": { "$gt": v } },
            None => doc! { "version": { "$ne": Bson::Null } },
        };
        let mut cursor = self
            .data_collection(database)
            .find(filter, FindOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        collect_stored_records(&mut cursor).await
    }

    async fn insert_options(
        &self,
        database: &str,
        options: &ParsingOptions,
    ) -> Result<(), RecordStoreError> {
        let doc = to_document(&OptionsDoc {
            name: database.to_string(),
            version: None,
            options: options.clone(),
        })?;
        self.options_collection()
            .insert_one(doc, None)
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(())
    }

    async fn get_options(
        &self,
        database: &str,
        include_uncommitted: bool,
    ) -> Result<BTreeMap<i64, ParsingOptions>, RecordStoreError> {
        let mut cursor = self
            .options_collection()
            .find(doc! { "name": database }, FindOptions::default())
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;

        use futures::stream::TryStreamExt;
        let mut out = BTreeMap::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?
        {
            let entry: OptionsDoc = from_document(doc)?;
            match entry.version {
                Some(v) => {
                    out.insert(v, entry.options);
                }
                None if include_uncommitted => {
                    out.insert(i64::MIN, entry.options);
                }
                None => {}
            }
        }
        Ok(out)
    }

    async fn has_uncommitted_options(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self
            .options_collection()
            .find_one(
                doc! { "name": database, "version": Bson::Null },
                FindOneOptions::default(),
            )
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?
            .is_some())
    }

    async fn has_committed_options(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self
            .options_collection()
            .find_one(
                doc! { "name": database, "version": { "$ne": Bson::Null } },
                FindOneOptions::default(),
            )
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?
            .is_some())
    }

    async fn commit_staged_options(
        &self,
        database: &str,
        version: i64,
    ) -> Result<u64, RecordStoreError> {
        let result = self
            .options_collection()
            .update_many(
                doc! { "name": database, "version": Bson::Null },
                doc! { "$set": { "version": version } },
                None,
            )
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(result.modified_count)
    }

    async fn delete_uncommitted_options(&self, database: &str) -> Result<u64, RecordStoreError> {
        let result = self
            .options_collection()
            .delete_many(doc! { "name": database, "version": Bson::Null }, None)
            .await
            .map_err(|e| RecordStoreError::Driver(e.to_string()))?;
        Ok(result.deleted_count)
    }
}

async fn collect_stored_records(
    cursor: &mut mongodb::Cursor<Document>,
) -> Result<Vec<StoredRecord>, RecordStoreError> {
    use futures::stream::TryStreamExt;
    let mut out = Vec::new();
    while let Some(doc) = cursor
        .try_next()
        .await
        .map_err(|e| RecordStoreError::Driver(e.to_string()))?
    {
        let wire: StoredRecordDoc = from_document(doc)?;
        out.push(StoredRecord::try_from(wire)?);
    }
    Ok(out)
}

/// In-memory fake [`RecordStore`], used by the facade's unit/integration
/// tests and by any embedder that wants the engine's semantics without a
/// live Mongo deployment (e.g. a demo or a CI smoke test).
#[derive(Default)]
pub struct InMemoryRecordStore {
    databases: parking_lot::Mutex<BTreeMap<String, DatabaseTables>>,
}

#[derive(Default, Clone)]
struct DatabaseTables {
    records: BTreeMap<String, StoredRecord>,
    // append-only; (version, options). version = None means staged.
    options: Vec<(Option<i64>, ParsingOptions)>,
}

impl InMemoryRecordStore {
    /// An empty store with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<T>(&self, database: &str, f: impl FnOnce(&mut DatabaseTables) -> T) -> T {
        let mut databases = self.databases.lock();
        let tables = databases.entry(database.to_string()).or_default();
        f(tables)
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn ensure_record_indexes(&self, _database: &str) -> Result<(), RecordStoreError> {
        Ok(())
    }

    async fn find_by_id(
        &self,
        database: &str,
        id: &str,
    ) -> Result<Option<StoredRecord>, RecordStoreError> {
        Ok(self.with_tables(database, |t| t.records.get(id).cloned()))
    }

    async fn find_by_ids(
        &self,
        database: &str,
        ids: &[String],
    ) -> Result<Vec<StoredRecord>, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            ids.iter().filter_map(|id| t.records.get(id).cloned()).collect()
        }))
    }

    async fn insert_record(
        &self,
        database: &str,
        record: &StoredRecord,
    ) -> Result<(), RecordStoreError> {
        self.with_tables(database, |t| {
            t.records.insert(record.id.clone(), record.clone());
        });
        Ok(())
    }

    async fn replace_record(
        &self,
        database: &str,
        record: &StoredRecord,
    ) -> Result<(), RecordStoreError> {
        self.with_tables(database, |t| {
            t.records.insert(record.id.clone(), record.clone());
        });
        Ok(())
    }

    async fn commit_staged_records(
        &self,
        database: &str,
        version: i64,
    ) -> Result<u64, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            let mut count = 0;
            for record in t.records.values_mut() {
                if record.version.is_none() {
                    record.version = Some(version);
                    count += 1;
                }
            }
            count
        }))
    }

    async fn has_uncommitted_records(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self.with_tables(database, |t| t.records.values().any(|r| r.version.is_none())))
    }

    async fn has_committed_records(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self.with_tables(database, |t| t.records.values().any(|r| r.version.is_some())))
    }

    async fn max_committed_record_version(
        &self,
        database: &str,
    ) -> Result<Option<i64>, RecordStoreError> {
        Ok(self.with_tables(database, |t| t.records.values().filter_map(|r| r.version).max()))
    }

    async fn find_uncommitted_records(
        &self,
        database: &str,
    ) -> Result<Vec<StoredRecord>, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            t.records.values().filter(|r| r.version.is_none()).cloned().collect()
        }))
    }

    async fn find_committed_records(
        &self,
        database: &str,
        after: Option<i64>,
    ) -> Result<Vec<StoredRecord>, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            t.records
                .values()
                .filter(|r| match (r.version, after) {
                    (Some(v), Some(after)) => v > after,
                    (Some(_), None) => true,
                    (None, _) => false,
                })
                .cloned()
                .collect()
        }))
    }

    async fn insert_options(
        &self,
        database: &str,
        options: &ParsingOptions,
    ) -> Result<(), RecordStoreError> {
        self.with_tables(database, |t| t.options.push((None, options.clone())));
        Ok(())
    }

    async fn get_options(
        &self,
        database: &str,
        include_uncommitted: bool,
    ) -> Result<BTreeMap<i64, ParsingOptions>, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            let mut out = BTreeMap::new();
            for (version, options) in &t.options {
                match version {
                    Some(v) => {
                        out.insert(*v, options.clone());
                    }
                    None if include_uncommitted => {
                        out.insert(i64::MIN, options.clone());
                    }
                    None => {}
                }
            }
            out
        }))
    }

    async fn has_uncommitted_options(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self.with_tables(database, |t| t.options.iter().any(|(v, _)| v.is_none())))
    }

    async fn has_committed_options(&self, database: &str) -> Result<bool, RecordStoreError> {
        Ok(self.with_tables(database, |t| t.options.iter().any(|(v, _)| v.is_some())))
    }

    async fn commit_staged_options(
        &self,
        database: &str,
        version: i64,
    ) -> Result<u64, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            let mut count = 0;
            for entry in t.options.iter_mut() {
                if entry.0.is_none() {
                    entry.0 = Some(version);
                    count += 1;
                }
            }
            count
        }))
    }

    async fn delete_uncommitted_options(&self, database: &str) -> Result<u64, RecordStoreError> {
        Ok(self.with_tables(database, |t| {
            let before = t.options.len();
            t.options.retain(|(v, _)| v.is_some());
            (before - t.options.len()) as u64
        }))
    }
}

/// Shared handle type passed around the facade: cheap to clone, one per process.
pub type SharedRecordStore = Arc<dyn RecordStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::options::ParsingOptionsBuilder;
    use crate::model::value::Value;

    fn sample_record(id: &str) -> StoredRecord {
        StoredRecord {
            id: id.to_string(),
            version: None,
            data: Value::normalize(&serde_json::json!({"a": 1})).unwrap(),
            diffs: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_find_roundtrips() {
        let store = InMemoryRecordStore::new();
        store.insert_record("db1", &sample_record("r1")).await.unwrap();
        let found = store.find_by_id("db1", "r1").await.unwrap().unwrap();
        assert_eq!(found.id, "r1");
        assert!(found.version.is_none());
    }

    #[tokio::test]
    async fn commit_staged_records_sets_version_on_uncommitted_only() {
        let store = InMemoryRecordStore::new();
        store.insert_record("db1", &sample_record("r1")).await.unwrap();
        let mut committed = sample_record("r2");
        committed.version = Some(1);
        store.insert_record("db1", &committed).await.unwrap();

        let updated = store.commit_staged_records("db1", 100).await.unwrap();
        assert_eq!(updated, 1);
        assert_eq!(store.find_by_id("db1", "r1").await.unwrap().unwrap().version, Some(100));
        assert_eq!(store.find_by_id("db1", "r2").await.unwrap().unwrap().version, Some(1));
    }

    #[tokio::test]
    async fn options_lifecycle_stage_commit_rollback() {
        let store = InMemoryRecordStore::new();
        let options = ParsingOptionsBuilder::new().with_defaults().build();
        store.insert_options("db1", &options).await.unwrap();
        assert!(store.has_uncommitted_options("db1").await.unwrap());
        assert!(!store.has_committed_options("db1").await.unwrap());

        let updated = store.commit_staged_options("db1", 5).await.unwrap();
        assert_eq!(updated, 1);
        assert!(store.has_committed_options("db1").await.unwrap());

        store.insert_options("db1", &options).await.unwrap();
        let deleted = store.delete_uncommitted_options("db1").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(!store.has_uncommitted_options("db1").await.unwrap());
    }

    #[tokio::test]
    async fn find_committed_records_respects_after_watermark() {
        let store = InMemoryRecordStore::new();
        let mut r1 = sample_record("r1");
        r1.version = Some(10);
        let mut r2 = sample_record("r2");
        r2.version = Some(20);
        store.insert_record("db1", &r1).await.unwrap();
        store.insert_record("db1", &r2).await.unwrap();

        let all = store.find_committed_records("db1", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let after_10 = store.find_committed_records("db1", Some(10)).await.unwrap();
        assert_eq!(after_10.len(), 1);
        assert_eq!(after_10[0].id, "r2");
    }
}
