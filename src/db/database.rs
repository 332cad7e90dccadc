//! Per-database facade: commit/ingest/sync/search, the surface everything
//! else in this crate exists to support

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::fields::{DocumentField, FieldInfo, ParsedType};
use crate::index::names::IndexNames;
use crate::index::planner::generate_index_ops;
use crate::locking::Locker;
use crate::model::diff::diff;
use crate::model::options::ParsingOptionsBuilder;
use crate::model::record::{Record, StoredRecord};
use crate::model::value::Value;
use crate::store::{RecordStore, SearchStore, SharedRecordStore, SharedSearchStore};
use crate::system::metrics::EngineMetrics;

/// Tally of what an [`Database::ingest`] call did with the batch it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestResult {
    /// brand new records inserted
    pub inserted: u64,
    /// existing records updated with a new diff
    pub updated: u64,
    /// records dropped as no-ops
    pub noop: u64,
    /// the version assigned by the trailing commit, if one happened
    pub version: Option<i64>,
}

/// Which slice of a database's indexed data a [`Database::search`] session
/// is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchVersion {
    /// the latest index only, no version filter
    Latest,
    /// every index (latest + archives), no version filter
    All,
    /// every index, filtered to documents valid at this version
    At(i64),
}

/// A configured search scope: which indices to query and (if any) the
/// version filter to apply. The query DSL itself belongs to the search store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSession {
    /// the index name or wildcard to search
    pub index: String,
    /// the version to filter results to, if any
    pub version: Option<i64>,
}

/// Per-field statistics for a [`Profile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileField {
    /// the field's own name (last path segment)
    pub name: String,
    /// the full dotted path to the field
    pub path: String,
    /// total documents with this field present, in any parsed form
    pub count: i64,
    /// documents where this field parsed as a boolean
    pub boolean_count: i64,
    /// documents where this field parsed as a date
    pub date_count: i64,
    /// documents where this field parsed as a number
    pub number_count: i64,
}

/// A snapshot of a database's shape at a given version: simple totals plus
/// per-field presence/type counts, cheaply derived from the field catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    /// the database this profile describes
    pub name: String,
    /// the version this profile was built at
    pub version: i64,
    /// total fields with at least one document
    pub field_count: usize,
    /// per-field statistics, keyed by dotted path
    pub fields: BTreeMap<String, ProfileField>,
}

/// The per-database API: commit, ingest, sync, search, and the field catalog.
pub struct Database {
    name: String,
    record_store: SharedRecordStore,
    search_store: SharedSearchStore,
    locker: Arc<Locker>,
    config: EngineConfig,
}

impl Database {
    pub(crate) fn new(
        name: String,
        record_store: SharedRecordStore,
        search_store: SharedSearchStore,
        locker: Arc<Locker>,
        config: EngineConfig,
    ) -> Self {
        Database {
            name,
            record_store,
            search_store,
            locker,
            config,
        }
    }

    /// This database's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn indices(&self) -> IndexNames {
        IndexNames::new(&self.name)
    }

    /// The latest committed version across data and options, or `None` if
    /// neither has ever been committed.
    pub async fn get_committed_version(&self) -> Result<Option<i64>> {
        let data_version = self.record_store.max_committed_record_version(&self.name).await?;
        let options = self.record_store.get_options(&self.name, false).await?;
        let options_version = options.keys().max().copied();
        Ok(match (data_version, options_version) {
            (None, None) => None,
            (a, b) => Some(a.into_iter().chain(b).max().unwrap()),
        })
    }

    /// The latest version reflected in the search store, checking both
    /// `version` and `next` so deletions (which only touch `next`) count.
    pub async fn get_elasticsearch_version(&self) -> Result<Option<i64>> {
        let by_version = self.search_store.max_date_field(&self.name, DocumentField::Version).await?;
        let by_next = self.search_store.max_date_field(&self.name, DocumentField::Next).await?;
        Ok(by_version.into_iter().chain(by_next).max())
    }

    /// True if this database has at least one committed record.
    pub async fn has_data(&self) -> Result<bool> {
        Ok(self.record_store.has_committed_records(&self.name).await?)
    }

    /// True if this database has at least one committed options entry.
    pub async fn has_options(&self) -> Result<bool> {
        Ok(self.record_store.has_committed_options(&self.name).await?)
    }

    /// True if this database has staged, uncommitted data.
    pub async fn has_uncommitted_data(&self) -> Result<bool> {
        Ok(self.record_store.has_uncommitted_records(&self.name).await?)
    }

    /// True if this database has a staged, uncommitted options entry.
    pub async fn has_uncommitted_options(&self) -> Result<bool> {
        Ok(self.record_store.has_uncommitted_options(&self.name).await?)
    }

    /// Commit every staged row in this database's data and options
    /// collections under a single new version. Returns `None` if there was
    /// nothing staged. Fails with [`crate::core::error::LockError::AlreadyLocked`]
    /// if another commit is already in flight for this database.
    pub async fn commit(&self) -> Result<Option<i64>> {
        let name = self.name.clone();
        let now = now_millis();
        self.locker
            .acquire_or_raise(&name, now, Some(serde_json::json!({"stage": "commit"})))
            .await?;

        let outcome = self.commit_locked(now).await;

        if let Err(e) = self.locker.release(&name).await {
            tracing::warn!(error = %e, database = %name, "failed to release commit lock");
        }
        outcome
    }

    async fn commit_locked(&self, now: i64) -> Result<Option<i64>> {
        let has_uncommitted_data = self.has_uncommitted_data().await?;
        let has_uncommitted_options = self.has_uncommitted_options().await?;
        if !has_uncommitted_data && !has_uncommitted_options {
            EngineMetrics::global().sync.commits_noop.inc();
            return Ok(None);
        }

        if !self.has_options().await? && !has_uncommitted_options {
            let defaults = ParsingOptionsBuilder::new().with_defaults().build();
            self.record_store.insert_options(&self.name, &defaults).await?;
        }

        self.record_store.commit_staged_records(&self.name, now).await?;
        self.record_store.commit_staged_options(&self.name, now).await?;
        EngineMetrics::global().sync.commits.inc();
        Ok(Some(now))
    }

    /// Normalize and diff `records` into this database's staged data. If
    /// `commit` is true (the default ingest behavior), commit afterward.
    /// `modified_field`, if given, is a top-level field name whose
    /// lone change is treated as a no-op (a "last modified" timestamp that
    /// ticked without anything else changing).
    pub async fn ingest(
        &self,
        records: &[Record],
        commit: bool,
        modified_field: Option<&str>,
    ) -> Result<IngestResult> {
        self.record_store.ensure_record_indexes(&self.name).await?;

        let mut result = IngestResult::default();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let existing = self.record_store.find_by_ids(&self.name, &ids).await?;
        let mut existing_by_id: BTreeMap<String, StoredRecord> =
            existing.into_iter().map(|r| (r.id.clone(), r)).collect();

        for record in records {
            EngineMetrics::global().ingest.records_ingested.inc();
            let new_data = Value::normalize(&record.data)?;

            match existing_by_id.remove(&record.id) {
                None => {
                    if new_data.is_empty_map() {
                        // deleting a record that doesn't exist is a no-op
                        result.noop += 1;
                        EngineMetrics::global().ingest.records_noop.inc();
                        continue;
                    }
                    let stored = StoredRecord {
                        id: record.id.clone(),
                        version: None,
                        data: new_data,
                        diffs: BTreeMap::new(),
                    };
                    self.record_store.insert_record(&self.name, &stored).await?;
                    result.inserted += 1;
                    EngineMetrics::global().ingest.records_inserted.inc();
                }
                Some(existing) => {
                    if existing.data == new_data {
                        // nothing changed; if it was staged, it stays staged as-is
                        result.noop += 1;
                        EngineMetrics::global().ingest.records_noop.inc();
                        continue;
                    }

                    let changes = diff(&new_data, &existing.data)?;
                    EngineMetrics::global().ingest.diffs_computed.inc();

                    let is_modified_field_only = modified_field
                        .map(|field| is_single_top_level_field_change(&changes, field))
                        .unwrap_or(false);
                    if changes.is_empty() || is_modified_field_only {
                        result.noop += 1;
                        EngineMetrics::global().ingest.records_noop.inc();
                        continue;
                    }

                    let base_version = existing.version.unwrap_or(0);
                    let mut diffs = existing.diffs.clone();
                    diffs.insert(base_version, changes);

                    let updated = StoredRecord {
                        id: record.id.clone(),
                        version: None,
                        data: new_data,
                        diffs,
                    };
                    self.record_store.replace_record(&self.name, &updated).await?;
                    result.updated += 1;
                    EngineMetrics::global().ingest.records_updated.inc();
                }
            }
        }

        if commit {
            result.version = self.commit().await?;
        }

        Ok(result)
    }

    /// Replace this database's parsing options. If the new options are
    /// identical to the latest committed ones, nothing happens. Any
    /// currently staged options are rolled back first - there is only ever
    /// one staged options entry at a time.
    pub async fn update_options(
        &self,
        options: crate::model::options::ParsingOptions,
        commit: bool,
    ) -> Result<Option<i64>> {
        let all_options = self.record_store.get_options(&self.name, false).await?;
        let latest = all_options.iter().max_by_key(|(v, _)| **v).map(|(_, o)| o.clone());

        if self.has_uncommitted_options().await? {
            self.rollback_options().await?;
        }

        if latest.as_ref() == Some(&options) {
            return Ok(None);
        }

        self.record_store.insert_options(&self.name, &options).await?;

        if commit {
            self.commit().await
        } else {
            Ok(None)
        }
    }

    /// Delete any staged options entry for this database.
    pub async fn rollback_options(&self) -> Result<u64> {
        Ok(self.record_store.delete_uncommitted_options(&self.name).await?)
    }

    /// Revert every staged record to its last committed state, walking the
    /// diff chain back one step and dropping the stray diff entry. Records
    /// with no prior committed state (brand new inserts) are left as-is -
    /// rolling back a never-committed insert is handled by simply never
    /// committing it, matching the source behavior of only touching rows
    /// that actually have a committed version to revert to.
    pub async fn rollback_records(&self) -> Result<u64> {
        if !self.has_uncommitted_data().await? {
            return Ok(0);
        }

        let uncommitted = self.record_store.find_uncommitted_records(&self.name).await?;
        let mut reverted = 0;

        for record in uncommitted {
            let Some(&previous_version) = record.diffs.keys().next_back() else {
                continue;
            };
            let ops = record.diffs.get(&previous_version).expect("key came from this map");
            let previous_data = crate::model::diff::patch(&record.data, ops)?;

            let mut diffs = record.diffs.clone();
            diffs.remove(&previous_version);

            let reverted_record = StoredRecord {
                id: record.id.clone(),
                version: Some(previous_version),
                data: previous_data,
                diffs,
            };
            self.record_store.replace_record(&self.name, &reverted_record).await?;
            reverted += 1;
        }

        Ok(reverted)
    }

    /// Bring the search store up to date with this database's committed
    /// data and options. Comparing the search store's watermark against the
    /// record store's committed version decides whether this runs a full
    /// reindex or an incremental one.
    pub async fn sync(&self, resync: bool) -> Result<crate::sync::WriteResult> {
        let _timer = EngineMetrics::global().sync.sync_duration.start_timer();

        if !self.has_data().await? {
            return Ok(crate::sync::WriteResult::default());
        }

        let all_options = self.record_store.get_options(&self.name, false).await?;
        let last_sync = if resync { None } else { self.get_elasticsearch_version().await? };

        let after = match last_sync {
            None => None,
            Some(last_sync) => {
                let committed_version = self.get_committed_version().await?;
                if committed_version.map(|v| last_sync >= v).unwrap_or(true) {
                    return Ok(crate::sync::WriteResult::default());
                }
                if all_options.keys().any(|v| *v > last_sync) {
                    None
                } else {
                    Some(last_sync)
                }
            }
        };

        let find_filter = after;
        let records = self.record_store.find_committed_records(&self.name, find_filter).await?;

        let indices = self.indices();
        self.search_store.ensure_template().await?;
        self.search_store.ensure_index_exists(&indices.latest).await?;

        let max_docs_per_archive = self.config.scheduling.max_docs_per_archive;
        let mut status = self.search_store.current_arc_status(&indices.arc_base).await?;
        let mut all_ops = Vec::new();
        for record in &records {
            let (ops, updated_status) =
                generate_index_ops(&indices, status, record, &all_options, find_filter, max_docs_per_archive)?;
            status = updated_status;
            all_ops.extend(ops);
        }

        let touched_indices = touched_index_names(&indices, &all_ops);
        let driver = crate::sync::SyncDriver::new(
            Arc::clone(&self.search_store),
            crate::sync::SyncOptions::from(&self.config.sync),
        );
        let result = driver.run_for_indices(&touched_indices, all_ops).await?;

        for archive in touched_indices.iter().filter(|i| i.contains("-arc-")) {
            self.search_store.delete_index_if_empty(archive).await?;
        }

        Ok(result)
    }

    /// The greatest indexed version at or below `target`, or `None` if no
    /// version qualifies.
    pub async fn get_rounded_version(&self, target: i64) -> Result<Option<i64>> {
        let versions = self.get_versions().await?;
        Ok(versions.into_iter().filter(|v| *v <= target).max())
    }

    /// Every version this database has been indexed at, ascending.
    pub async fn get_versions(&self) -> Result<Vec<i64>> {
        Ok(self.search_store.versions_aggregation(&self.name).await?)
    }

    /// Configure a search session bound to this database.
    pub fn search(&self, version: SearchVersion) -> SearchSession {
        let indices = self.indices();
        match version {
            SearchVersion::Latest => SearchSession { index: indices.latest, version: None },
            SearchVersion::All => SearchSession { index: indices.wildcard, version: None },
            SearchVersion::At(v) => SearchSession { index: indices.wildcard, version: Some(v) },
        }
    }

    /// Aggregate the raw `data_types` catalog for this database.
    pub async fn get_data_fields(&self) -> Result<FieldInfo> {
        let mut info = FieldInfo::new();
        for bucket in self.search_store.field_type_aggregation(&self.name, DocumentField::DataTypes).await? {
            info.add_data_type(&bucket.key, bucket.doc_count);
        }
        Ok(info)
    }

    /// Aggregate the `parsed_types` catalog for this database.
    pub async fn get_parsed_fields(&self) -> Result<FieldInfo> {
        let mut info = FieldInfo::new();
        for bucket in self.search_store.field_type_aggregation(&self.name, DocumentField::ParsedTypes).await? {
            info.add_parsed_type(&bucket.key, bucket.doc_count);
        }
        Ok(info)
    }

    /// Build a shape/type snapshot of this database at `version`, derived
    /// from the parsed field catalog - cheap because it reuses the
    /// aggregation [`Database::get_parsed_fields`] already does, rather than
    /// issuing a per-field `exists` query.
    pub async fn profile(&self, version: i64) -> Result<Profile> {
        let parsed_fields = self.get_parsed_fields().await?;

        let mut fields = BTreeMap::new();
        for field in parsed_fields.iter_parsed_fields() {
            let count = ParsedType::ALL
                .iter()
                .map(|t| field.count(*t))
                .max()
                .unwrap_or(0);
            if count == 0 {
                continue;
            }
            fields.insert(
                field.path.clone(),
                ProfileField {
                    name: field.name().to_string(),
                    path: field.path.clone(),
                    count,
                    boolean_count: field.count(ParsedType::Boolean),
                    date_count: field.count(ParsedType::Date),
                    number_count: field.count(ParsedType::Number),
                },
            );
        }

        Ok(Profile {
            name: self.name.clone(),
            version,
            field_count: fields.len(),
            fields,
        })
    }
}

fn is_single_top_level_field_change(changes: &crate::model::diff::DiffOps, field: &str) -> bool {
    changes.iter().all(|op| {
        matches!(
            op.0.as_slice(),
            [crate::model::diff::PathSegment::Key(key)] if key == field
        )
    })
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

fn touched_index_names(indices: &IndexNames, ops: &[crate::index::ops::BulkOp]) -> Vec<String> {
    let mut names: Vec<String> = ops.iter().map(|op| op.index().to_string()).collect();
    names.sort();
    names.dedup();
    if !names.contains(&indices.latest) {
        names.push(indices.latest.clone());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::client::Client;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[tokio::test]
    async fn ingest_then_commit_assigns_a_version() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let records = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob"}))];
        let result = db.ingest(&records, true, None).await.unwrap();
        assert_eq!(result.inserted, 1);
        assert!(result.version.is_some());
        assert!(db.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn ingest_without_commit_leaves_records_staged() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let records = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob"}))];
        let result = db.ingest(&records, false, None).await.unwrap();
        assert_eq!(result.inserted, 1);
        assert!(result.version.is_none());
        assert!(db.has_uncommitted_data().await.unwrap());
        assert!(!db.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_nonexistent_record_is_a_noop() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let records = vec![Record::delete("does-not-exist")];
        let result = db.ingest(&records, true, None).await.unwrap();
        assert_eq!(result.noop, 1);
        assert_eq!(result.inserted, 0);
        assert!(result.version.is_none());
    }

    #[tokio::test]
    async fn reingesting_identical_data_is_a_noop() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let records = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob"}))];
        db.ingest(&records, true, None).await.unwrap();
        let result = db.ingest(&records, true, None).await.unwrap();
        assert_eq!(result.noop, 1);
        assert_eq!(result.updated, 0);
    }

    #[tokio::test]
    async fn modified_field_only_change_is_a_noop() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let first = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob", "touched": "2020-01-01"}))];
        db.ingest(&first, true, None).await.unwrap();

        let second = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob", "touched": "2020-02-02"}))];
        let result = db.ingest(&second, true, Some("touched")).await.unwrap();
        assert_eq!(result.noop, 1);
        assert_eq!(result.updated, 0);
    }

    #[tokio::test]
    async fn commit_with_nothing_staged_returns_none() {
        let client = Client::in_memory(config());
        let db = client.database("demo");
        assert_eq!(db.commit().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sync_writes_committed_records_into_the_latest_index() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let records = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob"}))];
        db.ingest(&records, true, None).await.unwrap();

        let result = db.sync(false).await.unwrap();
        assert_eq!(result.indexed, 1);
    }

    #[tokio::test]
    async fn sync_resumes_archive_rotation_across_independent_database_handles() {
        let mut cfg = config();
        cfg.scheduling.max_docs_per_archive = 1;
        let client = Client::in_memory(cfg);

        // two records, each with one prior version, so syncing both together
        // shunts two documents into archives and forces a rotation
        for id in ["r1", "r2"] {
            let db = client.database("demo");
            let v1 = vec![Record::new(serde_json::json!({"id": id, "name": "v1"}))];
            db.ingest(&v1, true, None).await.unwrap();
            let v2 = vec![Record::new(serde_json::json!({"id": id, "name": "v2"}))];
            db.ingest(&v2, true, None).await.unwrap();
        }

        // sync through a freshly-obtained handle, as every HTTP request would
        let db = client.database("demo");
        let result = db.sync(false).await.unwrap();
        assert_eq!(result.indexed, 4);

        // a second fresh handle must see the rotation state the first handle
        // left behind, not restart archive numbering from zero
        let db = client.database("demo");
        let status = db.search_store.current_arc_status(&db.indices().arc_base).await.unwrap();
        assert_eq!(status.index, 1);
    }

    #[tokio::test]
    async fn rollback_records_reverts_staged_updates() {
        let client = Client::in_memory(config());
        let db = client.database("demo");

        let v1 = vec![Record::new(serde_json::json!({"id": "r1", "name": "bob"}))];
        db.ingest(&v1, true, None).await.unwrap();

        let v2 = vec![Record::new(serde_json::json!({"id": "r1", "name": "bobby"}))];
        db.ingest(&v2, false, None).await.unwrap();
        assert!(db.has_uncommitted_data().await.unwrap());

        let reverted = db.rollback_records().await.unwrap();
        assert_eq!(reverted, 1);
        assert!(!db.has_uncommitted_data().await.unwrap());
    }
}
