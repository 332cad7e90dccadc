//! Prometheus metrics for the engine's operations.
//!
//! One registry, grouped the way the rest of the crate is grouped: ingest
//! (normalize/diff), commit/sync orchestration, and locking. These are
//! counters an operator would actually want on a dashboard, not a metric
//! per internal function call.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_histogram, register_int_counter, register_int_gauge, Counter,
    Histogram, IntCounter, IntGauge, Registry,
};

use crate::core::error::Result;

/// Global metrics registry, gathered by the admin binary's `/metrics` route.
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Ingest-path counters: records and diffs flowing into the record store.
pub struct IngestMetrics {
    /// records passed to `ingest`, before no-op detection
    pub records_ingested: IntCounter,
    /// records inserted as brand new
    pub records_inserted: IntCounter,
    /// records updated with a new diff
    pub records_updated: IntCounter,
    /// incoming records dropped as no-ops (unchanged data, or `modified_field`-only changes)
    pub records_noop: IntCounter,
    /// diff operations computed across all ingests
    pub diffs_computed: IntCounter,
}

/// Commit/sync orchestration counters.
pub struct SyncMetrics {
    /// successful `commit()` calls that assigned a new version
    pub commits: IntCounter,
    /// `commit()` calls that found nothing staged
    pub commits_noop: IntCounter,
    /// documents written to the search store as `index` ops
    pub docs_indexed: IntCounter,
    /// documents written to the search store as `delete` ops
    pub docs_deleted: IntCounter,
    /// bulk chunk retries due to transport timeouts
    pub bulk_retries: IntCounter,
    /// bulk chunks that failed after exhausting retries
    pub bulk_failures: IntCounter,
    /// time spent in a single `sync()` call
    pub sync_duration: Histogram,
}

/// Advisory-locking counters.
pub struct LockMetrics {
    /// successful lock acquisitions
    pub acquired: IntCounter,
    /// acquisitions that failed because the lock was already held
    pub contended: IntCounter,
    /// currently held locks, sampled at acquire/release time
    pub held: IntGauge,
}

/// Per-value parse cache counters, sampled from the LRU in [`crate::parse`].
pub struct ParseCacheMetrics {
    /// cache hits across all `parse_value` calls
    pub hits: IntCounter,
    /// cache misses across all `parse_value` calls
    pub misses: IntCounter,
    /// approximate hit ratio, updated after every batch of parses
    pub hit_ratio: Counter,
}

/// Top-level metrics handle, one per process.
pub struct EngineMetrics {
    /// ingest-path counters
    pub ingest: IngestMetrics,
    /// sync/commit orchestration counters
    pub sync: SyncMetrics,
    /// advisory locking counters
    pub lock: LockMetrics,
    /// value-parser memoization counters
    pub parse_cache: ParseCacheMetrics,
}

impl EngineMetrics {
    /// Build a fresh set of metrics, registering every counter with the
    /// global registry. Only ever call this once per process; use
    /// [`EngineMetrics::global`] to get a shared handle instead.
    pub fn new() -> Result<Self> {
        Ok(Self {
            ingest: IngestMetrics::new()?,
            sync: SyncMetrics::new()?,
            lock: LockMetrics::new()?,
            parse_cache: ParseCacheMetrics::new()?,
        })
    }

    /// The process-wide metrics instance.
    pub fn global() -> &'static EngineMetrics {
        static INSTANCE: Lazy<EngineMetrics> =
            Lazy::new(|| EngineMetrics::new().expect("failed to initialize engine metrics"));
        &INSTANCE
    }

    /// Render the registry in Prometheus text exposition format, for the
    /// admin binary's `/metrics` route.
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = REGISTRY.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .expect("prometheus text encoding is infallible for our metric types");
        String::from_utf8(buf).expect("prometheus text output is always valid UTF-8")
    }
}

impl IngestMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            records_ingested: register_int_counter!(
                "stratum_records_ingested_total",
                "Total number of records passed to ingest"
            )?,
            records_inserted: register_int_counter!(
                "stratum_records_inserted_total",
                "Total number of brand new records inserted"
            )?,
            records_updated: register_int_counter!(
                "stratum_records_updated_total",
                "Total number of existing records updated with a new diff"
            )?,
            records_noop: register_int_counter!(
                "stratum_records_noop_total",
                "Total number of incoming records dropped as no-ops"
            )?,
            diffs_computed: register_int_counter!(
                "stratum_diffs_computed_total",
                "Total number of diff operations computed during ingest"
            )?,
        })
    }
}

impl SyncMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            commits: register_int_counter!(
                "stratum_commits_total",
                "Total number of commits that assigned a new version"
            )?,
            commits_noop: register_int_counter!(
                "stratum_commits_noop_total",
                "Total number of commit calls with nothing staged"
            )?,
            docs_indexed: register_int_counter!(
                "stratum_docs_indexed_total",
                "Total number of documents written to the search store as index ops"
            )?,
            docs_deleted: register_int_counter!(
                "stratum_docs_deleted_total",
                "Total number of documents removed from the search store"
            )?,
            bulk_retries: register_int_counter!(
                "stratum_bulk_retries_total",
                "Total number of bulk chunk retries due to transport timeouts"
            )?,
            bulk_failures: register_int_counter!(
                "stratum_bulk_failures_total",
                "Total number of bulk chunks that failed after exhausting retries"
            )?,
            sync_duration: register_histogram!(
                "stratum_sync_duration_seconds",
                "Duration of sync() calls in seconds",
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
            )?,
        })
    }
}

impl LockMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            acquired: register_int_counter!(
                "stratum_locks_acquired_total",
                "Total number of advisory locks acquired"
            )?,
            contended: register_int_counter!(
                "stratum_locks_contended_total",
                "Total number of lock acquisitions that failed because the lock was held"
            )?,
            held: register_int_gauge!(
                "stratum_locks_held",
                "Number of advisory locks currently held"
            )?,
        })
    }
}

impl ParseCacheMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            hits: register_int_counter!(
                "stratum_parse_cache_hits_total",
                "Total number of per-value parse cache hits"
            )?,
            misses: register_int_counter!(
                "stratum_parse_cache_misses_total",
                "Total number of per-value parse cache misses"
            )?,
            hit_ratio: register_counter!(
                "stratum_parse_cache_hit_ratio",
                "Approximate per-value parse cache hit ratio, sampled periodically"
            )?,
        })
    }
}
