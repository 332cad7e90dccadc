//! Producer/worker-pool bulk writer: chunks a stream of [`BulkOp`]s, fans
//! them out to a bounded number of concurrent workers, and retries
//! transport-level failures with exponential backoff before giving up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::config::SyncConfig;
use crate::core::error::SyncError;
use crate::index::ops::BulkOp;
use crate::store::search_store::SearchStore;
use crate::system::metrics::EngineMetrics;

/// Tuning for one [`SyncDriver`] run, mirroring [`SyncConfig`] but free of
/// the rest of the engine's configuration tree.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// documents per bulk chunk
    pub chunk_size: usize,
    /// number of concurrent worker tasks draining the chunk queue
    pub worker_count: usize,
    /// number of chunks the producer may queue up before blocking
    pub buffer_multiplier: usize,
    /// retries for a chunk that fails with a transport-level error
    pub max_retries: u32,
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        SyncOptions {
            chunk_size: config.chunk_size,
            worker_count: config.worker_count.max(1),
            buffer_multiplier: config.buffer_multiplier.max(1),
            max_retries: config.max_retries,
        }
    }
}

impl SyncOptions {
    /// How many chunks the bounded channel between producer and workers may hold.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count * self.buffer_multiplier
    }
}

/// Tally of what a [`SyncDriver::run`] call actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// documents written as `index` ops
    pub indexed: u64,
    /// documents written as `delete` ops
    pub deleted: u64,
    /// `indexed + deleted`
    pub total: u64,
}

/// Drives bulk writes against a [`SearchStore`] with bounded concurrency.
pub struct SyncDriver {
    store: Arc<dyn SearchStore>,
    options: SyncOptions,
}

impl SyncDriver {
    /// Build a driver over `store` with the given tuning.
    pub fn new(store: Arc<dyn SearchStore>, options: SyncOptions) -> Self {
        SyncDriver { store, options }
    }

    /// Put every index this run will touch into "bulk sync" mode, then run
    /// `ops` through the worker pool. Settings are restored and the indices
    /// refreshed only if the run succeeds, making every write visible
    /// atomically; a failed run leaves indices in "no refresh, 0 replicas"
    /// mode so partially-written docs stay invisible until a later
    /// successful sync resets things (spec.md §4.7's visibility discipline).
    pub async fn run_for_indices<I>(
        &self,
        indices: &[String],
        ops: I,
    ) -> Result<WriteResult, SyncError>
    where
        I: IntoIterator<Item = BulkOp> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        for index in indices {
            self.store
                .set_sync_settings(index, true)
                .await
                .map_err(|e| SyncError::ChunkFailed { retries: 0, reason: e.to_string() })?;
        }

        let result = self.run(ops).await;

        // Visibility discipline (spec.md §4.7): only a clean run restores
        // settings and refreshes, making every write visible atomically. A
        // failed run leaves indices in "no refresh, 0 replicas" state so
        // partially-written docs stay invisible until a later successful
        // sync resets things - we must not paper over that here.
        if result.is_ok() {
            for index in indices {
                if let Err(e) = self.store.set_sync_settings(index, false).await {
                    tracing::warn!(error = %e, index, "failed to restore search store settings after sync");
                }
                if let Err(e) = self.store.refresh(index).await {
                    tracing::warn!(error = %e, index, "failed to refresh index after sync");
                }
            }
        }

        result
    }

    /// Run `ops` through the worker pool without touching index settings.
    /// Exposed directly for callers (and tests) that manage settings themselves.
    pub async fn run<I>(&self, ops: I) -> Result<WriteResult, SyncError>
    where
        I: IntoIterator<Item = BulkOp> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        let chunk_size = self.options.chunk_size.max(1);
        let (tx, rx) = mpsc::channel::<Vec<BulkOp>>(self.options.queue_capacity());

        let producer = tokio::spawn(async move {
            let mut iter = ops.into_iter();
            loop {
                let chunk: Vec<BulkOp> = (&mut iter).take(chunk_size).collect();
                if chunk.is_empty() {
                    break;
                }
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let indexed = Arc::new(AtomicU64::new(0));
        let deleted = Arc::new(AtomicU64::new(0));
        let first_error: Arc<tokio::sync::Mutex<Option<SyncError>>> =
            Arc::new(tokio::sync::Mutex::new(None));

        let mut workers = Vec::with_capacity(self.options.worker_count);
        for _ in 0..self.options.worker_count {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&self.store);
            let indexed = Arc::clone(&indexed);
            let deleted = Arc::clone(&deleted);
            let first_error = Arc::clone(&first_error);
            let max_retries = self.options.max_retries;

            workers.push(tokio::spawn(async move {
                loop {
                    let chunk = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(chunk) = chunk else { break };

                    match write_chunk_with_retry(store.as_ref(), &chunk, max_retries).await {
                        Ok(()) => {
                            for op in &chunk {
                                match op {
                                    BulkOp::Index { .. } => {
                                        indexed.fetch_add(1, Ordering::Relaxed);
                                        EngineMetrics::global().sync.docs_indexed.inc();
                                    }
                                    BulkOp::Delete { .. } => {
                                        deleted.fetch_add(1, Ordering::Relaxed);
                                        EngineMetrics::global().sync.docs_deleted.inc();
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            EngineMetrics::global().sync.bulk_failures.inc();
                            let mut slot = first_error.lock().await;
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            break;
                        }
                    }
                }
            }));
        }

        producer.await.map_err(|_| SyncError::ChannelClosed)?;
        for worker in workers {
            worker.await.map_err(|_| SyncError::ChannelClosed)?;
        }

        // every worker clone of `first_error` has been dropped by now, so
        // this lock is always immediately available
        let error = first_error.try_lock().ok().and_then(|mut guard| guard.take());
        if let Some(error) = error {
            return Err(error);
        }

        let indexed = indexed.load(Ordering::Relaxed);
        let deleted = deleted.load(Ordering::Relaxed);
        Ok(WriteResult {
            indexed,
            deleted,
            total: indexed + deleted,
        })
    }
}

async fn write_chunk_with_retry<S: SearchStore + ?Sized>(
    store: &S,
    chunk: &[BulkOp],
    max_retries: u32,
) -> Result<(), SyncError> {
    let mut attempt = 0;
    loop {
        match store.bulk(chunk).await {
            Ok(response) if response.has_errors => {
                let reason = response
                    .errors
                    .first()
                    .map(|e| e.reason.clone())
                    .unwrap_or_else(|| "bulk request reported item-level errors".to_string());
                return Err(SyncError::ChunkFailed { retries: attempt, reason });
            }
            Ok(_) => return Ok(()),
            Err(e) if attempt < max_retries => {
                EngineMetrics::global().sync.bulk_retries.inc();
                let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                tracing::warn!(attempt, error = %e, "bulk chunk failed, retrying after backoff");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(SyncError::ChunkFailed { retries: attempt, reason: e.to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::search_store::InMemorySearchStore;

    fn options() -> SyncOptions {
        SyncOptions {
            chunk_size: 2,
            worker_count: 2,
            buffer_multiplier: 2,
            max_retries: 3,
        }
    }

    fn index_op(id: &str) -> BulkOp {
        BulkOp::Index {
            index: "data-demo-latest".to_string(),
            doc_id: Some(id.to_string()),
            document: serde_json::json!({"id": id}),
        }
    }

    #[tokio::test]
    async fn run_writes_every_op_and_tallies_counts() {
        let store = Arc::new(InMemorySearchStore::new());
        let driver = SyncDriver::new(Arc::clone(&store), options());

        let ops: Vec<BulkOp> = (0..9).map(|i| index_op(&i.to_string())).collect();
        let result = driver.run(ops).await.unwrap();

        assert_eq!(result.indexed, 9);
        assert_eq!(result.deleted, 0);
        assert_eq!(result.total, 9);
        assert_eq!(store.documents("data-demo-latest").len(), 9);
    }

    #[tokio::test]
    async fn run_for_indices_toggles_sync_settings_around_the_write() {
        let store = Arc::new(InMemorySearchStore::new());
        store.ensure_index_exists("data-demo-latest").await.unwrap();
        let driver = SyncDriver::new(Arc::clone(&store), options());

        let ops = vec![index_op("r1"), index_op("r2")];
        let result = driver
            .run_for_indices(&["data-demo-latest".to_string()], ops)
            .await
            .unwrap();
        assert_eq!(result.total, 2);
    }

    #[tokio::test]
    async fn empty_input_produces_a_zero_result() {
        let store = Arc::new(InMemorySearchStore::new());
        let driver = SyncDriver::new(store, options());
        let result = driver.run(Vec::<BulkOp>::new()).await.unwrap();
        assert_eq!(result, WriteResult::default());
    }
}
