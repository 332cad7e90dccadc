//! Concurrent bulk-write driver that takes a stream of [`BulkOp`]s and
//! pushes them into the search store in chunks, with bounded concurrency and
//! retry-with-backoff on transport failures

pub mod driver;

pub use driver::{SyncDriver, SyncOptions, WriteResult};
