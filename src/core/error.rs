//! Error types for the search index engine
//!
//! This module defines all error types used throughout the system, split by
//! subsystem the way the rest of the crate is organised.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Normalization errors (record data cannot be turned into a `Value`)
    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    /// Diff computation errors
    #[error("diff error: {0}")]
    Diff(#[from] DiffError),

    /// Patch application errors
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    /// Geo recognition errors
    #[error("geo error: {0}")]
    Geo(#[from] GeoError),

    /// Value parsing errors
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Index-operation planner errors
    #[error("planner error: {0}")]
    Planner(#[from] PlannerError),

    /// Sync driver errors
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Record store collaborator errors
    #[error("record store error: {0}")]
    RecordStore(#[from] RecordStoreError),

    /// Search store collaborator errors
    #[error("search store error: {0}")]
    SearchStore(#[from] SearchStoreError),

    /// Advisory locking errors
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input supplied by a caller
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors raised while normalizing raw record data into [`crate::model::value::Value`]
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// A map key was not a string (JSON object keys always are, but other
    /// sources of record data may not guarantee this)
    #[error("map key is not a string")]
    NonStringKey,

    /// A value of a type the normalizer does not understand was encountered
    #[error("unsupported value type: {0}")]
    UnsupportedType(String),
}

/// Errors raised while computing a diff between two normalized values
#[derive(Error, Debug)]
pub enum DiffError {
    /// The two values being diffed were not both maps at the root
    #[error("diff root must be a dict")]
    NonDictRoot,
}

/// Errors raised while applying a diff to a base value
#[derive(Error, Debug)]
pub enum PatchError {
    /// A path named in the diff does not exist in the base value
    #[error("path does not exist in base: {0}")]
    MissingPath(String),

    /// A diff op's shape did not match the value found at its path
    #[error("op does not match value at path {path}: {reason}")]
    Mismatch {
        /// dotted path the op applies to
        path: String,
        /// human-readable explanation
        reason: String,
    },

    /// The diff ops array was malformed (wrong arity, unknown op kind, etc)
    #[error("malformed diff op: {0}")]
    Malformed(String),
}

/// Errors raised while recognising geometry in a value
#[derive(Error, Debug)]
pub enum GeoError {
    /// WKT text failed to parse
    #[error("invalid WKT: {0}")]
    InvalidWkt(String),

    /// GeoJSON failed to parse or used an unsupported geometry type
    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// A polygon or linestring had an invalid or self-intersecting shape
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A polygon ring had the wrong winding order
    #[error("invalid winding order: {0}")]
    InvalidWinding(String),

    /// A lat/lon/radius hint's values failed validation
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// Errors raised while parsing a normalized value against parsing options
#[derive(Error, Debug)]
pub enum ParseError {
    /// The value memoization cache could not be locked or was poisoned
    #[error("memoization cache error: {0}")]
    Cache(String),
}

/// Errors raised by the index-operation planner
#[derive(Error, Debug)]
pub enum PlannerError {
    /// Data and options version streams disagreed in a way the state
    /// machine cannot reconcile
    #[error("version stream desynchronised: {0}")]
    Desync(String),

    /// The archive rotation counter could not be read or persisted
    #[error("archive counter error: {0}")]
    ArchiveCounter(String),
}

/// Errors raised by the sync driver
#[derive(Error, Debug)]
pub enum SyncError {
    /// A bulk chunk failed after exhausting its retry budget
    #[error("bulk chunk failed after {retries} retries: {reason}")]
    ChunkFailed {
        /// number of retries attempted
        retries: u32,
        /// underlying failure reason
        reason: String,
    },

    /// The worker pool's channel was closed unexpectedly
    #[error("worker channel closed")]
    ChannelClosed,
}

/// Errors raised by the record store collaborator
#[derive(Error, Debug)]
pub enum RecordStoreError {
    /// The underlying driver reported a failure
    #[error("driver error: {0}")]
    Driver(String),

    /// A document failed to (de)serialize to/from BSON
    #[error("bson error: {0}")]
    Bson(String),
}

/// Errors raised by the search store collaborator
#[derive(Error, Debug)]
pub enum SearchStoreError {
    /// The HTTP transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// The store returned a non-success response
    #[error("store responded with error: status={status} body={body}")]
    Response {
        /// HTTP-ish status code
        status: u16,
        /// response body, truncated
        body: String,
    },
}

/// Errors raised by the advisory locker
#[derive(Error, Debug)]
pub enum LockError {
    /// The requested lock is already held
    #[error("lock already held: {0}")]
    AlreadyLocked(String),

    /// The lock could not be released because it was not held
    #[error("lock not held: {0}")]
    NotHeld(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SearchStore(SearchStoreError::Transport(_))
                | Error::SearchStore(SearchStoreError::Response { status: 429..=599, .. })
        )
    }
}
