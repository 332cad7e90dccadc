//! Stratum Index - a bitemporal, versioned search index engine.
//!
//! Records land in a document store keyed by natural id, every change is
//! kept as a structural diff against the previous version, and a sync pass
//! projects the current (and, on request, historical) state of each record
//! into a search store's bulk-ingest API. Parsing options control how raw
//! data is normalized into indexable fields and are themselves versioned,
//! so a change to parsing behaviour re-derives the search documents without
//! re-ingesting any source data.
#![warn(missing_docs)]

/// Core foundational types: configuration, error handling, application state.
pub mod core;

/// Normalized value model, structural diff/patch, and the record/options types
/// built on top of them.
pub mod model;

/// Geometry parsing and normalization (WKT/GeoJSON) used by the value parser.
pub mod geo;

/// Turns normalized values into the typed, indexable field shapes the search
/// store expects.
pub mod parse;

/// Field-name/type bookkeeping shared between the parser and the catalog
/// queries exposed on [`db::database::Database`].
pub mod fields;

/// Index naming conventions and the streaming planner that turns record
/// history into bulk operations.
pub mod index;

/// Record store and search store collaborator traits, plus their Mongo/Elasticsearch
/// and in-memory implementations.
pub mod store;

/// Advisory locking used to serialize commit/sync against a given database.
pub mod locking;

/// The bulk-write worker pool that drives operations into the search store.
pub mod sync;

/// The `Client`/`Database` facade tying every other module together.
pub mod db;

/// Prometheus metrics for the engine's operations.
pub mod system;

// Re-export commonly used items for convenience
pub use core::error::{Error, Result};
pub use core::config::EngineConfig;
pub use db::client::Client;
pub use db::database::Database;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and the metrics registry. Call once at process startup.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("initializing {} v{}", NAME, VERSION);

    // force the lazily-built registry into existence so registration errors
    // surface at startup rather than on the first request
    let _ = system::metrics::EngineMetrics::global();

    Ok(())
}
