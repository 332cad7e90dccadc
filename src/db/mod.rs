//! The top-level facade: [`client::Client`] holds the collaborator handles
//! shared across every database, and [`database::Database`] is the
//! per-database API (commit, ingest, sync, search) everything else in this
//! crate exists to support.

pub mod client;
pub mod database;

pub use client::Client;
pub use database::Database;
