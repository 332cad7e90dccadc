//! The index-operation planner: turns a record's stored diff chain into a
//! stream of bulk operations that bring a search store's indices up to
//! date, including rotation of the non-latest data across archive indices.

/// Index naming scheme (`data-{name}-latest`, `data-{name}-arc-{n}`, ...)
pub mod names;
/// Bulk operation types and their wire serialization
pub mod ops;
/// The streaming planner itself
pub mod planner;
/// The search store index template (settings + mappings)
pub mod template;

pub use names::{ArcStatus, IndexNames};
pub use ops::BulkOp;
pub use planner::generate_index_ops;
