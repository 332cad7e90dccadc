//! The data model shared by every subsystem: normalized values, diff
//! operations, records, and parsing options.

/// The normalized value type
pub mod value;
/// Structural diff/patch
pub mod diff;
/// Records and the version iterator
pub mod record;
/// Parsing options and their builder
pub mod options;

pub use diff::{diff as diff_values, patch as patch_value, DiffOp, DiffOps, PathSegment};
pub use options::{GeoFieldHint, ParsingOptions, ParsingOptionsBuilder};
pub use record::{Record, StoredRecord, VersionedData};
pub use value::Value;
