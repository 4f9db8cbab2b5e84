//! Dataset persistence for the distance-squared tools.
//!
//! A dataset record holds a set of equal-length vectors together with the
//! outcome of an outlier search over them. Records are stored as a flat
//! sequence of native-endian machine words and doubles with no header, so
//! files are only portable between hosts with the same byte order.

/// Dataset record layout, writer and `nom` parser.
pub mod record;

pub use record::{DatasetRecord, RecordError};
