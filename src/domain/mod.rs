//! Domain layer: core data types.
//!
//! Pure Rust types with no engine or transport dependencies. All shape
//! validation happens here so later stages never see malformed input.

pub mod classification;
mod crypto;
mod operation;
mod result;
mod table;
pub mod wire;

pub use classification::{
    classify, ColumnClassification, ColumnKind, ComputePath, UnknownColumnPolicy,
};
pub use crypto::{fingerprint, CryptoError};
pub use operation::{Operation, OutputShape, DEFAULT_SCALE_FACTOR};
pub use result::{ColumnOrder, PathFragment, ResultTable, ShardFragment};
pub use table::{Column, Table, Value};
