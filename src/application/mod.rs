//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the dual-path pipeline, its remote gateway, and the two compute services.

mod endpoint;
mod executor;
mod gateway;
mod homomorphic;
mod pipeline;
mod plaintext;
mod recombine;

pub use endpoint::{NonSensitiveService, SensitiveService};
pub use executor::{plan_shards, CancelToken, ChunkedExecutor, ColumnKernel, ShardPlan};
pub use gateway::{Gateway, GatewayRun, GatewayState};
pub use homomorphic::HomomorphicCompute;
pub use pipeline::{Pipeline, PipelineRequest};
pub use plaintext::PlaintextCompute;
pub use recombine::{concat_shards, recombine, RecombineSpec};

use crate::domain::Value;
use crate::CipherpathError;

/// Numeric value of a cell that must be a number.
pub(crate) fn expect_number(column: &str, row: usize, value: &Value) -> Result<f64, CipherpathError> {
    value.as_number().ok_or_else(|| CipherpathError::TypeMismatch {
        column: column.to_string(),
        row,
        found: value.kind_name(),
    })
}
