//! Plaintext compute path for non-sensitive columns.
//!
//! Mirrors the homomorphic path operation for operation (same fold order,
//! same row-count divisor) so choosing a path is a trust decision, never a
//! semantic one.

use super::executor::{CancelToken, ColumnKernel};
use super::expect_number;
use crate::domain::{ComputePath, Operation, Value};
use crate::CipherpathError;

/// Stateless plaintext kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCompute;

impl ColumnKernel for PlaintextCompute {
    type Partial = f64;

    fn path(&self) -> ComputePath {
        ComputePath::NonSensitive
    }

    fn partial_sum(
        &self,
        column: &str,
        first_row: usize,
        values: &[Value],
        _operation: &Operation,
        cancel: &CancelToken,
    ) -> Result<f64, CipherpathError> {
        if values.is_empty() {
            return Err(CipherpathError::EmptyColumn {
                column: column.to_string(),
            });
        }
        let mut acc = 0.0;
        for (offset, value) in values.iter().enumerate() {
            cancel.check()?;
            acc += expect_number(column, first_row + offset, value)?;
        }
        Ok(acc)
    }

    fn scale(
        &self,
        column: &str,
        first_row: usize,
        values: &[Value],
        factor: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<f64>, CipherpathError> {
        values
            .iter()
            .enumerate()
            .map(|(offset, value)| {
                cancel.check()?;
                Ok(expect_number(column, first_row + offset, value)? * factor)
            })
            .collect()
    }

    fn finish(
        &self,
        column: &str,
        partials: Vec<f64>,
        operation: &Operation,
        total_rows: usize,
    ) -> Result<f64, CipherpathError> {
        if partials.is_empty() || total_rows == 0 {
            return Err(CipherpathError::EmptyColumn {
                column: column.to_string(),
            });
        }
        let sum: f64 = partials.into_iter().sum();
        Ok(match operation {
            Operation::Average | Operation::AverageBroadcast => sum * (1.0 / total_rows as f64),
            _ => sum,
        })
    }
}
