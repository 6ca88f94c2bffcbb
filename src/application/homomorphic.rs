//! Homomorphic compute path for sensitive columns.
//!
//! All arithmetic on sensitive values happens in ciphertext space:
//!
//! - `sum`: encrypt each value, left-fold with `add` in row order within a
//!   shard, then fold shard partials in shard order, decrypt once.
//! - `average`: as `sum`, then `scalar_mul(1 / row_count)` before the single
//!   decrypt. The row count is plaintext.
//! - `multiplication`: per value, encrypt, `scalar_mul(factor)`, decrypt.
//!
//! The fold order is fixed so results are reproducible; fixed-point engines
//! can drift slightly under a different order.
//!
//! Shard partials are moved from the worker that produced them to
//! [`ColumnKernel::finish`], which consumes them within the same pipeline
//! call. They are never serialized or logged.

use std::sync::Arc;

use super::executor::{CancelToken, ColumnKernel};
use super::expect_number;
use crate::domain::{ComputePath, CryptoError, Operation, Value};
use crate::ports::HomomorphicEngine;
use crate::CipherpathError;

/// Sensitive-path kernel over a [`HomomorphicEngine`].
pub struct HomomorphicCompute<E: HomomorphicEngine> {
    engine: Arc<E>,
}

impl<E: HomomorphicEngine> HomomorphicCompute<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    fn engine_error(column: &str, operation: &Operation, source: CryptoError) -> CipherpathError {
        CipherpathError::Engine {
            column: column.to_string(),
            operation: operation.to_string(),
            source,
        }
    }

    /// Encrypt one value.
    ///
    /// # Errors
    /// `Engine` with column and operation context.
    pub fn encrypt_scalar(
        &self,
        column: &str,
        operation: &Operation,
        value: f64,
    ) -> Result<E::Ciphertext, CipherpathError> {
        self.engine
            .encrypt(value)
            .map_err(|e| Self::engine_error(column, operation, e))
    }

    /// Decrypt one value.
    ///
    /// # Errors
    /// `Engine` with column and operation context.
    pub fn decrypt_scalar(
        &self,
        column: &str,
        operation: &Operation,
        ciphertext: &E::Ciphertext,
    ) -> Result<f64, CipherpathError> {
        self.engine
            .decrypt(ciphertext)
            .map_err(|e| Self::engine_error(column, operation, e))
    }

    /// # Errors
    /// `Engine` with column and operation context.
    pub fn homomorphic_add(
        &self,
        column: &str,
        operation: &Operation,
        left: &E::Ciphertext,
        right: &E::Ciphertext,
    ) -> Result<E::Ciphertext, CipherpathError> {
        self.engine
            .add(left, right)
            .map_err(|e| Self::engine_error(column, operation, e))
    }

    /// # Errors
    /// `Engine` with column and operation context.
    pub fn homomorphic_scalar_mul(
        &self,
        column: &str,
        operation: &Operation,
        ciphertext: &E::Ciphertext,
        scalar: f64,
    ) -> Result<E::Ciphertext, CipherpathError> {
        self.engine
            .scalar_mul(ciphertext, scalar)
            .map_err(|e| Self::engine_error(column, operation, e))
    }

    /// Reduce a whole column in one go (single shard).
    #[cfg(test)]
    fn reduce_column(
        &self,
        column: &str,
        values: &[Value],
        operation: &Operation,
    ) -> Result<f64, CipherpathError> {
        if !operation.is_reduction() {
            return Err(CipherpathError::UnsupportedOperation(format!(
                "{operation} is not a reduction"
            )));
        }
        let partial = self.partial_sum(column, 0, values, operation, &CancelToken::new())?;
        self.finish(column, vec![partial], operation, values.len())
    }
}

impl<E: HomomorphicEngine> ColumnKernel for HomomorphicCompute<E> {
    type Partial = E::Ciphertext;

    fn path(&self) -> ComputePath {
        ComputePath::Sensitive
    }

    fn partial_sum(
        &self,
        column: &str,
        first_row: usize,
        values: &[Value],
        operation: &Operation,
        cancel: &CancelToken,
    ) -> Result<E::Ciphertext, CipherpathError> {
        let (first, rest) = values.split_first().ok_or_else(|| CipherpathError::EmptyColumn {
            column: column.to_string(),
        })?;

        cancel.check()?;
        let mut acc =
            self.encrypt_scalar(column, operation, expect_number(column, first_row, first)?)?;
        for (offset, value) in rest.iter().enumerate() {
            cancel.check()?;
            let number = expect_number(column, first_row + offset + 1, value)?;
            let encrypted = self.encrypt_scalar(column, operation, number)?;
            acc = self.homomorphic_add(column, operation, &acc, &encrypted)?;
        }
        tracing::trace!(column, rows = values.len(), "Encrypted shard partial sum");
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
        let operation = Operation::ScaledMultiply(factor);
        values
            .iter()
            .enumerate()
            .map(|(offset, value)| {
                cancel.check()?;
                let number = expect_number(column, first_row + offset, value)?;
                let encrypted = self.encrypt_scalar(column, &operation, number)?;
                let scaled = self.homomorphic_scalar_mul(column, &operation, &encrypted, factor)?;
                self.decrypt_scalar(column, &operation, &scaled)
            })
            .collect()
    }

    fn finish(
        &self,
        column: &str,
        partials: Vec<E::Ciphertext>,
        operation: &Operation,
        total_rows: usize,
    ) -> Result<f64, CipherpathError> {
        let mut partials = partials.into_iter();
        let mut acc = match partials.next() {
            Some(first) if total_rows > 0 => first,
            _ => {
                return Err(CipherpathError::EmptyColumn {
                    column: column.to_string(),
                })
            }
        };
        for partial in partials {
            acc = self.homomorphic_add(column, operation, &acc, &partial)?;
        }

        if matches!(operation, Operation::Average | Operation::AverageBroadcast) {
            acc = self.homomorphic_scalar_mul(column, operation, &acc, 1.0 / total_rows as f64)?;
        }

        let result = self.decrypt_scalar(column, operation, &acc)?;
        tracing::debug!(column, %operation, rows = total_rows, engine = self.engine.name(), "Decrypted column result");
        Ok(result)
    }
}
