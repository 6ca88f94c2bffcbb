//! Pipeline entry point: classify, run both paths, recombine.

use std::sync::Arc;
use std::thread;

use super::executor::{CancelToken, ChunkedExecutor, ColumnKernel};
use super::homomorphic::HomomorphicCompute;
use super::plaintext::PlaintextCompute;
use super::recombine::{recombine, RecombineSpec};
use crate::config::PipelineConfig;
use crate::domain::{
    classify, Column, ColumnClassification, ComputePath, Operation, OutputShape, PathFragment,
    ResultTable, Table, UnknownColumnPolicy, Value,
};
use crate::ports::HomomorphicEngine;
use crate::CipherpathError;

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub table: Table,
    pub sensitive_columns: Vec<String>,
    pub operation: Operation,
}

/// Validate a request before any compute work and classify its columns.
///
/// # Errors
/// `InvalidInput`, `TypeMismatch`, or `EmptyColumn` for a reduction over a
/// numeric column with zero rows.
pub(crate) fn prepare(
    table: &Table,
    sensitive_columns: &[String],
    operation: &Operation,
    policy: UnknownColumnPolicy,
) -> Result<ColumnClassification, CipherpathError> {
    operation.validate()?;
    let classification = classify(table, sensitive_columns, policy)?;

    if operation.is_reduction() && table.row_count() == 0 {
        let numeric = classification
            .numeric_columns(ComputePath::NonSensitive)
            .into_iter()
            .chain(classification.numeric_columns(ComputePath::Sensitive))
            .next();
        if let Some(column) = numeric {
            return Err(CipherpathError::EmptyColumn { column });
        }
    }
    Ok(classification)
}

/// Run one path: numeric columns through `kernel`, pass-through columns
/// copied (per-row operations) or nulled (reductions).
pub(crate) fn compute_path<K: ColumnKernel>(
    executor: &ChunkedExecutor,
    kernel: &K,
    table: &Table,
    classification: &ColumnClassification,
    operation: &Operation,
    cancel: &CancelToken,
) -> Result<PathFragment, CipherpathError> {
    let path = kernel.path();
    let numeric = classification.numeric_columns(path);
    let mut fragment = executor.execute(kernel, table, &numeric, operation, cancel)?;

    for name in classification.passthrough_columns(path) {
        let values = match operation.shape() {
            OutputShape::PerRow => table
                .column(&name)
                .map(|c| c.values.clone())
                .unwrap_or_default(),
            OutputShape::Reduced => vec![Value::Null],
        };
        fragment.columns.push(Column::new(name, values));
    }
    Ok(fragment)
}

/// Dual-path pipeline over one homomorphic engine.
pub struct Pipeline<E: HomomorphicEngine> {
    homomorphic: HomomorphicCompute<E>,
    executor: ChunkedExecutor,
    config: PipelineConfig,
}

impl<E: HomomorphicEngine> Pipeline<E> {
    pub fn new(engine: Arc<E>, config: PipelineConfig) -> Self {
        Self {
            homomorphic: HomomorphicCompute::new(engine),
            executor: ChunkedExecutor::new(config.workers),
            config,
        }
    }

    /// Run the request end to end.
    ///
    /// Both paths run concurrently and share one cancellation token; the
    /// first failure on either path stops the other. No partial table is
    /// ever returned.
    ///
    /// # Errors
    /// Validation errors before any engine call; `WorkerFailure`, `Engine`
    /// or `Recombination` afterwards.
    pub fn run(&self, request: &PipelineRequest) -> Result<ResultTable, CipherpathError> {
        let PipelineRequest {
            table,
            sensitive_columns,
            operation,
        } = request;

        let classification = prepare(table, sensitive_columns, operation, self.config.unknown_columns)?;
        tracing::info!(
            %operation,
            rows = table.row_count(),
            sensitive = classification.sensitive().len(),
            non_sensitive = classification.non_sensitive().len(),
            workers = self.executor.workers(),
            "Running dual-path pipeline"
        );

        let cancel = CancelToken::new();
        let (plain, secret) = thread::scope(|scope| {
            let sensitive = scope.spawn(|| {
                let result = compute_path(
                    &self.executor,
                    &self.homomorphic,
                    table,
                    &classification,
                    operation,
                    &cancel,
                );
                if result.is_err() {
                    cancel.cancel();
                }
                result
            });

            let plain = compute_path(
                &self.executor,
                &PlaintextCompute,
                table,
                &classification,
                operation,
                &cancel,
            );
            if plain.is_err() {
                cancel.cancel();
            }

            let secret = sensitive.join().unwrap_or(Err(CipherpathError::WorkerPanicked));
            (plain, secret)
        });

        let (plain, secret) = match (plain, secret) {
            (Ok(plain), Ok(secret)) => (plain, secret),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
            (Err(p), Err(s)) => {
                // The cancellation is a consequence; report the root cause.
                return Err(if s.is_cancellation() { p } else { s });
            }
        };

        let columns = table.column_names();
        let result = recombine(
            &RecombineSpec {
                columns: &columns,
                operation: *operation,
                input_rows: table.row_count(),
                order: self.config.column_order,
            },
            plain,
            secret,
        )?;

        tracing::info!(
            columns = result.column_names().len(),
            rows = result.row_count(),
            "Pipeline complete"
        );
        Ok(result)
    }
}
