//! Chunked parallel executor.
//!
//! Splits a table into contiguous row shards and runs one worker thread per
//! shard. Workers report `(shard_index, result)` over a channel; completion
//! order is arbitrary and results are put back in shard order before anything
//! is combined.
//!
//! # Cancellation
//!
//! The first failing shard trips the shared [`CancelToken`]. Other workers
//! (on this path and, when the token is shared, on the other path) stop at
//! their next value boundary and report `Cancelled`, which is never surfaced
//! as the root cause.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use super::recombine::concat_shards;
use crate::domain::{Column, ComputePath, Operation, OutputShape, PathFragment, ShardFragment, Table, Value};
use crate::CipherpathError;

/// Cooperative cancellation flag shared by the workers of one request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// # Errors
    /// Returns `Cancelled` once the token has been tripped.
    pub fn check(&self) -> Result<(), CipherpathError> {
        if self.is_cancelled() {
            Err(CipherpathError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A contiguous row range assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    pub index: usize,
    pub rows: Range<usize>,
}

/// Split `row_count` rows into at most `workers` contiguous shards of
/// `ceil(row_count / workers)` rows. The last shard may be shorter; no shard
/// is empty.
#[must_use]
pub fn plan_shards(row_count: usize, workers: usize) -> Vec<ShardPlan> {
    if row_count == 0 {
        return Vec::new();
    }
    let chunk = row_count.div_ceil(workers.max(1));
    (0..row_count)
        .step_by(chunk)
        .enumerate()
        .map(|(index, start)| ShardPlan {
            index,
            rows: start..(start + chunk).min(row_count),
        })
        .collect()
}

/// Per-column arithmetic of one compute path.
///
/// Reductions are split in two: `partial_sum` runs inside a worker over one
/// shard, `finish` folds the partials of every shard (in shard order) into
/// the final scalar.
pub trait ColumnKernel: Send + Sync {
    /// Shard-level accumulator.
    type Partial: Send;

    fn path(&self) -> ComputePath;

    /// Sum of one shard's values of `column`. `first_row` is the table row of
    /// `values[0]`, used for error context.
    ///
    /// # Errors
    /// `TypeMismatch`, `Engine` or `Cancelled`.
    fn partial_sum(
        &self,
        column: &str,
        first_row: usize,
        values: &[Value],
        operation: &Operation,
        cancel: &CancelToken,
    ) -> Result<Self::Partial, CipherpathError>;

    /// Element-wise product of one shard's values with `factor`.
    ///
    /// # Errors
    /// `TypeMismatch`, `Engine` or `Cancelled`.
    fn scale(
        &self,
        column: &str,
        first_row: usize,
        values: &[Value],
        factor: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<f64>, CipherpathError>;

    /// Fold shard partials (ascending shard order) into the column result.
    /// `total_rows` is the plaintext row count used by averages.
    ///
    /// # Errors
    /// `EmptyColumn` or `Engine`.
    fn finish(
        &self,
        column: &str,
        partials: Vec<Self::Partial>,
        operation: &Operation,
        total_rows: usize,
    ) -> Result<f64, CipherpathError>;
}

enum ColumnOutput<P> {
    Partial(P),
    Elements(Vec<Value>),
}

struct ShardOutput<P> {
    plan: ShardPlan,
    columns: Vec<(String, ColumnOutput<P>)>,
}

/// Fan-out executor with a fixed worker bound.
#[derive(Debug, Clone)]
pub struct ChunkedExecutor {
    workers: usize,
}

impl ChunkedExecutor {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `operation` over `columns` of `table` on `kernel`'s path.
    ///
    /// A path with no columns returns an empty fragment without spawning
    /// workers.
    ///
    /// # Errors
    /// `WorkerFailure` naming the lowest failing shard, `EmptyColumn` for a
    /// reduction over zero rows, `Cancelled` if another path failed first, or
    /// `Recombination` if shard outputs do not line up.
    pub fn execute<K: ColumnKernel>(
        &self,
        kernel: &K,
        table: &Table,
        columns: &[String],
        operation: &Operation,
        cancel: &CancelToken,
    ) -> Result<PathFragment, CipherpathError> {
        let path = kernel.path();
        if columns.is_empty() {
            tracing::debug!(%path, "No numeric columns; skipping workers");
            return Ok(PathFragment::empty(path));
        }

        let total_rows = table.row_count();
        if total_rows == 0 {
            if operation.is_reduction() {
                return Err(CipherpathError::EmptyColumn {
                    column: columns[0].clone(),
                });
            }
            return Ok(PathFragment {
                path,
                columns: columns.iter().map(|c| Column::new(c.clone(), Vec::new())).collect(),
            });
        }

        let plans = plan_shards(total_rows, self.workers);
        tracing::debug!(
            %path,
            shards = plans.len(),
            columns = columns.len(),
            rows = total_rows,
            "Dispatching shards"
        );

        let outputs = run_shards(kernel, table, columns, operation, cancel, plans)?;

        if operation.is_reduction() {
            assemble_reduction(kernel, columns, operation, total_rows, outputs)
        } else {
            let fragments = outputs
                .into_iter()
                .map(|out| ShardFragment {
                    index: out.plan.index,
                    rows: out.plan.rows,
                    columns: out
                        .columns
                        .into_iter()
                        .map(|(name, output)| match output {
                            ColumnOutput::Elements(values) => Column::new(name, values),
                            ColumnOutput::Partial(_) => Column::new(name, Vec::new()),
                        })
                        .collect(),
                })
                .collect();
            concat_shards(path, fragments, total_rows)
        }
    }
}

fn run_shards<K: ColumnKernel>(
    kernel: &K,
    table: &Table,
    columns: &[String],
    operation: &Operation,
    cancel: &CancelToken,
    plans: Vec<ShardPlan>,
) -> Result<Vec<ShardOutput<K::Partial>>, CipherpathError> {
    let path = kernel.path();
    let shard_count = plans.len();
    let ranges: Vec<Range<usize>> = plans.iter().map(|p| p.rows.clone()).collect();

    let (slots, mut failures) = thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();

        let handles: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let tx = tx.clone();
                scope.spawn(move || {
                    let index = plan.index;
                    let result = process_shard(kernel, table, columns, operation, cancel, plan);
                    let _ = tx.send((index, result));
                })
            })
            .collect();
        drop(tx);

        let mut slots: Vec<Option<ShardOutput<K::Partial>>> =
            (0..shard_count).map(|_| None).collect();
        let mut failures: Vec<(usize, CipherpathError)> = Vec::new();

        for (index, result) in rx {
            match result {
                Ok(output) => slots[index] = Some(output),
                Err(e) => {
                    if !e.is_cancellation() {
                        tracing::warn!(%path, shard = index, error = %e, "Shard failed; cancelling");
                    }
                    cancel.cancel();
                    failures.push((index, e));
                }
            }
        }

        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                tracing::error!(%path, shard = index, "Worker panicked");
                cancel.cancel();
                failures.push((index, CipherpathError::WorkerPanicked));
            }
        }

        (slots, failures)
    });

    if !failures.is_empty() {
        failures.sort_by_key(|(index, _)| *index);
        let root = failures.iter().position(|(_, e)| !e.is_cancellation());
        return match root {
            Some(pos) => {
                let (shard, source) = failures.swap_remove(pos);
                let rows = &ranges[shard];
                Err(CipherpathError::WorkerFailure {
                    path,
                    shard,
                    start: rows.start,
                    end: rows.end,
                    source: Box::new(source),
                })
            }
            None => Err(CipherpathError::Cancelled),
        };
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                CipherpathError::Recombination(format!("{path} shard {index} produced no output"))
            })
        })
        .collect()
}

fn process_shard<K: ColumnKernel>(
    kernel: &K,
    table: &Table,
    columns: &[String],
    operation: &Operation,
    cancel: &CancelToken,
    plan: ShardPlan,
) -> Result<ShardOutput<K::Partial>, CipherpathError> {
    let mut outputs = Vec::with_capacity(columns.len());
    for column in columns {
        cancel.check()?;
        let values = table.slice(column, plan.rows.clone())?;
        let output = match operation {
            Operation::ScaledMultiply(factor) => ColumnOutput::Elements(
                kernel
                    .scale(column, plan.rows.start, values, *factor, cancel)?
                    .into_iter()
                    .map(Value::Number)
                    .collect(),
            ),
            _ => ColumnOutput::Partial(kernel.partial_sum(
                column,
                plan.rows.start,
                values,
                operation,
                cancel,
            )?),
        };
        outputs.push((column.clone(), output));
    }

    tracing::debug!(
        path = %kernel.path(),
        shard = plan.index,
        rows = plan.rows.len(),
        "Shard complete"
    );
    Ok(ShardOutput {
        plan,
        columns: outputs,
    })
}

fn assemble_reduction<K: ColumnKernel>(
    kernel: &K,
    columns: &[String],
    operation: &Operation,
    total_rows: usize,
    outputs: Vec<ShardOutput<K::Partial>>,
) -> Result<PathFragment, CipherpathError> {
    // Transpose shard-major outputs into column-major partial lists, keeping
    // shard order within each column.
    let mut per_column: Vec<Vec<K::Partial>> = columns.iter().map(|_| Vec::new()).collect();
    for shard in outputs {
        for (slot, (_, output)) in per_column.iter_mut().zip(shard.columns) {
            if let ColumnOutput::Partial(partial) = output {
                slot.push(partial);
            }
        }
    }

    let mut result = Vec::with_capacity(columns.len());
    for (column, partials) in columns.iter().zip(per_column) {
        let scalar = kernel.finish(column, partials, operation, total_rows)?;
        let values = match operation.shape() {
            OutputShape::Reduced => vec![Value::Number(scalar)],
            OutputShape::PerRow => vec![Value::Number(scalar); total_rows],
        };
        result.push(Column::new(column.clone(), values));
    }

    Ok(PathFragment {
        path: kernel.path(),
        columns: result,
    })
}
