//! Result recombiner.
//!
//! Two stages:
//! 1. [`concat_shards`] stitches one path's shard outputs back together in
//!    ascending shard index, restoring row order whatever the completion order.
//! 2. [`recombine`] merges the non-sensitive and sensitive path fragments into
//!    the final [`ResultTable`].
//!
//! Collision rule: if both fragments carry the same column name, the
//! sensitive-path value is kept and the non-sensitive one dropped. The column
//! is placed with the sensitive columns.

use std::collections::{HashMap, HashSet};

use crate::domain::{Column, ColumnOrder, ComputePath, Operation, PathFragment, ResultTable, ShardFragment};
use crate::CipherpathError;

/// Concatenate shard fragments of one path into a path fragment.
///
/// # Errors
/// `Recombination` if the shard ranges do not tile `0..expected_rows`, or if
/// shards disagree on columns or row lengths.
pub fn concat_shards(
    path: ComputePath,
    mut fragments: Vec<ShardFragment>,
    expected_rows: usize,
) -> Result<PathFragment, CipherpathError> {
    fragments.sort_by_key(|f| f.index);

    let Some(first) = fragments.first() else {
        if expected_rows == 0 {
            return Ok(PathFragment::empty(path));
        }
        return Err(CipherpathError::Recombination(format!(
            "{path} path produced no shards for {expected_rows} rows"
        )));
    };
    let names: Vec<String> = first.columns.iter().map(|c| c.name.clone()).collect();

    let mut next_row = 0;
    for fragment in &fragments {
        if fragment.rows.start != next_row {
            return Err(CipherpathError::Recombination(format!(
                "{path} shard {} starts at row {}, expected {next_row}",
                fragment.index, fragment.rows.start
            )));
        }
        let shard_names = fragment.columns.iter().map(|c| c.name.as_str());
        if !shard_names.eq(names.iter().map(String::as_str)) {
            return Err(CipherpathError::Recombination(format!(
                "{path} shard {} has different columns",
                fragment.index
            )));
        }
        if let Some(bad) = fragment.columns.iter().find(|c| c.values.len() != fragment.rows.len()) {
            return Err(CipherpathError::Recombination(format!(
                "{path} shard {} column '{}' has {} values for rows {}..{}",
                fragment.index,
                bad.name,
                bad.values.len(),
                fragment.rows.start,
                fragment.rows.end
            )));
        }
        next_row = fragment.rows.end;
    }
    if next_row != expected_rows {
        return Err(CipherpathError::Recombination(format!(
            "{path} shards cover {next_row} rows, expected {expected_rows}"
        )));
    }

    let mut columns: Vec<Column> = names
        .into_iter()
        .map(|name| Column::new(name, Vec::with_capacity(expected_rows)))
        .collect();
    for fragment in fragments {
        for (column, part) in columns.iter_mut().zip(fragment.columns) {
            column.values.extend(part.values);
        }
    }

    Ok(PathFragment { path, columns })
}

/// What the recombined table must look like.
#[derive(Debug, Clone)]
pub struct RecombineSpec<'a> {
    /// Column names of the input table, in table order.
    pub columns: &'a [String],
    pub operation: Operation,
    pub input_rows: usize,
    pub order: ColumnOrder,
}

/// Merge the two path outputs into the final table.
///
/// # Errors
/// `Recombination` for a column not in the input table, an input column
/// missing from both fragments, or a column whose length is not the
/// operation's output row count.
pub fn recombine(
    spec: &RecombineSpec<'_>,
    non_sensitive: PathFragment,
    sensitive: PathFragment,
) -> Result<ResultTable, CipherpathError> {
    let expected_rows = spec.operation.output_rows(spec.input_rows);
    let position: HashMap<&str, usize> = spec
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let sensitive_names: HashSet<String> = sensitive.column_names().into_iter().collect();

    let mut plain = Vec::with_capacity(non_sensitive.columns.len());
    for column in non_sensitive.columns {
        if sensitive_names.contains(&column.name) {
            tracing::debug!(column = %column.name, "Column in both paths; keeping sensitive-path value");
            continue;
        }
        plain.push(column);
    }

    let mut merged = Vec::with_capacity(spec.columns.len());
    for (group, columns) in [(ComputePath::NonSensitive, plain), (ComputePath::Sensitive, sensitive.columns)] {
        let mut group_columns = Vec::with_capacity(columns.len());
        for column in columns {
            let Some(&pos) = position.get(column.name.as_str()) else {
                return Err(CipherpathError::Recombination(format!(
                    "{group} path returned unexpected column '{}'",
                    column.name
                )));
            };
            if column.values.len() != expected_rows {
                return Err(CipherpathError::Recombination(format!(
                    "{group} column '{}' has {} rows, expected {expected_rows} for {}",
                    column.name,
                    column.values.len(),
                    spec.operation
                )));
            }
            group_columns.push((pos, column));
        }
        group_columns.sort_by_key(|(pos, _)| *pos);
        merged.extend(group_columns);
    }

    let mut seen = HashSet::with_capacity(merged.len());
    for (_, column) in &merged {
        if !seen.insert(column.name.as_str()) {
            return Err(CipherpathError::Recombination(format!(
                "column '{}' returned twice by one path",
                column.name
            )));
        }
    }
    if let Some(missing) = spec.columns.iter().find(|c| !seen.contains(c.as_str())) {
        return Err(CipherpathError::Recombination(format!(
            "column '{missing}' is missing from both paths"
        )));
    }

    if spec.order == ColumnOrder::Original {
        merged.sort_by_key(|(pos, _)| *pos);
    }

    Ok(ResultTable::from_validated(
        merged.into_iter().map(|(_, column)| column).collect(),
        expected_rows,
    ))
}
