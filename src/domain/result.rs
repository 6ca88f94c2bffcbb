//! Partial and final outputs of the dual-path pipeline.

use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::classification::ComputePath;
use super::table::{Column, Value};
use crate::CipherpathError;

/// Column values produced by one shard of one path.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardFragment {
    pub index: usize,
    pub rows: Range<usize>,
    pub columns: Vec<Column>,
}

/// Column values produced by one whole path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFragment {
    pub path: ComputePath,
    pub columns: Vec<Column>,
}

impl PathFragment {
    #[must_use]
    pub fn empty(path: ComputePath) -> Self {
        Self {
            path,
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Column order of a recombined result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrder {
    /// Non-sensitive columns first, then sensitive columns, each in table order.
    #[default]
    Grouped,
    /// The input table's column order.
    Original,
}

impl FromStr for ColumnOrder {
    type Err = CipherpathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "grouped" => Ok(Self::Grouped),
            "original" => Ok(Self::Original),
            other => Err(CipherpathError::Config(format!(
                "unknown column order '{other}' (expected grouped|original)"
            ))),
        }
    }
}

/// Final recombined table. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    columns: Vec<Column>,
    row_count: usize,
}

impl ResultTable {
    /// Only the recombiner builds result tables; it has already checked
    /// every column has `row_count` values.
    pub(crate) fn from_validated(columns: Vec<Column>, row_count: usize) -> Self {
        Self { columns, row_count }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Numeric cell at (`column`, `row`), if present and numeric.
    #[must_use]
    pub fn number(&self, column: &str, row: usize) -> Option<f64> {
        self.column(column)?.get(row)?.as_number()
    }

    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.row_count)
            .map(|row| self.columns.iter().map(|c| c.values[row].clone()).collect())
            .collect()
    }
}
