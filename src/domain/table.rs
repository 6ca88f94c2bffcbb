//! Tabular input model.
//!
//! A [`Table`] is an ordered set of uniquely named columns sharing one row
//! count. Tables are read-only once constructed; every constructor validates
//! shape so downstream stages never see a ragged table.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::CipherpathError;

/// A single cell.
///
/// JSON numbers map to `Number`, strings to `Text` and `null` to `Null`.
/// Only `Number` takes part in arithmetic.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Null,
}

impl Value {
    /// The numeric payload, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Short type name used in error messages (never the value itself).
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Null => "null",
        }
    }
}

// Cell contents may be sensitive; Debug only reveals the kind.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value::{}", self.kind_name())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Convenience constructor for an all-numeric column.
    pub fn numeric(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().copied().map(Value::Number).collect())
    }
}

/// Validated, immutable table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    /// Build a table from columns.
    ///
    /// # Errors
    /// Returns `InvalidInput` on duplicate column names or ragged columns.
    pub fn new(columns: Vec<Column>) -> Result<Self, CipherpathError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(CipherpathError::InvalidInput(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }

        let row_count = columns.first().map_or(0, |c| c.values.len());
        if let Some(bad) = columns.iter().find(|c| c.values.len() != row_count) {
            return Err(CipherpathError::InvalidInput(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.values.len(),
                row_count
            )));
        }

        Ok(Self { columns, row_count })
    }

    /// Build a table from row-major data, the shape used on the wire.
    ///
    /// # Errors
    /// Returns `InvalidInput` if any row length differs from the column count.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, CipherpathError> {
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != names.len()) {
            return Err(CipherpathError::InvalidInput(format!(
                "mismatch between number of columns ({}) and row {} length ({})",
                names.len(),
                idx,
                row.len()
            )));
        }

        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();
        for row in rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }

        Self::new(columns)
    }

    /// Row-major view of the table.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.row_count)
            .map(|row| self.columns.iter().map(|c| c.values[row].clone()).collect())
            .collect()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// New table holding only `names`, in the given order.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unknown or repeated column.
    pub fn project(&self, names: &[String]) -> Result<Self, CipherpathError> {
        let columns = names
            .iter()
            .map(|name| {
                self.column(name).cloned().ok_or_else(|| {
                    CipherpathError::InvalidInput(format!("unknown column '{name}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns)
    }

    /// Values of `name` restricted to `rows`.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unknown column or out-of-range rows.
    pub fn slice(&self, name: &str, rows: Range<usize>) -> Result<&[Value], CipherpathError> {
        let column = self.column(name).ok_or_else(|| {
            CipherpathError::InvalidInput(format!("unknown column '{name}'"))
        })?;
        column.values.get(rows.clone()).ok_or_else(|| {
            CipherpathError::InvalidInput(format!(
                "rows {}..{} out of range for column '{name}' ({} rows)",
                rows.start, rows.end, self.row_count
            ))
        })
    }
}
