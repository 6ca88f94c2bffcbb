//! Column classifier: splits a table into sensitive and non-sensitive
//! columns and decides which columns are eligible for arithmetic.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::table::Table;
use crate::CipherpathError;

/// What to do with a declared-sensitive name that is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownColumnPolicy {
    /// Fail the request with `InvalidInput`.
    #[default]
    Reject,
    /// Drop the name and log a warning.
    Ignore,
}

impl FromStr for UnknownColumnPolicy {
    type Err = CipherpathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reject" => Ok(Self::Reject),
            "ignore" => Ok(Self::Ignore),
            other => Err(CipherpathError::Config(format!(
                "unknown column policy '{other}' (expected reject|ignore)"
            ))),
        }
    }
}

/// How a column takes part in computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every value is a number.
    Numeric,
    /// No value is a number; copied, never computed.
    PassThrough,
}

/// Which compute path a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputePath {
    Sensitive,
    NonSensitive,
}

impl std::fmt::Display for ComputePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sensitive => "sensitive",
            Self::NonSensitive => "non-sensitive",
        })
    }
}

/// Disjoint partition of a table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnClassification {
    sensitive: Vec<String>,
    non_sensitive: Vec<String>,
    kinds: HashMap<String, ColumnKind>,
}

impl ColumnClassification {
    /// Sensitive columns in table order.
    #[must_use]
    pub fn sensitive(&self) -> &[String] {
        &self.sensitive
    }

    /// Non-sensitive columns in table order.
    #[must_use]
    pub fn non_sensitive(&self) -> &[String] {
        &self.non_sensitive
    }

    #[must_use]
    pub fn columns_for(&self, path: ComputePath) -> &[String] {
        match path {
            ComputePath::Sensitive => &self.sensitive,
            ComputePath::NonSensitive => &self.non_sensitive,
        }
    }

    #[must_use]
    pub fn kind(&self, column: &str) -> Option<ColumnKind> {
        self.kinds.get(column).copied()
    }

    /// Numeric columns of `path`, in table order.
    #[must_use]
    pub fn numeric_columns(&self, path: ComputePath) -> Vec<String> {
        self.filter_kind(path, ColumnKind::Numeric)
    }

    /// Pass-through columns of `path`, in table order.
    #[must_use]
    pub fn passthrough_columns(&self, path: ComputePath) -> Vec<String> {
        self.filter_kind(path, ColumnKind::PassThrough)
    }

    fn filter_kind(&self, path: ComputePath, kind: ColumnKind) -> Vec<String> {
        self.columns_for(path)
            .iter()
            .filter(|c| self.kind(c) == Some(kind))
            .cloned()
            .collect()
    }
}

/// Classify `table` given the caller-declared sensitive names.
///
/// # Errors
/// - `InvalidInput` for unknown declared names under [`UnknownColumnPolicy::Reject`].
/// - `TypeMismatch` for a column mixing numbers with text or nulls.
pub fn classify(
    table: &Table,
    declared_sensitive: &[String],
    policy: UnknownColumnPolicy,
) -> Result<ColumnClassification, CipherpathError> {
    let declared: HashSet<&str> = declared_sensitive.iter().map(String::as_str).collect();

    for name in declared_sensitive {
        if table.column(name).is_none() {
            match policy {
                UnknownColumnPolicy::Reject => {
                    return Err(CipherpathError::InvalidInput(format!(
                        "sensitive column '{name}' is not present in the table"
                    )));
                }
                UnknownColumnPolicy::Ignore => {
                    tracing::warn!(column = %name, "Ignoring unknown sensitive column");
                }
            }
        }
    }

    let mut sensitive = Vec::new();
    let mut non_sensitive = Vec::new();
    let mut kinds = HashMap::with_capacity(table.column_count());

    for column in table.columns() {
        let numeric = column.values.iter().filter(|v| v.is_number()).count();
        let kind = if numeric == column.values.len() {
            ColumnKind::Numeric
        } else if numeric == 0 {
            ColumnKind::PassThrough
        } else {
            let row = column
                .values
                .iter()
                .position(|v| !v.is_number())
                .unwrap_or_default();
            return Err(CipherpathError::TypeMismatch {
                column: column.name.clone(),
                row,
                found: column.values[row].kind_name(),
            });
        };
        kinds.insert(column.name.clone(), kind);

        if declared.contains(column.name.as_str()) {
            sensitive.push(column.name.clone());
        } else {
            non_sensitive.push(column.name.clone());
        }
    }

    tracing::debug!(
        sensitive = sensitive.len(),
        non_sensitive = non_sensitive.len(),
        "Classified columns"
    );

    Ok(ColumnClassification {
        sensitive,
        non_sensitive,
        kinds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::{Column, Value};

    fn sample() -> Table {
        Table::new(vec![
            Column::numeric("patient_id", &[1.0, 2.0]),
            Column::numeric("age", &[30.0, 45.0]),
            Column::new("ward", vec![Value::from("A"), Value::Null]),
            Column::numeric("cholesterol", &[200.0, 220.0]),
        ])
        .unwrap()
    }

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let table = sample();
        let c = classify(&table, &names(&["cholesterol", "age"]), UnknownColumnPolicy::Reject)
            .unwrap();

        assert_eq!(c.sensitive(), names(&["age", "cholesterol"]).as_slice());
        assert_eq!(c.non_sensitive(), names(&["patient_id", "ward"]).as_slice());

        let mut all: Vec<String> = c.sensitive().iter().chain(c.non_sensitive()).cloned().collect();
        all.sort();
        let mut expected = table.column_names();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_kinds() {
        let c = classify(&sample(), &[], UnknownColumnPolicy::Reject).unwrap();
        assert_eq!(c.kind("age"), Some(ColumnKind::Numeric));
        assert_eq!(c.kind("ward"), Some(ColumnKind::PassThrough));
        assert_eq!(c.numeric_columns(ComputePath::NonSensitive).len(), 3);
        assert_eq!(c.passthrough_columns(ComputePath::NonSensitive), names(&["ward"]));
        assert!(c.numeric_columns(ComputePath::Sensitive).is_empty());
    }

    #[test]
    fn test_unknown_column_policies() {
        let table = sample();
        let err = classify(&table, &names(&["weight"]), UnknownColumnPolicy::Reject)
            .expect_err("reject");
        assert!(err.to_string().contains("weight"));

        let c = classify(&table, &names(&["weight", "age"]), UnknownColumnPolicy::Ignore).unwrap();
        assert_eq!(c.sensitive(), names(&["age"]).as_slice());
    }

    #[test]
    fn test_mixed_column_is_type_mismatch() {
        let table = Table::new(vec![Column::new(
            "bp",
            vec![Value::Number(120.0), Value::from("high")],
        )])
        .unwrap();
        let err = classify(&table, &names(&["bp"]), UnknownColumnPolicy::Reject)
            .expect_err("mixed column");
        assert!(matches!(
            err,
            CipherpathError::TypeMismatch { ref column, row: 1, .. } if column == "bp"
        ));
    }

    #[test]
    fn test_duplicate_declared_names_tolerated() {
        let c = classify(&sample(), &names(&["age", "age"]), UnknownColumnPolicy::Reject).unwrap();
        assert_eq!(c.sensitive(), names(&["age"]).as_slice());
    }
}
