//! Wire contract shared by the gateway and the compute endpoint services.
//!
//! Request:
//! `{ data: { columns, data }, sensitive_columns, operation, factor? }`
//!
//! Response:
//! `{ statusCode: 200, body: { data: <fragment> } }` or
//! `{ statusCode: 400, body: { error } }`. A `body` encoded as a JSON
//! string is accepted too.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::classification::ComputePath;
use super::operation::{Operation, OutputShape};
use super::result::PathFragment;
use super::table::{Column, Table, Value};
use crate::CipherpathError;

/// Success status code carried inside the envelope.
pub const STATUS_OK: u16 = 200;
/// Failure status code carried inside the envelope.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Row-major table payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

impl TablePayload {
    #[must_use]
    pub fn from_table(table: &Table) -> Self {
        Self {
            columns: table.column_names(),
            data: table.to_rows(),
        }
    }

    /// # Errors
    /// `InvalidInput` on ragged rows or duplicate names.
    pub fn into_table(self) -> Result<Table, CipherpathError> {
        Table::from_rows(self.columns, self.data)
    }
}

/// Request posted to both compute endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub data: TablePayload,
    #[serde(default)]
    pub sensitive_columns: Vec<String>,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
}

impl RemoteRequest {
    #[must_use]
    pub fn new(table: &Table, sensitive_columns: &[String], operation: Operation) -> Self {
        Self {
            data: TablePayload::from_table(table),
            sensitive_columns: sensitive_columns.to_vec(),
            operation: operation.wire_name().to_string(),
            factor: operation.factor(),
        }
    }

    /// # Errors
    /// `UnsupportedOperation` or `InvalidInput`.
    pub fn parsed_operation(&self) -> Result<Operation, CipherpathError> {
        Operation::from_wire(&self.operation, self.factor)
    }
}

/// Per-row fragment: `{ columns, data, index }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowsPayload {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
    pub index: Vec<usize>,
}

/// Result fragment of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FragmentPayload {
    PerRow(RowsPayload),
    Reduced(BTreeMap<String, Value>),
}

impl FragmentPayload {
    /// Encode a path fragment for the wire.
    #[must_use]
    pub fn from_fragment(fragment: &PathFragment, shape: OutputShape) -> Self {
        match shape {
            OutputShape::Reduced => Self::Reduced(
                fragment
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values.first().cloned().unwrap_or(Value::Null)))
                    .collect(),
            ),
            OutputShape::PerRow => {
                let rows = fragment.columns.first().map_or(0, |c| c.values.len());
                Self::PerRow(RowsPayload {
                    columns: fragment.column_names(),
                    data: (0..rows)
                        .map(|r| fragment.columns.iter().map(|c| c.values[r].clone()).collect())
                        .collect(),
                    index: (0..rows).collect(),
                })
            }
        }
    }

    /// Decode into a path fragment, restoring row order from `index`.
    ///
    /// # Errors
    /// Returns a description of the first structural problem found.
    pub fn into_fragment(self, path: ComputePath, shape: OutputShape) -> Result<PathFragment, String> {
        match (self, shape) {
            (Self::Reduced(map), OutputShape::Reduced) => Ok(PathFragment {
                path,
                columns: map
                    .into_iter()
                    .map(|(name, value)| Column::new(name, vec![value]))
                    .collect(),
            }),
            (Self::PerRow(rows), OutputShape::PerRow) => rows.into_fragment(path),
            (Self::Reduced(map), OutputShape::PerRow) if map.is_empty() => {
                Ok(PathFragment::empty(path))
            }
            (Self::Reduced(_), OutputShape::PerRow) => {
                Err("expected per-row fragment, got a column->scalar mapping".into())
            }
            (Self::PerRow(_), OutputShape::Reduced) => {
                Err("expected column->scalar mapping, got a per-row fragment".into())
            }
        }
    }
}

impl RowsPayload {
    fn into_fragment(self, path: ComputePath) -> Result<PathFragment, String> {
        if self.index.len() != self.data.len() {
            return Err(format!(
                "index has {} entries for {} rows",
                self.index.len(),
                self.data.len()
            ));
        }

        let n = self.data.len();
        let mut slots: Vec<Option<Vec<Value>>> = vec![None; n];
        for (row, position) in self.data.into_iter().zip(self.index) {
            if row.len() != self.columns.len() {
                return Err(format!(
                    "row at index {position} has {} values for {} columns",
                    row.len(),
                    self.columns.len()
                ));
            }
            let slot = slots
                .get_mut(position)
                .ok_or_else(|| format!("row index {position} out of range 0..{n}"))?;
            if slot.replace(row).is_some() {
                return Err(format!("row index {position} appears twice"));
            }
        }

        let mut columns: Vec<Column> = self
            .columns
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(n)))
            .collect();
        for row in slots.into_iter().flatten() {
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }

        Ok(PathFragment { path, columns })
    }
}

/// Response body: exactly one of `data` or `error` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FragmentPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response envelope returned by a compute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(deserialize_with = "body_object_or_string")]
    pub body: ResponseBody,
}

impl RemoteResponse {
    #[must_use]
    pub fn ok(data: FragmentPayload) -> Self {
        Self {
            status_code: STATUS_OK,
            body: ResponseBody {
                data: Some(data),
                error: None,
            },
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status_code: STATUS_BAD_REQUEST,
            body: ResponseBody {
                data: None,
                error: Some(message.into()),
            },
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

fn body_object_or_string<'de, D>(deserializer: D) -> Result<ResponseBody, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(encoded) => serde_json::from_str(&encoded).map_err(D::Error::custom),
        other => serde_json::from_value(other).map_err(D::Error::custom),
    }
}
