//! # cipherpath
//!
//! Dual-path aggregation over tabular data: sensitive columns are computed
//! under homomorphic encryption, non-sensitive columns in the clear, and the
//! two outputs are recombined into one table.
//!
//! This crate provides:
//! - Column classification and input validation
//! - Homomorphic and plaintext compute paths with identical semantics
//! - A chunked parallel executor with deterministic recombination
//! - A remote gateway and the two compute services it talks to
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (Table, Operation, classification, wire contract)
//! - `ports`: Trait definitions for external operations
//! - `adapters`: Concrete implementations (tfhe-rs, HTTP client/server, log sanitizing)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Explicit runtime configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

pub use domain::{ComputePath, CryptoError, Operation, ResultTable, Table, Value};

/// Result type for cipherpath operations
pub type Result<T> = std::result::Result<T, CipherpathError>;

/// Main error type for cipherpath
#[derive(Debug, thiserror::Error)]
pub enum CipherpathError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Column '{column}' is empty; reductions need at least one value")]
    EmptyColumn { column: String },

    #[error("Column '{column}' row {row}: expected a number, found {found}")]
    TypeMismatch {
        column: String,
        row: usize,
        found: &'static str,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Encryption engine failed on column '{column}' during {operation}: {source}")]
    Engine {
        column: String,
        operation: String,
        #[source]
        source: CryptoError,
    },

    #[error("Worker for {path} shard {shard} (rows {start}..{end}) failed: {source}")]
    WorkerFailure {
        path: ComputePath,
        shard: usize,
        start: usize,
        end: usize,
        #[source]
        source: Box<CipherpathError>,
    },

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("Transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Request to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("Endpoint {endpoint} returned status {status}: {message}")]
    EndpointRejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Recombination failed: {0}")]
    Recombination(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CipherpathError {
    /// Whether this error only reports that work was stopped because of
    /// another failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
