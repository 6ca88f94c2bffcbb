//! Compute endpoint port: one remote path service.
//!
//! The gateway holds two independent endpoints, one per path. They are never
//! merged behind a single capability.

use std::time::Duration;

use crate::domain::wire::{RemoteRequest, RemoteResponse};

/// Errors raised before a well-formed envelope is received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A remote service computing one path.
pub trait ComputeEndpoint: Send + Sync {
    /// Identifier used in logs and errors (e.g. the URL).
    fn name(&self) -> &str;

    /// Submit a request and return the response envelope.
    ///
    /// A non-200 `statusCode` is still `Ok`; interpreting it is the caller's job.
    ///
    /// # Errors
    /// Returns `EndpointError` on transport failure, timeout or an
    /// unparseable response.
    fn invoke(&self, request: &RemoteRequest) -> Result<RemoteResponse, EndpointError>;
}
