//! Remote invocation gateway.
//!
//! Drives one request through two independent compute endpoints:
//!
//! ```text
//! Preparing -> AwaitingNonSensitive -> AwaitingSensitive -> Recombining -> Done
//!     \______________\______________________\___________________\-> Failed
//! ```
//!
//! Any transport error, timeout, non-200 status or missing payload moves the
//! request to `Failed`. Nothing is ever substituted for a missing result.
//!
//! The non-sensitive endpoint only ever receives the non-sensitive columns;
//! sensitive values cross the wire to the sensitive endpoint alone.

use std::fmt;

use super::pipeline::{prepare, PipelineRequest};
use super::recombine::{recombine, RecombineSpec};
use crate::config::PipelineConfig;
use crate::domain::wire::RemoteRequest;
use crate::domain::{ComputePath, PathFragment, ResultTable};
use crate::ports::{ComputeEndpoint, EndpointError};
use crate::CipherpathError;

/// Per-request gateway state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Preparing,
    AwaitingNonSensitive,
    AwaitingSensitive,
    Recombining,
    Done,
    Failed,
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preparing => "preparing",
            Self::AwaitingNonSensitive => "awaiting-non-sensitive",
            Self::AwaitingSensitive => "awaiting-sensitive",
            Self::Recombining => "recombining",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of one gateway request together with the states it visited.
#[derive(Debug)]
pub struct GatewayRun {
    pub states: Vec<GatewayState>,
    pub result: Result<ResultTable, CipherpathError>,
}

impl GatewayRun {
    #[must_use]
    pub fn final_state(&self) -> GatewayState {
        self.states.last().copied().unwrap_or(GatewayState::Preparing)
    }
}

/// Gateway over one non-sensitive and one sensitive endpoint.
pub struct Gateway<N: ComputeEndpoint, S: ComputeEndpoint> {
    non_sensitive: N,
    sensitive: S,
    config: PipelineConfig,
}

impl<N: ComputeEndpoint, S: ComputeEndpoint> Gateway<N, S> {
    pub fn new(non_sensitive: N, sensitive: S, config: PipelineConfig) -> Self {
        Self {
            non_sensitive,
            sensitive,
            config,
        }
    }

    /// Run a request and return only its result.
    ///
    /// # Errors
    /// See [`Gateway::process_tracked`].
    pub fn process(&self, request: &PipelineRequest) -> Result<ResultTable, CipherpathError> {
        self.process_tracked(request).result
    }

    /// Run a request, recording every state transition.
    ///
    /// The result is an error for local validation failures (before any
    /// endpoint is called), `Transport`, `Timeout`, `EndpointRejected`,
    /// `InvalidResponse` or `Recombination`.
    pub fn process_tracked(&self, request: &PipelineRequest) -> GatewayRun {
        let mut states = Vec::with_capacity(6);
        let result = self.drive(request, &mut states);
        let last = if result.is_ok() {
            GatewayState::Done
        } else {
            GatewayState::Failed
        };
        transition(&mut states, last);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Gateway request failed");
        }
        GatewayRun { states, result }
    }

    fn drive(
        &self,
        request: &PipelineRequest,
        states: &mut Vec<GatewayState>,
    ) -> Result<ResultTable, CipherpathError> {
        transition(states, GatewayState::Preparing);
        let PipelineRequest {
            table,
            sensitive_columns,
            operation,
        } = request;
        let classification =
            prepare(table, sensitive_columns, operation, self.config.unknown_columns)?;
        let plain_wire = RemoteRequest::new(
            &table.project(classification.non_sensitive())?,
            &[],
            *operation,
        );
        let secret_wire = RemoteRequest::new(table, sensitive_columns, *operation);

        transition(states, GatewayState::AwaitingNonSensitive);
        let plain = call(&self.non_sensitive, &plain_wire, ComputePath::NonSensitive, request)?;

        transition(states, GatewayState::AwaitingSensitive);
        let secret = call(&self.sensitive, &secret_wire, ComputePath::Sensitive, request)?;

        transition(states, GatewayState::Recombining);
        let columns = table.column_names();
        recombine(
            &RecombineSpec {
                columns: &columns,
                operation: *operation,
                input_rows: table.row_count(),
                order: self.config.column_order,
            },
            plain,
            secret,
        )
    }
}

fn transition(states: &mut Vec<GatewayState>, next: GatewayState) {
    tracing::debug!(state = %next, "Gateway transition");
    states.push(next);
}

fn call<E: ComputeEndpoint>(
    endpoint: &E,
    wire: &RemoteRequest,
    path: ComputePath,
    request: &PipelineRequest,
) -> Result<PathFragment, CipherpathError> {
    let name = endpoint.name().to_string();
    tracing::info!(%path, endpoint = %name, "Calling compute endpoint");

    let response = endpoint.invoke(wire).map_err(|e| match e {
        EndpointError::Transport(message) => CipherpathError::Transport {
            endpoint: name.clone(),
            message,
        },
        EndpointError::Timeout(after) => CipherpathError::Timeout {
            endpoint: name.clone(),
            after,
        },
        EndpointError::MalformedResponse(message) => CipherpathError::InvalidResponse {
            endpoint: name.clone(),
            message,
        },
    })?;

    if !response.is_success() {
        return Err(CipherpathError::EndpointRejected {
            endpoint: name,
            status: response.status_code,
            message: response
                .body
                .error
                .unwrap_or_else(|| "no error message".to_string()),
        });
    }

    let data = response.body.data.ok_or_else(|| CipherpathError::InvalidResponse {
        endpoint: name.clone(),
        message: "response body has no data".to_string(),
    })?;

    data.into_fragment(path, request.operation.shape())
        .map_err(|message| CipherpathError::InvalidResponse {
            endpoint: name,
            message,
        })
}
