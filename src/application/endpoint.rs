//! Compute endpoint services.
//!
//! Each service owns one side of the trust boundary and only ever computes
//! and returns the columns of its own path. Every failure becomes a `400`
//! envelope carrying the error message; nothing is retried.

use std::sync::Arc;

use super::executor::{CancelToken, ChunkedExecutor, ColumnKernel};
use super::homomorphic::HomomorphicCompute;
use super::pipeline::{compute_path, prepare};
use super::plaintext::PlaintextCompute;
use crate::config::PipelineConfig;
use crate::domain::wire::{FragmentPayload, RemoteRequest, RemoteResponse};
use crate::domain::{OutputShape, PathFragment};
use crate::ports::HomomorphicEngine;
use crate::CipherpathError;

fn serve_path<K: ColumnKernel>(
    kernel: &K,
    executor: &ChunkedExecutor,
    config: &PipelineConfig,
    request: &RemoteRequest,
) -> Result<(PathFragment, OutputShape), CipherpathError> {
    let operation = request.parsed_operation()?;
    let table = request.data.clone().into_table()?;
    let classification = prepare(
        &table,
        &request.sensitive_columns,
        &operation,
        config.unknown_columns,
    )?;
    let fragment = compute_path(
        executor,
        kernel,
        &table,
        &classification,
        &operation,
        &CancelToken::new(),
    )?;
    Ok((fragment, operation.shape()))
}

fn respond(
    path: &str,
    result: Result<(PathFragment, OutputShape), CipherpathError>,
) -> RemoteResponse {
    match result {
        Ok((fragment, shape)) => {
            tracing::info!(path, columns = fragment.columns.len(), "Request served");
            RemoteResponse::ok(FragmentPayload::from_fragment(&fragment, shape))
        }
        Err(e) => {
            tracing::warn!(path, error = %e, "Request rejected");
            RemoteResponse::error(e.to_string())
        }
    }
}

/// Plaintext service for non-sensitive columns.
#[derive(Debug, Clone)]
pub struct NonSensitiveService {
    executor: ChunkedExecutor,
    config: PipelineConfig,
}

impl NonSensitiveService {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            executor: ChunkedExecutor::new(config.workers),
            config,
        }
    }

    /// Answer one request with the non-sensitive fragment.
    #[must_use]
    pub fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        respond(
            "non-sensitive",
            serve_path(&PlaintextCompute, &self.executor, &self.config, request),
        )
    }
}

/// Homomorphic service for sensitive columns.
pub struct SensitiveService<E: HomomorphicEngine> {
    homomorphic: HomomorphicCompute<E>,
    executor: ChunkedExecutor,
    config: PipelineConfig,
}

impl<E: HomomorphicEngine> SensitiveService<E> {
    pub fn new(engine: Arc<E>, config: PipelineConfig) -> Self {
        Self {
            homomorphic: HomomorphicCompute::new(engine),
            executor: ChunkedExecutor::new(config.workers),
            config,
        }
    }

    /// Answer one request with the sensitive fragment.
    #[must_use]
    pub fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        respond(
            "sensitive",
            serve_path(&self.homomorphic, &self.executor, &self.config, request),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wire::{TablePayload, STATUS_BAD_REQUEST};
    use crate::domain::{Operation, Value};
    use crate::testing::{names, numeric_table, RecordingEngine};
    use crate::ComputePath;

    fn config() -> PipelineConfig {
        PipelineConfig {
            workers: 2,
            ..PipelineConfig::default()
        }
    }

    fn age_request(operation: Operation) -> RemoteRequest {
        let table = numeric_table(&[("age", &[30.0, 45.0, 60.0]), ("id", &[1.0, 2.0, 3.0])]);
        RemoteRequest::new(&table, &names(&["age"]), operation)
    }

    #[test]
    fn test_sensitive_service_returns_only_sensitive_columns() {
        let engine = Arc::new(RecordingEngine::new());
        let service = SensitiveService::new(Arc::clone(&engine), config());

        let response = service.handle(&age_request(Operation::Sum));
        assert!(response.is_success());
        let fragment = response
            .body
            .data
            .expect("data")
            .into_fragment(ComputePath::Sensitive, OutputShape::Reduced)
            .unwrap();
        assert_eq!(fragment.column_names(), names(&["age"]));
        assert_eq!(fragment.column("age").unwrap().values, vec![Value::Number(135.0)]);
        assert_eq!(engine.decrypt_calls(), 1);
    }

    #[test]
    fn test_non_sensitive_service_never_sees_sensitive_math() {
        let service = NonSensitiveService::new(config());
        let response = service.handle(&age_request(Operation::ScaledMultiply(10.0)));
        assert!(response.is_success());
        let fragment = response
            .body
            .data
            .expect("data")
            .into_fragment(ComputePath::NonSensitive, OutputShape::PerRow)
            .unwrap();
        assert_eq!(fragment.column_names(), names(&["id"]));
        assert_eq!(
            fragment.column("id").unwrap().values,
            vec![Value::Number(10.0), Value::Number(20.0), Value::Number(30.0)]
        );
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let engine = Arc::new(RecordingEngine::new());
        let service = SensitiveService::new(Arc::clone(&engine), config());
        let request = RemoteRequest {
            data: TablePayload {
                columns: names(&["a", "b"]),
                data: vec![vec![Value::Number(1.0)]],
            },
            sensitive_columns: names(&["a"]),
            operation: "addition".into(),
            factor: None,
        };

        let response = service.handle(&request);
        assert_eq!(response.status_code, STATUS_BAD_REQUEST);
        assert!(response
            .body
            .error
            .unwrap()
            .contains("mismatch between number of columns"));
        assert_eq!(engine.total_calls(), 0);
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        let mut request = age_request(Operation::Sum);
        request.operation = "division".into();
        let response = NonSensitiveService::new(config()).handle(&request);
        assert_eq!(response.status_code, STATUS_BAD_REQUEST);
        assert!(response.body.error.unwrap().contains("division"));
    }
}
