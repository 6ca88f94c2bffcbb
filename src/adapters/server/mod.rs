//! HTTP server adapter: exposes one compute service per process.
//!
//! Routes:
//! - `POST /non_sensitive` or `POST /sensitive` (only the configured role)
//! - `GET /health`
//!
//! The HTTP status mirrors the envelope's `statusCode`. Compute runs on
//! tokio's blocking pool since engine work is CPU-bound and synchronous.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;

use crate::application::{NonSensitiveService, SensitiveService};
use crate::config::{ServerConfig, ServiceRole};
use crate::domain::wire::{RemoteRequest, RemoteResponse};
use crate::ports::HomomorphicEngine;
use crate::CipherpathError;

/// A path service that can answer wire requests.
pub trait ComputeService: Send + Sync + 'static {
    fn handle(&self, request: &RemoteRequest) -> RemoteResponse;
}

impl ComputeService for NonSensitiveService {
    fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        NonSensitiveService::handle(self, request)
    }
}

impl<E: HomomorphicEngine + 'static> ComputeService for SensitiveService<E> {
    fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        SensitiveService::handle(self, request)
    }
}

struct AppState<S> {
    service: Arc<S>,
    role: ServiceRole,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            role: self.role,
        }
    }
}

/// Route path served by `role`.
#[must_use]
pub fn route_for(role: ServiceRole) -> &'static str {
    match role {
        ServiceRole::NonSensitive => "/non_sensitive",
        ServiceRole::Sensitive => "/sensitive",
    }
}

/// Build the router for one service.
pub fn router<S: ComputeService>(role: ServiceRole, service: Arc<S>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route(route_for(role), post(compute::<S>))
        .with_state(AppState { service, role })
}

/// Bind and serve until the process is stopped.
///
/// # Errors
/// `Io` if the address cannot be bound or the server fails.
pub async fn serve<S: ComputeService>(
    config: &ServerConfig,
    service: Arc<S>,
) -> Result<(), CipherpathError> {
    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(
        bind = %config.bind,
        route = route_for(config.role),
        "Compute service listening"
    );
    axum::serve(listener, router(config.role, service)).await?;
    Ok(())
}

async fn health<S: ComputeService>(State(state): State<AppState<S>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "role": state.role }))
}

async fn compute<S: ComputeService>(State(state): State<AppState<S>>, body: Bytes) -> Response {
    let request: RemoteRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed request body");
            return envelope(RemoteResponse::error(format!("malformed request: {e}")));
        }
    };

    let service = Arc::clone(&state.service);
    match tokio::task::spawn_blocking(move || service.handle(&request)).await {
        Ok(response) => envelope(response),
        Err(e) => {
            tracing::error!(error = %e, "Compute task failed");
            let mut response = RemoteResponse::error("compute task failed");
            response.status_code = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
            envelope(response)
        }
    }
}

fn envelope(response: RemoteResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::wire::FragmentPayload;
    use crate::domain::{Operation, Value};
    use crate::testing::{names, numeric_table, RecordingEngine};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn config() -> PipelineConfig {
        PipelineConfig {
            workers: 2,
            ..PipelineConfig::default()
        }
    }

    async fn send(app: Router, method: Method, uri: &str, body: Body) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap_or_default())
    }

    fn age_body(operation: Operation) -> Body {
        let table = numeric_table(&[("age", &[30.0, 45.0, 60.0]), ("id", &[1.0, 2.0, 3.0])]);
        let request = RemoteRequest::new(&table, &names(&["age"]), operation);
        Body::from(serde_json::to_string(&request).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(ServiceRole::NonSensitive, Arc::new(NonSensitiveService::new(config())));
        let (status, body) = send(app, Method::GET, "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("non-sensitive"));
    }

    #[tokio::test]
    async fn test_sensitive_route() {
        let service = SensitiveService::new(Arc::new(RecordingEngine::new()), config());
        let app = router(ServiceRole::Sensitive, Arc::new(service));
        let (status, body) = send(app, Method::POST, "/sensitive", age_body(Operation::Sum)).await;

        assert_eq!(status, StatusCode::OK);
        let response: RemoteResponse = serde_json::from_str(&body).unwrap();
        match response.body.data {
            Some(FragmentPayload::Reduced(map)) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map.get("age"), Some(&Value::Number(135.0)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_only_own_role_is_routed() {
        let app = router(ServiceRole::NonSensitive, Arc::new(NonSensitiveService::new(config())));
        let (status, _) = send(app, Method::POST, "/sensitive", age_body(Operation::Sum)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400_envelope() {
        let app = router(ServiceRole::NonSensitive, Arc::new(NonSensitiveService::new(config())));
        let (status, body) =
            send(app, Method::POST, "/non_sensitive", Body::from("{not json")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let response: RemoteResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.status_code, 400);
        assert!(response.body.error.unwrap().starts_with("malformed request"));
    }
}
