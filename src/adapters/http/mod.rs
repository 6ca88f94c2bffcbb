//! HTTP adapter: `ComputeEndpoint` over a blocking reqwest client.
//!
//! The envelope is read from the body whatever the HTTP status, so a service
//! answering `400` with `{statusCode, body}` reaches the gateway intact. A
//! non-2xx answer without an envelope becomes a synthetic error envelope
//! carrying the HTTP status.

use std::time::Duration;

use reqwest::blocking::Client;

use crate::domain::wire::{RemoteRequest, RemoteResponse, ResponseBody};
use crate::ports::{ComputeEndpoint, EndpointError};

/// One remote compute service reachable at a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpEndpoint {
    /// # Errors
    /// `Transport` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EndpointError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EndpointError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn map_error(&self, e: &reqwest::Error) -> EndpointError {
        if e.is_timeout() {
            EndpointError::Timeout(self.timeout)
        } else {
            EndpointError::Transport(e.to_string())
        }
    }
}

impl ComputeEndpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.url
    }

    fn invoke(&self, request: &RemoteRequest) -> Result<RemoteResponse, EndpointError> {
        tracing::debug!(url = %self.url, operation = %request.operation, "POST compute request");

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .map_err(|e| self.map_error(&e))?;

        let status = response.status();
        let text = response.text().map_err(|e| self.map_error(&e))?;

        match serde_json::from_str::<RemoteResponse>(&text) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Ok(RemoteResponse {
                status_code: status.as_u16(),
                body: ResponseBody {
                    data: None,
                    error: Some(if text.is_empty() {
                        status.to_string()
                    } else {
                        text
                    }),
                },
            }),
            Err(e) => Err(EndpointError::MalformedResponse(e.to_string())),
        }
    }
}
