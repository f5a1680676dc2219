//! Outbound HTTP client with per-origin connection reuse

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::{HooksinkError, Result};

use super::{POOL_IDLE_TIMEOUT_SECS, POOL_MAX_IDLE_PER_HOST};

/// One fully-built outbound request, ready for dispatch
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: String,
    /// Absolute target URL
    pub url: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Bytes,
}

/// Response observed from a dispatched request
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

/// HTTP client wrapping a keep-alive connection pool keyed by target origin
pub struct OutboundClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl OutboundClient {
    /// Create a new client
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build_http();

        Self { client }
    }

    /// Send a request and collect the response.
    ///
    /// # Errors
    ///
    /// Returns `Transport` for connection-level failures; an HTTP response
    /// of any status is a success at this layer.
    pub async fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse> {
        let uri = request
            .url
            .parse::<Uri>()
            .map_err(|e| HooksinkError::Other(format!("Invalid URL '{}': {e}", request.url)))?;

        let method = request.method.parse::<Method>().map_err(|e| {
            HooksinkError::Other(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        debug!("Dispatching {} {}", request.method, uri);

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let http_request = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| HooksinkError::Other(format!("Failed to build request: {e}")))?;

        let response = self
            .client
            .request(http_request)
            .await
            .map_err(|e| HooksinkError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or("<invalid>").to_string(),
                )
            })
            .collect();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| HooksinkError::Transport(format!("Failed to read response body: {e}")))?
            .to_bytes();

        Ok(OutboundResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for OutboundClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a target base URL and a captured request path
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
