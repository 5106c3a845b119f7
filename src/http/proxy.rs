//! Forwarding of admitted requests to the upstream application.

use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::{BytesRejection, FailedToBufferBody},
        State,
    },
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::gate::ErrorBody;
use crate::config::UpstreamConfig;
use crate::error::{GatehouseError, Result};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The application admitted requests are handed to.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    max_body_bytes: usize,
}

impl Upstream {
    /// Build an upstream from configuration.
    ///
    /// Returns `None` when no base URL is configured.
    pub fn from_config(config: &UpstreamConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.base_url.as_deref() else {
            return Ok(None);
        };
        Self::new(base_url, config.max_body_bytes).map(Some)
    }

    pub fn new(base_url: &str, max_body_bytes: usize) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url).map_err(|e| {
            GatehouseError::Config(format!("Invalid upstream base_url {}: {}", base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatehouseError::Config(format!(
                "Upstream base_url must be http or https, got {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_body_bytes,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Largest request body accepted for forwarding.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    async fn send(
        &self,
        method: Method,
        uri: &Uri,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = self.target_url(path_and_query);

        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        debug!(method = %method, url = %url, "Forwarding request upstream");

        let upstream_response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream_response.status();
        let mut headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let bytes = upstream_response.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Fallback handler that relays every unmatched request upstream.
///
/// The body size cap comes from the `DefaultBodyLimit` layer the server
/// installs with [`Upstream::max_body_bytes`].
pub async fn forward(
    State(upstream): State<Arc<Upstream>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(e))) => {
            debug!(path = %uri.path(), error = %e, "Request body over limit");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
        Err(e) => {
            debug!(path = %uri.path(), error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    match upstream.send(method, &uri, headers, body).await {
        Ok(response) => response,
        Err(e) => {
            warn!(path = %uri.path(), error = %e, "Upstream request failed");
            error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}
