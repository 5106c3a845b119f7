//! HTTP server implementation.

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::gate::{rate_limit_gate, ErrorBody, GateState};
use super::proxy::{self, Upstream};
use crate::error::{GatehouseError, Result};
use crate::ratelimit::{ForwardedPolicy, RateLimiter};

/// HTTP server with the rate limit gate as its outermost layer.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    policy: ForwardedPolicy,
    upstream: Option<Upstream>,
}

impl HttpServer {
    /// Create a new server without an upstream.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>, policy: ForwardedPolicy) -> Self {
        Self {
            addr,
            rate_limiter,
            policy,
            upstream: None,
        }
    }

    /// Forward admitted requests that match no built-in route to `upstream`.
    pub fn with_upstream(mut self, upstream: Option<Upstream>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Build the router.
    ///
    /// Every request, including unmatched ones, passes the gate first.
    pub fn router(&self) -> Router {
        let routes: Router = match &self.upstream {
            Some(upstream) => builtin_routes()
                .fallback(proxy::forward)
                .layer(DefaultBodyLimit::max(upstream.max_body_bytes()))
                .with_state(Arc::new(upstream.clone())),
            None => builtin_routes().fallback(not_found),
        };

        let gate = GateState::new(Arc::clone(&self.rate_limiter), self.policy.clone());
        routes.layer(middleware::from_fn_with_state(gate, rate_limit_gate))
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GatehouseError::Io(e)
        })?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            upstream = self.upstream.as_ref().map(Upstream::base_url).unwrap_or("none"),
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatehouseError::Io(e)
        })
    }
}

fn builtin_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorBody { error: "Not found" })).into_response()
}
