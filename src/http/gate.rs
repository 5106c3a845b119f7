//! Admission middleware placed in front of every route.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::ratelimit::{ClientKey, ForwardedPolicy, RateLimiter};

/// Message returned to rejected clients.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";

/// JSON error body shared by the gate and the proxy.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
}

/// State the gate middleware runs with.
#[derive(Debug, Clone)]
pub struct GateState {
    limiter: Arc<RateLimiter>,
    policy: Arc<ForwardedPolicy>,
}

impl GateState {
    pub fn new(limiter: Arc<RateLimiter>, policy: ForwardedPolicy) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Admit or reject a request before any routing happens.
///
/// The peer address comes from `ConnectInfo` when the server was started
/// with connect info. Without it only `X-Forwarded-For` can name the client.
pub async fn rate_limit_gate(
    State(gate): State<GateState>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = ClientKey::from_request(request.headers(), remote_addr, &gate.policy);

    let status = gate.limiter.admit(&key);
    if status.is_allowed() {
        return next.run(request).await;
    }

    debug!(
        client = %key,
        method = %request.method(),
        path = %request.uri().path(),
        "Rejected request over rate limit"
    );
    too_many_requests()
}

/// The 429 response sent to clients over their limit.
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            error: RATE_LIMITED_MESSAGE,
        }),
    )
        .into_response()
}
