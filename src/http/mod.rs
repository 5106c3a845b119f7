//! HTTP front door: the admission gate and the routes behind it.

mod gate;
mod proxy;
mod server;

pub use gate::{rate_limit_gate, too_many_requests, ErrorBody, GateState, RATE_LIMITED_MESSAGE};
pub use proxy::Upstream;
pub use server::HttpServer;
