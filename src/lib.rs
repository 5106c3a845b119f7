//! Gatehouse - Per-Client Rate Limiting Gate
//!
//! This crate implements a fixed-window, per-client rate limiter that sits in
//! front of an HTTP application. Each caller, identified by the first
//! `X-Forwarded-For` entry or the peer address, may make a bounded number of
//! requests per window; excess requests are answered with 429 before any
//! downstream work happens. Idle client state is swept in the background.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
