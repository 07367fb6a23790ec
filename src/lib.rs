//! Turnstile - Per-Caller Request Admission Gateway
//!
//! This crate implements a request-admission layer that fronts an arbitrary
//! HTTP handler and bounds how many requests each caller may issue within a
//! time window. Callers are identified by a derived key (normally the client
//! address), each key holds its own token bucket, and a background sweep
//! reclaims entries for callers that have gone idle for a full window.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
