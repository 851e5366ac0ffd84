//! # CommonTrace Backend Client
//!
//! Thin async HTTP client for the CommonTrace API with a per-target
//! circuit breaker. 5xx responses, timeouts, and transport errors trip
//! the circuit; 4xx responses do not (the backend is alive, the request
//! was just wrong).

mod breaker;
mod client;

pub use breaker::{BreakerState, CircuitBreaker, FAILURE_THRESHOLD, RECOVERY_WINDOW};
pub use client::BackendClient;

/// Client error taxonomy
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The circuit is open; the call was rejected without touching the
    /// network
    #[error("circuit open: backend unavailable")]
    CircuitOpen,
    /// The backend answered with a non-success status
    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },
    /// The request exceeded its deadline
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body was not valid JSON
    #[error("malformed response: {0}")]
    Decode(String),
    /// The client itself could not be constructed
    #[error("client configuration error: {0}")]
    Config(String),
}
