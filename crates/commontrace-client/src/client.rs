//! Backend HTTP client.
//!
//! Persistent connection pool, authenticated requests via `X-API-Key`,
//! circuit-broken per client instance. The status classification matters:
//! 4xx means the backend is healthy and the request was wrong (no trip);
//! 5xx, timeouts, and transport errors count against the circuit.

use std::time::Duration;

use crate::{ClientError, CircuitBreaker};

/// End-to-end request deadline
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP connect deadline
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Keep-alive pool size per host
const POOL_MAX_IDLE: usize = 10;

/// Async client for the CommonTrace backend API
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl BackendClient {
    /// Build a client for one backend target
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker: CircuitBreaker::new(),
        })
    }

    /// The circuit breaker guarding this target
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Authenticated POST with a JSON body
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        api_key: &str,
    ) -> Result<serde_json::Value, ClientError> {
        self.breaker.check().map_err(|_| ClientError::CircuitOpen)?;

        let url = format!("{}{}", self.base_url, path);
        let result = self
            .http
            .post(&url)
            .header("X-API-Key", api_key)
            .json(body)
            .send()
            .await;
        self.classify(result).await
    }

    /// Authenticated GET
    pub async fn get_json(
        &self,
        path: &str,
        api_key: &str,
    ) -> Result<serde_json::Value, ClientError> {
        self.breaker.check().map_err(|_| ClientError::CircuitOpen)?;

        let url = format!("{}{}", self.base_url, path);
        let result = self
            .http
            .get(&url)
            .header("X-API-Key", api_key)
            .send()
            .await;
        self.classify(result).await
    }

    /// Map a transport result to our error taxonomy and feed the breaker.
    async fn classify(
        &self,
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<serde_json::Value, ClientError> {
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(target = %self.base_url, "backend request timed out");
                self.breaker.record_failure();
                return Err(ClientError::Timeout);
            }
            Err(e) => {
                tracing::warn!(target = %self.base_url, error = %e, "backend transport error");
                self.breaker.record_failure();
                return Err(ClientError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_server_error() {
            tracing::warn!(target = %self.base_url, status = status.as_u16(), "backend server error");
            self.breaker.record_failure();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        // The backend answered: whatever the status, the target is alive
        self.breaker.record_success();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}
