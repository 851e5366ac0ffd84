//! Shared application state and worker health tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use commontrace_core::Engine;

/// State handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health: Arc<WorkerHealth>,
    /// Write endpoints require this key when configured
    pub api_key: Option<String>,
}

/// Heartbeats from the background workers, read by the health endpoint.
/// A worker is healthy while its last beat is recent enough.
pub struct WorkerHealth {
    consolidation_beat: AtomicI64,
    embedding_beat: AtomicI64,
}

/// The embedding worker polls every 5s; allow generous slack
const EMBEDDING_HEALTH_WINDOW_SECS: i64 = 60;

impl WorkerHealth {
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        Self {
            consolidation_beat: AtomicI64::new(now),
            embedding_beat: AtomicI64::new(now),
        }
    }

    pub fn beat_consolidation(&self) {
        self.consolidation_beat
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn beat_embedding(&self) {
        self.embedding_beat
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Healthy while the last beat is within twice the cadence
    pub fn consolidation_healthy(&self, interval_hours: u64) -> bool {
        let age = Utc::now().timestamp() - self.consolidation_beat.load(Ordering::Relaxed);
        age <= (interval_hours as i64) * 3600 * 2
    }

    pub fn embedding_healthy(&self) -> bool {
        let age = Utc::now().timestamp() - self.embedding_beat.load(Ordering::Relaxed);
        age <= EMBEDDING_HEALTH_WINDOW_SECS
    }
}

impl Default for WorkerHealth {
    fn default() -> Self {
        Self::new()
    }
}
