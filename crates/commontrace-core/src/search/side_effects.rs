//! Fire-and-forget retrieval side-effects.
//!
//! After a search response is assembled, three analytic writes happen off
//! the hot path: retrieval counters, retrieval logs, and Hebbian
//! co-retrieval edges. They are at-least-once best-effort - failures are
//! logged, never surfaced, and the response is returned intact either way.
//!
//! Tasks are tracked so the runtime does not discard them before
//! completion; a cap bounds in-flight work, logging and dropping on
//! backpressure. Without a tokio runtime (tests, CLI one-shots) the jobs
//! degrade to inline execution.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::storage::Store;

/// Co-retrieval pairs are generated from at most this many results
/// (quadratic pair explosion guard)
pub const MAX_CO_RETRIEVAL_TRACES: usize = 10;

/// Upper bound on tracked in-flight side-effect tasks
const MAX_IN_FLIGHT: usize = 256;

/// Tracked set of detached background tasks
pub struct SideEffects {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for SideEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl SideEffects {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Run a job off the hot path. With a runtime present the job lands on
    /// the blocking pool and its handle is tracked; otherwise it runs
    /// inline.
    pub fn spawn<F>(&self, label: &'static str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let Ok(mut tasks) = self.tasks.lock() else {
                    job();
                    return;
                };
                tasks.retain(|t| !t.is_finished());
                if tasks.len() >= MAX_IN_FLIGHT {
                    tracing::warn!(label, "side-effect dropped: backpressure cap reached");
                    return;
                }
                tasks.push(handle.spawn_blocking(job));
            }
            Err(_) => job(),
        }
    }

    /// Currently tracked (possibly finished but unreaped) task count
    pub fn in_flight(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }
}

/// Dispatch all three retrieval side-effects for one search response.
///
/// A fresh `search_session_id` ties the log rows of this response
/// together for later co-retrieval and RIF analysis.
pub(crate) fn dispatch(
    store: Arc<Store>,
    effects: &SideEffects,
    trace_ids: Vec<Uuid>,
    now: DateTime<Utc>,
) {
    if trace_ids.is_empty() {
        return;
    }
    let session_id = Uuid::new_v4().to_string();

    // (a) retrieval counters (testing effect: each retrieval strengthens)
    {
        let store = Arc::clone(&store);
        let ids = trace_ids.clone();
        effects.spawn("record_retrievals", move || {
            if let Err(e) = store.record_retrievals(&ids, now) {
                tracing::warn!(error = %e, count = ids.len(), "retrieval tracking failed");
            }
        });
    }

    // (b) retrieval logs with result positions
    {
        let store = Arc::clone(&store);
        let entries: Vec<(Uuid, usize)> = trace_ids
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();
        let session = session_id.clone();
        effects.spawn("record_retrieval_logs", move || {
            if let Err(e) = store.insert_retrieval_logs(&entries, &session, now) {
                tracing::warn!(error = %e, session = %session, "retrieval log failed");
            }
        });
    }

    // (c) bidirectional CO_RETRIEVED edges over the leading results
    {
        let capped: Vec<Uuid> = trace_ids
            .iter()
            .take(MAX_CO_RETRIEVAL_TRACES)
            .copied()
            .collect();
        if capped.len() >= 2 {
            effects.spawn("record_co_retrievals", move || {
                for i in 0..capped.len() {
                    for j in (i + 1)..capped.len() {
                        for (src, tgt) in [(capped[i], capped[j]), (capped[j], capped[i])] {
                            if let Err(e) = store.upsert_co_retrieved(src, tgt, now) {
                                tracing::warn!(error = %e, "co-retrieval upsert failed");
                                return;
                            }
                        }
                    }
                }
            });
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_execution_without_runtime() {
        let effects = SideEffects::new();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        effects.spawn("test", move || {
            *flag.lock().unwrap() = true;
        });
        assert!(*ran.lock().unwrap());
        assert_eq!(effects.in_flight(), 0);
    }
}
