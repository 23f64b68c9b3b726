//! Shared health state for the /health endpoint.
//! Updated by the ingest coordinator, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct HealthState {
    /// Nanosecond timestamp of the last committed draw (0 = none yet).
    last_commit_at_ns: AtomicU64,
    /// Draws committed since process start.
    draws_committed: AtomicU64,
}

impl HealthState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_commit(&self, at_ns: u64) {
        self.last_commit_at_ns.store(at_ns, Ordering::Relaxed);
        self.draws_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_commit_at_ns(&self) -> u64 {
        self.last_commit_at_ns.load(Ordering::Relaxed)
    }

    pub fn draws_committed(&self) -> u64 {
        self.draws_committed.load(Ordering::Relaxed)
    }
}
