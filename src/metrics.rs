use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Metrics {
    rounds_created: Arc<AtomicU64>,
    rounds_succeeded: Arc<AtomicU64>,
    rounds_aborted: Arc<AtomicU64>,
    inputs_registered: Arc<AtomicU64>,
    inputs_banned: Arc<AtomicU64>,
    outputs_registered: Arc<AtomicU64>,
    credentials_issued: Arc<AtomicU64>,
    requests_rejected: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_rounds_created(&self) {
        self.rounds_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_succeeded(&self) {
        self.rounds_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_aborted(&self) {
        self.rounds_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_inputs_registered(&self) {
        self.inputs_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_inputs_banned(&self) {
        self.inputs_banned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_outputs_registered(&self) {
        self.outputs_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_credentials_issued(&self, count: usize) {
        self.credentials_issued.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn inc_requests_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rounds_succeeded(&self) -> u64 {
        self.rounds_succeeded.load(Ordering::Relaxed)
    }

    pub fn inputs_banned(&self) -> u64 {
        self.inputs_banned.load(Ordering::Relaxed)
    }

    pub fn credentials_issued(&self) -> u64 {
        self.credentials_issued.load(Ordering::Relaxed)
    }

    pub fn report(&self) {
        tracing::info!(
            "Metrics: rounds={} succeeded={} aborted={} inputs={} banned={} outputs={} credentials={} rejected={}",
            self.rounds_created.load(Ordering::Relaxed),
            self.rounds_succeeded.load(Ordering::Relaxed),
            self.rounds_aborted.load(Ordering::Relaxed),
            self.inputs_registered.load(Ordering::Relaxed),
            self.inputs_banned.load(Ordering::Relaxed),
            self.outputs_registered.load(Ordering::Relaxed),
            self.credentials_issued.load(Ordering::Relaxed),
            self.requests_rejected.load(Ordering::Relaxed),
        );
    }
}
