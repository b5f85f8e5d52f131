//! Global atomic counters for the preview pipeline.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a session shuts down).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    evaluations_started: AtomicU64,
    evaluations_failed: AtomicU64,
    evaluations_timed_out: AtomicU64,
    results_superseded: AtomicU64,
    context_restarts: AtomicU64,
    stale_replies: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations_started: AtomicU64::new(0),
            evaluations_failed: AtomicU64::new(0),
            evaluations_timed_out: AtomicU64::new(0),
            results_superseded: AtomicU64::new(0),
            context_restarts: AtomicU64::new(0),
            stale_replies: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations_started(&self) {
        self.evaluations_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_started", "counter incremented");
    }

    /// Any failed evaluation, timeouts included.
    pub fn inc_evaluations_failed(&self) {
        self.evaluations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_failed", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.evaluations_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_timed_out", "counter incremented");
    }

    /// A completed evaluation was discarded because a newer one was issued.
    pub fn inc_superseded(&self) {
        self.results_superseded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "results_superseded", "counter incremented");
    }

    pub fn inc_restarts(&self) {
        self.context_restarts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "context_restarts", "counter incremented");
    }

    /// A reply arrived for a correlation id nobody is waiting on.
    pub fn inc_stale_replies(&self) {
        self.stale_replies.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stale_replies", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations_started = self.evaluations_started(),
            evaluations_failed = self.evaluations_failed(),
            evaluations_timed_out = self.evaluations_timed_out(),
            results_superseded = self.results_superseded(),
            context_restarts = self.context_restarts(),
            stale_replies = self.stale_replies(),
        );
    }

    pub fn evaluations_started(&self) -> u64 {
        self.evaluations_started.load(Ordering::Relaxed)
    }

    pub fn evaluations_failed(&self) -> u64 {
        self.evaluations_failed.load(Ordering::Relaxed)
    }

    pub fn evaluations_timed_out(&self) -> u64 {
        self.evaluations_timed_out.load(Ordering::Relaxed)
    }

    pub fn results_superseded(&self) -> u64 {
        self.results_superseded.load(Ordering::Relaxed)
    }

    pub fn context_restarts(&self) -> u64 {
        self.context_restarts.load(Ordering::Relaxed)
    }

    pub fn stale_replies(&self) -> u64 {
        self.stale_replies.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.evaluations_started.store(0, Ordering::Relaxed);
        self.evaluations_failed.store(0, Ordering::Relaxed);
        self.evaluations_timed_out.store(0, Ordering::Relaxed);
        self.results_superseded.store(0, Ordering::Relaxed);
        self.context_restarts.store(0, Ordering::Relaxed);
        self.stale_replies.store(0, Ordering::Relaxed);
    }
}
