//! Process-wide engine counters.
//!
//! Candidates are counted per settled status, stage failures split out the
//! timeout class, and reasoning calls accumulate token usage and cost. The
//! scheduler logs a [`MetricsSnapshot`] through [`Metrics::flush`] whenever a
//! job ends.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::{CandidateStatus, CollaboratorError};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Cost is accumulated in nano-dollars so it fits an atomic integer.
const NANOS_PER_USD: f64 = 1_000_000_000.0;

/// Token counts reported by the reasoning service for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// `total_tokens` when the provider sent it, else prompt + completion.
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_cancelled: u64,
    pub candidates_done: u64,
    pub candidates_degraded: u64,
    pub candidates_failed: u64,
    pub candidates_cancelled: u64,
    pub stage_failures: u64,
    pub stage_timeouts: u64,
    pub reasoning_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl MetricsSnapshot {
    pub fn candidates_settled(&self) -> u64 {
        self.candidates_done
            + self.candidates_degraded
            + self.candidates_failed
            + self.candidates_cancelled
    }
}

pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_cancelled: AtomicU64,
    candidates_done: AtomicU64,
    candidates_degraded: AtomicU64,
    candidates_failed: AtomicU64,
    candidates_cancelled: AtomicU64,
    stage_failures: AtomicU64,
    stage_timeouts: AtomicU64,
    reasoning_calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    cost_nanos: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            candidates_done: AtomicU64::new(0),
            candidates_degraded: AtomicU64::new(0),
            candidates_failed: AtomicU64::new(0),
            candidates_cancelled: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            stage_timeouts: AtomicU64::new(0),
            reasoning_calls: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            cost_nanos: AtomicU64::new(0),
        }
    }

    pub fn inc_jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_cancelled(&self) {
        self.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a candidate that reached `status`. Unsettled statuses are ignored.
    pub fn record_candidate(&self, status: CandidateStatus) {
        let counter = match status {
            CandidateStatus::Done => &self.candidates_done,
            CandidateStatus::Degraded => &self.candidates_degraded,
            CandidateStatus::Failed => &self.candidates_failed,
            CandidateStatus::Cancelled => &self.candidates_cancelled,
            CandidateStatus::Queued | CandidateStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "candidates", status = %status, "counter incremented");
    }

    pub fn record_stage_failure(&self, error: &CollaboratorError) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
        if error.is_timeout() {
            self.stage_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Add one reasoning call's tokens and its cost in USD.
    pub fn record_usage(&self, usage: &TokenUsage, cost_usd: f64) {
        self.reasoning_calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.cost_nanos
            .fetch_add(usd_to_nanos(cost_usd), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            candidates_done: self.candidates_done.load(Ordering::Relaxed),
            candidates_degraded: self.candidates_degraded.load(Ordering::Relaxed),
            candidates_failed: self.candidates_failed.load(Ordering::Relaxed),
            candidates_cancelled: self.candidates_cancelled.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            stage_timeouts: self.stage_timeouts.load(Ordering::Relaxed),
            reasoning_calls: self.reasoning_calls.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            cost_usd: self.cost_nanos.load(Ordering::Relaxed) as f64 / NANOS_PER_USD,
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            jobs_submitted = s.jobs_submitted,
            jobs_cancelled = s.jobs_cancelled,
            candidates_settled = s.candidates_settled(),
            candidates_failed = s.candidates_failed,
            stage_failures = s.stage_failures,
            stage_timeouts = s.stage_timeouts,
            reasoning_calls = s.reasoning_calls,
            prompt_tokens = s.prompt_tokens,
            completion_tokens = s.completion_tokens,
            cost_usd = s.cost_usd,
        );
    }
}

fn usd_to_nanos(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * NANOS_PER_USD).round() as u64
    } else {
        0
    }
}
