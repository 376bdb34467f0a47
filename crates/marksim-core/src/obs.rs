//! Structured observability hooks for the job lifecycle.
//!
//! This module provides:
//! - A job-scoped tracing span via [`job_span`]
//! - Emission functions for lifecycle events: submit, start, candidate
//!   settled, stage failure, aggregation failure, finish
//! - [`emit_reasoning_usage`], one event per reasoning call with its token
//!   counts and cost
//!
//! Events are emitted at `info!` (failures at `warn!`, engine defects at
//! `error!`). Filter with `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{error, info, warn};

use crate::domain::{CandidateStatus, CollaboratorError, JobStatus, StageKind};
use crate::metrics::TokenUsage;

/// Job-scoped span. Attach it to the scheduler future with
/// [`tracing::Instrument::instrument`] so every event it logs carries the id.
///
/// ```ignore
/// tokio::spawn(scheduler.run(job_id).instrument(job_span("3f2a...")));
/// ```
pub fn job_span(job_id: &str) -> tracing::Span {
    tracing::info_span!("marksim.job", job_id = %job_id)
}

/// Emit event: job accepted with `candidates` entries.
pub fn emit_job_submitted(job_id: &str, candidates: usize) {
    info!(event = "job.submitted", job_id = %job_id, candidates = candidates);
}

/// Emit event: scheduler started with `workers` workers.
pub fn emit_job_started(job_id: &str, workers: usize) {
    info!(event = "job.started", job_id = %job_id, workers = workers);
}

/// Emit event: one candidate reached a settled status.
pub fn emit_candidate_settled(
    job_id: &str,
    candidate_id: &str,
    status: CandidateStatus,
    failed_stages: usize,
) {
    info!(
        event = "candidate.settled",
        job_id = %job_id,
        candidate_id = %candidate_id,
        status = %status,
        failed_stages = failed_stages,
    );
}

/// Emit event: one stage call failed and was recorded (warning level).
/// Timeouts carry `timed_out=true`.
pub fn emit_stage_failed(candidate_id: &str, stage: StageKind, error: &CollaboratorError) {
    warn!(
        event = "stage.failed",
        candidate_id = %candidate_id,
        stage = %stage,
        timed_out = error.is_timeout(),
        error = %error,
    );
}

/// Emit event: token usage and cost of one reasoning call.
pub fn emit_reasoning_usage(
    role: &str,
    model: &str,
    usage: &TokenUsage,
    call_cost_usd: f64,
    total_cost_usd: f64,
) {
    info!(
        event = "reasoning.usage",
        role = %role,
        model = %model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total(),
        call_cost_usd = call_cost_usd,
        total_cost_usd = total_cost_usd,
    );
}

/// Emit event: document retrieval failed; the pipeline continues with an empty bundle.
pub fn emit_documents_unavailable(candidate_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "documents.unavailable", candidate_id = %candidate_id, error = %error);
}

/// Emit event: narrative synthesis failed; the numeric summary is kept.
pub fn emit_aggregation_error(job_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "aggregate.narrative_failed", job_id = %job_id, error = %error);
}

/// Emit event: an engine invariant was violated (error level).
pub fn emit_internal_error(job_id: &str, error: &dyn std::fmt::Display) {
    error!(event = "job.internal_error", job_id = %job_id, error = %error);
}

/// Emit event: a candidate pipeline panicked; the candidate settles as `Failed`.
pub fn emit_candidate_panicked(candidate_id: &str, reason: &str) {
    error!(event = "candidate.panicked", candidate_id = %candidate_id, reason = %reason);
}

/// Emit event: job reached a terminal status.
pub fn emit_job_finished(job_id: &str, status: JobStatus, duration_ms: u64, settled: usize) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        status = %status,
        duration_ms = duration_ms,
        settled = settled,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_span_create() {
        let span = job_span("test-job-id");
        let _entered = span.enter();
    }
}
