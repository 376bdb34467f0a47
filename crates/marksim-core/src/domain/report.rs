//! The aggregated per-job report.

use serde::{Deserialize, Serialize};

use super::candidate::CandidateStatus;

/// A scored candidate in report order (highest conflict first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate_id: String,
    pub title: String,
    pub status: CandidateStatus,
    pub conflict: f64,
    pub registrability: f64,
}

/// Summary over every settled candidate of a job.
///
/// Counters and means are computed from `final_scores` alone and do not depend
/// on whether the narrative call succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallReport {
    pub total_submitted: usize,
    pub settled: usize,
    pub done: usize,
    pub degraded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Scored candidates at or above the high-risk threshold.
    pub high_risk: usize,
    pub high_risk_threshold: f64,
    pub mean_conflict: f64,
    pub mean_registrability: f64,
    /// Deterministic text built from the counters.
    pub summary_text: String,
    /// Synthesized narrative; empty when the call failed or was skipped.
    pub narrative: String,
    pub narrative_error: Option<String>,
    pub ranked: Vec<RankedCandidate>,
}

impl OverallReport {
    /// Number of candidates that carry final scores.
    pub fn scored(&self) -> usize {
        self.done + self.degraded
    }
}
