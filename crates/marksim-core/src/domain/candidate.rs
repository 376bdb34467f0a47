//! Candidate input and per-candidate task state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::stage::{StageKind, StageOutput};

/// Which upstream search produced the candidate. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Image,
    Text,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Image => write!(f, "image"),
            Variant::Text => write!(f, "text"),
        }
    }
}

/// The user's mark under examination, shared by every candidate of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub trademark: String,
    #[serde(default)]
    pub goods_services: String,
}

/// One prior mark as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateInput {
    pub candidate_id: String,
    #[serde(default)]
    pub title: String,
    pub variant: Variant,
    /// Upstream similarity in `[0, 1]`; never recomputed here.
    pub heuristic_score: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub class_codes: Vec<String>,
}

impl CandidateInput {
    pub fn validate(&self) -> Result<()> {
        if self.candidate_id.trim().is_empty() {
            return Err(SimError::InvalidInput(
                "candidate_id must not be empty".to_string(),
            ));
        }
        if !self.heuristic_score.is_finite() {
            return Err(SimError::InvalidInput(format!(
                "candidate {} has a non-finite heuristic_score",
                self.candidate_id
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a candidate within a job.
///
/// `Cancelled` marks a candidate that was still queued when cancellation was
/// observed; it never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Queued,
    Running,
    Done,
    Degraded,
    Failed,
    Cancelled,
}

impl CandidateStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, CandidateStatus::Queued | CandidateStatus::Running)
    }

    /// Statuses that carry `final_scores`.
    pub fn is_scored(self) -> bool {
        matches!(self, CandidateStatus::Done | CandidateStatus::Degraded)
    }
}

impl std::fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CandidateStatus::Queued => "queued",
            CandidateStatus::Running => "running",
            CandidateStatus::Done => "done",
            CandidateStatus::Degraded => "degraded",
            CandidateStatus::Failed => "failed",
            CandidateStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Blended scores in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalScores {
    pub conflict: f64,
    pub registrability: f64,
}

/// Per-candidate state. Written only by the pipeline that runs it and
/// applied to the job by the `JobManager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTask {
    pub candidate_id: String,
    pub title: String,
    pub variant: Variant,
    pub heuristic_score: f64,
    pub prior_status: Option<String>,
    pub class_codes: Vec<String>,
    pub status: CandidateStatus,
    pub stage_outputs: Vec<StageOutput>,
    pub final_scores: Option<FinalScores>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Set when the pipeline could not produce any usable output.
    pub error: Option<String>,
    /// Document retrieval failure; the stages ran on an empty bundle.
    #[serde(default)]
    pub documents_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CandidateTask {
    pub fn from_input(input: &CandidateInput) -> Self {
        Self {
            candidate_id: input.candidate_id.clone(),
            title: input.title.clone(),
            variant: input.variant,
            heuristic_score: input.heuristic_score,
            prior_status: input.status.clone(),
            class_codes: input.class_codes.clone(),
            status: CandidateStatus::Queued,
            stage_outputs: Vec::new(),
            final_scores: None,
            notes: Vec::new(),
            error: None,
            documents_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Append to the stage log, enforcing fixed order without repeats.
    pub fn push_stage(&mut self, output: StageOutput) -> Result<()> {
        let expected = StageKind::ORDER.get(self.stage_outputs.len()).copied();
        if expected != Some(output.stage) {
            return Err(SimError::JobInternal(format!(
                "candidate {}: stage {} appended out of order (expected {:?})",
                self.candidate_id, output.stage, expected
            )));
        }
        self.stage_outputs.push(output);
        Ok(())
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageOutput> {
        self.stage_outputs.iter().find(|s| s.stage == kind)
    }

    /// Reporter text, when the reporter stage succeeded.
    pub fn reporter_summary(&self) -> Option<&str> {
        self.stage(StageKind::Reporter)
            .filter(|s| s.succeeded && !s.text.is_empty())
            .map(|s| s.text.as_str())
    }

    pub fn scorer_rationale(&self) -> Option<&str> {
        self.stage(StageKind::Scorer)
            .and_then(|s| s.verdict.as_ref())
            .and_then(|v| v.rationale.as_deref())
    }

    pub fn failed_stage_count(&self) -> usize {
        self.stage_outputs.iter().filter(|s| !s.succeeded).count()
    }

    /// Checks the stage log and score invariants for this task.
    pub fn is_well_formed(&self) -> bool {
        let prefix = self.stage_outputs.len() <= StageKind::ORDER.len()
            && self
                .stage_outputs
                .iter()
                .zip(StageKind::ORDER.iter())
                .all(|(out, kind)| out.stage == *kind);
        prefix && self.final_scores.is_some() == self.status.is_scored()
    }
}
