//! Job record and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::{CandidateInput, CandidateStatus, CandidateTask, QueryContext};
use super::report::OverallReport;

/// Opaque job handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        JobId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// `Pending -> Running -> {Complete | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The only legal edges of the lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A submitted batch of candidates. Owned by the `JobManager`; everything
/// else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub query: QueryContext,
    /// Submission order.
    pub candidates: Vec<CandidateTask>,
    /// Set once, never cleared.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_report: Option<OverallReport>,
    pub failure_reason: Option<String>,
}

impl SimulationJob {
    pub fn new(query: QueryContext, inputs: &[CandidateInput]) -> Self {
        Self {
            job_id: JobId::new(),
            status: JobStatus::Pending,
            query,
            candidates: inputs.iter().map(CandidateTask::from_input).collect(),
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            overall_report: None,
            failure_reason: None,
        }
    }

    pub fn count(&self, status: CandidateStatus) -> usize {
        self.candidates.iter().filter(|c| c.status == status).count()
    }

    pub fn running_count(&self) -> usize {
        self.count(CandidateStatus::Running)
    }

    pub fn all_settled(&self) -> bool {
        self.candidates.iter().all(|c| c.status.is_settled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Complete,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_pending_only_moves_to_running() {
        let targets: Vec<_> = ALL
            .into_iter()
            .filter(|to| JobStatus::Pending.can_transition_to(*to))
            .collect();
        assert_eq!(targets, vec![JobStatus::Running]);
    }

    #[test]
    fn test_job_id_is_unique_and_transparent_on_the_wire() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"{a}\""));
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&JobStatus::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }
}
