//! Per-candidate debug artifacts.
//!
//! When an artifacts directory is configured, every settled candidate is
//! written to `<dir>/<job_id>/<candidate_id>.json` with the case context the
//! stages saw and the full stage log. Nothing in the engine reads these back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::{CandidateStatus, FinalScores, JobId, Result, SimError, StageOutput};
use crate::pipeline::PipelineRun;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateArtifact {
    pub job_id: JobId,
    pub candidate_id: String,
    pub status: CandidateStatus,
    pub written_at: DateTime<Utc>,
    pub case_context: String,
    pub stage_outputs: Vec<StageOutput>,
    pub final_scores: Option<FinalScores>,
    #[serde(default)]
    pub documents_error: Option<String>,
}

impl CandidateArtifact {
    pub fn from_run(job_id: &JobId, run: &PipelineRun) -> Self {
        Self {
            job_id: job_id.clone(),
            candidate_id: run.task.candidate_id.clone(),
            status: run.task.status,
            written_at: Utc::now(),
            case_context: run.case_context.clone(),
            stage_outputs: run.task.stage_outputs.clone(),
            final_scores: run.task.final_scores,
            documents_error: run.task.documents_error.clone(),
        }
    }
}

/// Candidate ids come from upstream registries; keep them filesystem safe.
/// An id that had to be rewritten gets a digest suffix so that two distinct
/// ids never share a file.
fn file_stem(candidate_id: &str) -> String {
    let safe: String = candidate_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == candidate_id {
        return safe;
    }
    let mut hasher = Sha256::new();
    hasher.update(candidate_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{safe}-{}", &digest[..8])
}

/// Write `artifact` to `<dir>/<job_id>/<candidate_id>.json` and return the path.
pub fn write_candidate_artifact(artifact: &CandidateArtifact, dir: &Path) -> Result<PathBuf> {
    let job_dir = dir.join(artifact.job_id.as_str());
    std::fs::create_dir_all(&job_dir)?;

    let path = job_dir.join(format!("{}.json", file_stem(&artifact.candidate_id)));
    let json = serde_json::to_vec_pretty(artifact)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Best-effort variant used by the scheduler. The write runs on the blocking
/// pool; failures are logged and dropped.
pub async fn record_run(dir: Option<&Path>, job_id: &JobId, run: &PipelineRun) {
    let Some(dir) = dir else {
        return;
    };
    let artifact = CandidateArtifact::from_run(job_id, run);
    let candidate_id = artifact.candidate_id.clone();
    let dir = dir.to_path_buf();

    let written = tokio::task::spawn_blocking(move || write_candidate_artifact(&artifact, &dir))
        .await
        .map_err(|e| SimError::JobInternal(format!("artifact writer died: {e}")))
        .and_then(|r| r);
    if let Err(e) = written {
        warn!(
            job_id = %job_id,
            candidate_id = %candidate_id,
            error = %e,
            "failed to write candidate artifact"
        );
    }
}
