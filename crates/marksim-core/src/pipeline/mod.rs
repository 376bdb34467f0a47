//! The per-candidate five-stage pipeline.
//!
//! `Examiner -> Applicant -> ExaminerRebuttal -> Reporter -> Scorer`, strictly
//! sequential. Every stage appends exactly one [`StageOutput`] to the
//! candidate's log; a failed call is recorded and the chain continues with
//! whatever text is available.
//!
//! Settlement:
//! - scorer failed → `Failed`, no scores
//! - scorer succeeded, an earlier stage failed → `Degraded`
//! - every stage succeeded → `Done`

pub mod prompt;
pub mod scoring;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::collaborator::{DocumentSource, ReasoningService};
use crate::config::EngineConfig;
use crate::domain::{
    CandidateStatus, CandidateTask, CollabResult, CollaboratorError, DocumentBundle,
    QueryContext, StageKind, StageOutput,
};
use crate::metrics::METRICS;
use crate::obs::{emit_documents_unavailable, emit_stage_failed};

/// A finished pipeline run: the settled task plus the context it was built on.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub task: CandidateTask,
    pub case_context: String,
}

/// Drives one candidate through the stage chain.
#[derive(Clone)]
pub struct CandidatePipeline {
    documents: Arc<dyn DocumentSource>,
    reasoning: Arc<dyn ReasoningService>,
    stage_timeout: Duration,
    fetch_timeout: Duration,
    pipeline_weight: f64,
}

/// Await `call` for at most `limit`; elapsed time maps to `Timeout`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = CollabResult<T>>,
) -> CollabResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            after_ms: limit.as_millis() as u64,
        }),
    }
}

impl CandidatePipeline {
    pub fn new(
        documents: Arc<dyn DocumentSource>,
        reasoning: Arc<dyn ReasoningService>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            documents,
            reasoning,
            stage_timeout: config.stage_timeout,
            fetch_timeout: config.fetch_timeout,
            pipeline_weight: config.pipeline_weight,
        }
    }

    /// Run every stage for `task` and settle it.
    ///
    /// Never returns an error: collaborator failures end up in the stage log,
    /// and a broken stage-order invariant settles the task as `Failed`.
    #[instrument(skip_all, fields(candidate_id = %task.candidate_id))]
    pub async fn run(&self, query: &QueryContext, mut task: CandidateTask) -> PipelineRun {
        task.status = CandidateStatus::Running;
        task.started_at.get_or_insert_with(Utc::now);

        let bundle = match bounded(self.fetch_timeout, self.documents.fetch(&task.candidate_id))
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                emit_documents_unavailable(&task.candidate_id, &e);
                task.documents_error = Some(e.to_string());
                DocumentBundle::empty()
            }
        };
        let case_context = prompt::case_context(query, &task, &bundle);

        for stage in StageKind::ORDER {
            let output = self.run_stage(stage, &task, &case_context).await;
            if let Err(e) = task.push_stage(output) {
                task.error = Some(e.to_string());
                break;
            }
        }

        self.settle(&mut task);
        PipelineRun { task, case_context }
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        task: &CandidateTask,
        case_context: &str,
    ) -> StageOutput {
        let request = prompt::stage_request(stage, task, case_context);
        debug!(stage = %stage, "invoking reasoning service");
        let reply = bounded(self.stage_timeout, self.reasoning.invoke(request)).await;

        let outcome = reply.and_then(|text| {
            if stage.is_structured() {
                scoring::parse_scorer_reply(&text)
                    .map(|(verdict, display)| StageOutput::scored(display, verdict))
            } else {
                Ok(StageOutput::success(stage, text.trim()))
            }
        });

        match outcome {
            Ok(output) => output,
            Err(e) => {
                emit_stage_failed(&task.candidate_id, stage, &e);
                METRICS.record_stage_failure(&e);
                StageOutput::failure(stage, &e)
            }
        }
    }

    fn settle(&self, task: &mut CandidateTask) {
        let verdict = task
            .stage(StageKind::Scorer)
            .filter(|s| s.succeeded)
            .and_then(|s| s.verdict.clone());

        match verdict {
            Some(verdict) if task.error.is_none() => {
                task.final_scores = Some(scoring::blend(
                    &verdict,
                    task.heuristic_score,
                    self.pipeline_weight,
                ));
                task.status = if task.failed_stage_count() > 0 {
                    CandidateStatus::Degraded
                } else {
                    CandidateStatus::Done
                };
            }
            _ => {
                task.final_scores = None;
                task.status = CandidateStatus::Failed;
                if task.error.is_none() {
                    let reason = task
                        .stage(StageKind::Scorer)
                        .and_then(|s| s.error.clone())
                        .unwrap_or_else(|| "scorer produced no usable output".to_string());
                    task.error = Some(reason);
                }
            }
        }
        task.notes = scoring::candidate_notes(task);
        task.finished_at = Some(Utc::now());
    }
}
