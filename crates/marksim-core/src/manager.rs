//! Job registry and lifecycle.
//!
//! The registry is a `RwLock<HashMap>` of per-job entries; each entry guards
//! its `SimulationJob` and `StreamPublisher` with one `Mutex`, so unrelated
//! jobs never contend and every state change is published from inside the
//! same critical section that applied it.
//!
//! Only the methods on [`JobManager`] mutate a job. The scheduler and the
//! pipeline hand back values; they never touch job state directly.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, Instrument};

use crate::aggregator::Aggregator;
use crate::collaborator::{DocumentSource, ReasoningService};
use crate::config::EngineConfig;
use crate::domain::{
    CandidateInput, CandidateStatus, CandidateTask, JobId, JobStatus, OverallReport,
    QueryContext, Result, SimError, SimulationJob,
};
use crate::metrics::METRICS;
use crate::obs::{emit_candidate_settled, emit_internal_error, emit_job_submitted, job_span};
use crate::pipeline::CandidatePipeline;
use crate::scheduler::Scheduler;
use crate::stream::{JobEventKind, StreamPublisher, Subscription};

#[derive(Debug)]
struct JobState {
    job: SimulationJob,
    publisher: StreamPublisher,
}

#[derive(Debug)]
struct JobEntry {
    state: Mutex<JobState>,
}

/// Owns every job of the process.
pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    config: EngineConfig,
    pipeline: CandidatePipeline,
    aggregator: Aggregator,
}

/// Reject a submission before a job exists for it.
pub fn validate_submission(inputs: &[CandidateInput]) -> Result<()> {
    if inputs.is_empty() {
        return Err(SimError::InvalidInput(
            "at least one candidate is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for input in inputs {
        input.validate()?;
        if !seen.insert(input.candidate_id.as_str()) {
            return Err(SimError::InvalidInput(format!(
                "duplicate candidate_id {}",
                input.candidate_id
            )));
        }
    }
    Ok(())
}

impl JobManager {
    /// Build a manager over the given collaborators. Fails on an invalid config.
    pub fn new(
        config: EngineConfig,
        documents: Arc<dyn DocumentSource>,
        reasoning: Arc<dyn ReasoningService>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            pipeline: CandidatePipeline::new(documents, Arc::clone(&reasoning), &config),
            aggregator: Aggregator::new(reasoning, &config),
            jobs: RwLock::new(HashMap::new()),
            config,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn pipeline(&self) -> &CandidatePipeline {
        &self.pipeline
    }

    pub(crate) fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    async fn entry(&self, job_id: &JobId) -> Result<Arc<JobEntry>> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| SimError::JobNotFound(job_id.clone()))
    }

    /// Validate, store a `Pending` job and start its scheduler in the
    /// background. The job is visible to `get_status` before this returns.
    pub async fn create_job(
        self: &Arc<Self>,
        query: QueryContext,
        inputs: Vec<CandidateInput>,
    ) -> Result<JobId> {
        validate_submission(&inputs)?;

        let job = SimulationJob::new(query, &inputs);
        let job_id = job.job_id.clone();
        let entry = Arc::new(JobEntry {
            state: Mutex::new(JobState {
                job,
                publisher: StreamPublisher::new(),
            }),
        });
        self.jobs.write().await.insert(job_id.clone(), entry);

        METRICS.inc_jobs_submitted();
        emit_job_submitted(job_id.as_str(), inputs.len());

        let scheduler = Scheduler::new(Arc::clone(self));
        let span = job_span(job_id.as_str());
        tokio::spawn(scheduler.run(job_id.clone()).instrument(span));
        Ok(job_id)
    }

    /// Snapshot of the job.
    pub async fn get_status(&self, job_id: &JobId) -> Result<SimulationJob> {
        let entry = self.entry(job_id).await?;
        let state = entry.state.lock().await;
        Ok(state.job.clone())
    }

    pub(crate) async fn query(&self, job_id: &JobId) -> Result<QueryContext> {
        let entry = self.entry(job_id).await?;
        let state = entry.state.lock().await;
        Ok(state.job.query.clone())
    }

    /// Ids of every job currently held, in no particular order.
    pub async fn job_ids(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().cloned().collect()
    }

    /// Set `cancel_requested`. Idempotent; never changes `status` itself.
    ///
    /// Returns `true` while the job is still able to react (not terminal).
    pub async fn request_cancel(&self, job_id: &JobId) -> Result<bool> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        let JobState { job, publisher } = &mut *state;

        if job.status.is_terminal() {
            return Ok(false);
        }
        if !job.cancel_requested {
            job.cancel_requested = true;
            METRICS.inc_jobs_cancelled();
            info!(job_id = %job_id, "cancel requested");
            publisher.publish(JobEventKind::CancelRequested, job);
        }
        Ok(true)
    }

    /// Register a listener; it first receives the current snapshot.
    pub async fn subscribe(&self, job_id: &JobId) -> Result<Subscription> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        let JobState { job, publisher } = &mut *state;
        Ok(publisher.subscribe(job))
    }

    /// `Pending -> Running`.
    pub(crate) async fn mark_running(&self, job_id: &JobId) -> Result<()> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        let JobState { job, publisher } = &mut *state;

        transition(job, JobStatus::Running)?;
        job.started_at = Some(Utc::now());
        publisher.publish(JobEventKind::StatusChanged, job);
        Ok(())
    }

    /// Move candidate `index` out of `Queued`.
    ///
    /// The cancel flag is checked in the same critical section that marks
    /// the candidate `Running`, so once a cancel has been observed no queued
    /// candidate can start. A skipped candidate settles as `Cancelled` and
    /// `None` is returned.
    pub(crate) async fn begin_candidate(
        &self,
        job_id: &JobId,
        index: usize,
    ) -> Result<Option<CandidateTask>> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        let JobState { job, publisher } = &mut *state;

        let cancel_requested = job.cancel_requested;
        let task = job.candidates.get_mut(index).ok_or_else(|| {
            SimError::JobInternal(format!("candidate index {index} out of range"))
        })?;
        if task.status != CandidateStatus::Queued {
            return Err(SimError::JobInternal(format!(
                "candidate {} scheduled twice (status {})",
                task.candidate_id, task.status
            )));
        }

        let candidate_id = task.candidate_id.clone();
        if cancel_requested {
            task.status = CandidateStatus::Cancelled;
            task.finished_at = Some(Utc::now());
            debug!(candidate_id = %candidate_id, "skipped after cancel");
            METRICS.record_candidate(CandidateStatus::Cancelled);
            publisher.publish(JobEventKind::CandidateSettled { candidate_id }, job);
            return Ok(None);
        }

        task.status = CandidateStatus::Running;
        task.started_at = Some(Utc::now());
        let started = task.clone();
        publisher.publish(JobEventKind::CandidateStarted { candidate_id }, job);
        Ok(Some(started))
    }

    /// Store the settled result of a `Running` candidate.
    pub(crate) async fn apply_candidate_result(
        &self,
        job_id: &JobId,
        index: usize,
        result: CandidateTask,
    ) -> Result<()> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        let JobState { job, publisher } = &mut *state;

        let slot = job.candidates.get_mut(index).ok_or_else(|| {
            SimError::JobInternal(format!("candidate index {index} out of range"))
        })?;
        if slot.candidate_id != result.candidate_id {
            return Err(SimError::JobInternal(format!(
                "result for {} applied to slot of {}",
                result.candidate_id, slot.candidate_id
            )));
        }
        if slot.status != CandidateStatus::Running {
            return Err(SimError::JobInternal(format!(
                "candidate {} settled while {}",
                slot.candidate_id, slot.status
            )));
        }
        if !result.status.is_settled() || !result.is_well_formed() {
            return Err(SimError::JobInternal(format!(
                "candidate {} returned unsettled or malformed ({})",
                result.candidate_id, result.status
            )));
        }

        emit_candidate_settled(
            job_id.as_str(),
            &result.candidate_id,
            result.status,
            result.failed_stage_count(),
        );
        METRICS.record_candidate(result.status);

        let candidate_id = result.candidate_id.clone();
        *slot = result;
        publisher.publish(JobEventKind::CandidateSettled { candidate_id }, job);
        Ok(())
    }

    /// Final transition. The outcome is decided inside the critical section:
    /// `failure` → `Failed`; otherwise `Cancelled` if a cancel was ever
    /// requested, else `Complete`. The report is stored only when every
    /// candidate has settled.
    pub(crate) async fn mark_terminal(
        &self,
        job_id: &JobId,
        report: Option<OverallReport>,
        failure: Option<String>,
    ) -> Result<JobStatus> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        let JobState { job, publisher } = &mut *state;

        let next = match (&failure, job.cancel_requested) {
            (Some(_), _) => JobStatus::Failed,
            (None, true) => JobStatus::Cancelled,
            (None, false) => JobStatus::Complete,
        };
        if job.status == JobStatus::Pending && next == JobStatus::Failed {
            // A job that fails before scheduling still passes through Running.
            transition(job, JobStatus::Running)?;
            job.started_at = Some(Utc::now());
            publisher.publish(JobEventKind::StatusChanged, job);
        }
        transition(job, next)?;

        if let Some(reason) = failure {
            emit_internal_error(job_id.as_str(), &reason);
            let now = Utc::now();
            for task in job.candidates.iter_mut().filter(|t| !t.status.is_settled()) {
                task.status = if task.status == CandidateStatus::Queued {
                    CandidateStatus::Cancelled
                } else {
                    CandidateStatus::Failed
                };
                task.final_scores = None;
                task.error.get_or_insert_with(|| "job aborted".to_string());
                task.finished_at = Some(now);
            }
            job.failure_reason = Some(reason);
        } else if job.overall_report.is_none() && job.all_settled() {
            job.overall_report = report;
        }
        job.finished_at = Some(Utc::now());
        publisher.close(job);
        Ok(next)
    }

    /// Drop terminal jobs that finished more than `older_than` ago.
    /// Returns the number removed.
    pub async fn evict_finished(&self, older_than: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(d) => Utc::now() - d,
            Err(_) => return 0,
        };

        let entries: Vec<(JobId, Arc<JobEntry>)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(e)))
            .collect();

        let mut expired = Vec::new();
        for (id, entry) in entries {
            let state = entry.state.lock().await;
            let finished_before_cutoff = state.job.finished_at.is_some_and(|t| t < cutoff);
            if state.job.status.is_terminal() && finished_before_cutoff {
                expired.push(id);
            }
        }

        if expired.is_empty() {
            return 0;
        }
        let mut jobs = self.jobs.write().await;
        let removed = expired.iter().filter(|id| jobs.remove(*id).is_some()).count();
        info!(removed = removed, remaining = jobs.len(), "evicted finished jobs");
        removed
    }
}

fn transition(job: &mut SimulationJob, next: JobStatus) -> Result<()> {
    if !job.status.can_transition_to(next) {
        return Err(SimError::JobInternal(format!(
            "illegal job transition {} -> {} for {}",
            job.status, next, job.job_id
        )));
    }
    job.status = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Variant;
    use crate::fakes::{FakeDocuments, FakeReasoning};

    fn input(id: &str) -> CandidateInput {
        CandidateInput {
            candidate_id: id.to_string(),
            title: format!("MARK-{id}"),
            variant: Variant::Text,
            heuristic_score: 0.6,
            status: None,
            class_codes: vec![],
        }
    }

    fn manager() -> Arc<JobManager> {
        JobManager::new(
            EngineConfig::default(),
            Arc::new(FakeDocuments::new()),
            Arc::new(FakeReasoning::new()),
        )
        .unwrap()
    }

    /// A manager-held job with no scheduler attached, for driving the
    /// internal entry points by hand.
    async fn detached_job(m: &JobManager, ids: &[&str]) -> JobId {
        let inputs: Vec<_> = ids.iter().map(|id| input(id)).collect();
        let job = SimulationJob::new(QueryContext::default(), &inputs);
        let job_id = job.job_id.clone();
        m.jobs.write().await.insert(
            job_id.clone(),
            Arc::new(JobEntry {
                state: Mutex::new(JobState {
                    job,
                    publisher: StreamPublisher::new(),
                }),
            }),
        );
        job_id
    }

    #[test]
    fn test_validate_submission_rejects_empty_and_duplicates() {
        assert!(matches!(
            validate_submission(&[]),
            Err(SimError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_submission(&[input("a"), input("a")]),
            Err(SimError::InvalidInput(_))
        ));
        assert!(validate_submission(&[input("a"), input("b")]).is_ok());
    }

    #[tokio::test]
    async fn test_create_job_with_no_candidates_creates_nothing() {
        let m = manager();
        let err = m.create_job(QueryContext::default(), vec![]).await;
        assert!(matches!(err, Err(SimError::InvalidInput(_))));
        assert!(m.job_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let m = manager();
        let id = JobId::from("missing");
        assert!(matches!(m.get_status(&id).await, Err(SimError::JobNotFound(_))));
        assert!(matches!(m.request_cancel(&id).await, Err(SimError::JobNotFound(_))));
        assert!(m.subscribe(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_begin_candidate_after_cancel_skips() {
        let m = manager();
        let id = detached_job(&m, &["a", "b"]).await;
        m.mark_running(&id).await.unwrap();

        assert!(m.begin_candidate(&id, 0).await.unwrap().is_some());
        assert!(m.request_cancel(&id).await.unwrap());
        assert!(m.request_cancel(&id).await.unwrap());
        assert!(m.begin_candidate(&id, 1).await.unwrap().is_none());

        let job = m.get_status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.candidates[0].status, CandidateStatus::Running);
        assert_eq!(job.candidates[1].status, CandidateStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_candidate_cannot_start_twice() {
        let m = manager();
        let id = detached_job(&m, &["a"]).await;
        m.mark_running(&id).await.unwrap();
        m.begin_candidate(&id, 0).await.unwrap();
        assert!(matches!(
            m.begin_candidate(&id, 0).await,
            Err(SimError::JobInternal(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_rejects_unsettled_result() {
        let m = manager();
        let id = detached_job(&m, &["a"]).await;
        m.mark_running(&id).await.unwrap();
        let task = m.begin_candidate(&id, 0).await.unwrap().unwrap();
        assert!(matches!(
            m.apply_candidate_result(&id, 0, task).await,
            Err(SimError::JobInternal(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let m = manager();
        let id = detached_job(&m, &["a"]).await;
        m.mark_running(&id).await.unwrap();
        m.begin_candidate(&id, 0).await.unwrap();

        let status = m
            .mark_terminal(&id, None, Some("boom".to_string()))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert!(m.mark_terminal(&id, None, None).await.is_err());
        assert!(m.mark_running(&id).await.is_err());
        assert!(!m.request_cancel(&id).await.unwrap());

        let job = m.get_status(&id).await.unwrap();
        assert_eq!(job.failure_reason.as_deref(), Some("boom"));
        assert_eq!(job.candidates[0].status, CandidateStatus::Failed);
        assert!(job.overall_report.is_none());
    }

    #[tokio::test]
    async fn test_evict_finished_keeps_recent_and_active_jobs() {
        let m = manager();
        let done = detached_job(&m, &["a"]).await;
        let active = detached_job(&m, &["b"]).await;
        m.mark_running(&done).await.unwrap();
        m.mark_terminal(&done, None, Some("x".into())).await.unwrap();

        assert_eq!(m.evict_finished(Duration::from_secs(3600)).await, 0);
        assert_eq!(m.evict_finished(Duration::ZERO).await, 1);
        assert!(m.get_status(&done).await.is_err());
        assert!(m.get_status(&active).await.is_ok());
    }
}
