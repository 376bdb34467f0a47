//! Bounded worker pool for one job.
//!
//! `max_concurrency` workers pull candidate indices from a shared FIFO queue
//! in submission order. Each pipeline runs on its own task so a panic is
//! contained to that candidate and reported as `Failed`. Once every worker
//! is idle the aggregator runs and the job is marked terminal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, Instrument};

use crate::artifact;
use crate::domain::{CandidateStatus, CandidateTask, JobId, Result, SimError};
use crate::manager::JobManager;
use crate::metrics::METRICS;
use crate::obs::{emit_candidate_panicked, emit_internal_error, emit_job_finished, emit_job_started};

pub struct Scheduler {
    manager: Arc<JobManager>,
}

impl Scheduler {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }

    /// Drive `job_id` from `Pending` to a terminal status.
    pub async fn run(self, job_id: JobId) {
        let started = Instant::now();
        let outcome = self.schedule(&job_id).await;

        let terminal = match outcome {
            Ok(()) => match self.manager.get_status(&job_id).await {
                Ok(snapshot) => {
                    let report = self.manager.aggregator().aggregate(&snapshot).await;
                    self.manager.mark_terminal(&job_id, Some(report), None).await
                }
                Err(e) => Err(e),
            },
            Err(e) => self.manager.mark_terminal(&job_id, None, Some(e.to_string())).await,
        };

        match terminal {
            Ok(status) => {
                let settled = self
                    .manager
                    .get_status(&job_id)
                    .await
                    .map(|job| job.candidates.iter().filter(|c| c.status.is_settled()).count())
                    .unwrap_or(0);
                emit_job_finished(
                    job_id.as_str(),
                    status,
                    started.elapsed().as_millis() as u64,
                    settled,
                );
            }
            Err(e) => emit_internal_error(job_id.as_str(), &e),
        }
        METRICS.flush();
    }

    async fn schedule(&self, job_id: &JobId) -> Result<()> {
        let total = self.manager.get_status(job_id).await?.candidates.len();
        self.manager.mark_running(job_id).await?;

        let workers = self.manager.config().max_concurrency.min(total).max(1);
        emit_job_started(job_id.as_str(), workers);

        let queue = Arc::new(Mutex::new((0..total).collect::<VecDeque<usize>>()));
        let mut set = JoinSet::new();
        for worker in 0..workers {
            let manager = Arc::clone(&self.manager);
            let queue = Arc::clone(&queue);
            let job_id = job_id.clone();
            set.spawn(
                work(manager, queue, job_id)
                    .instrument(tracing::debug_span!("marksim.worker", worker = worker)),
            );
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| SimError::JobInternal(format!("worker died: {e}")));
            if let Err(e) = result.and_then(|r| r) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn work(
    manager: Arc<JobManager>,
    queue: Arc<Mutex<VecDeque<usize>>>,
    job_id: JobId,
) -> Result<()> {
    loop {
        let Some(index) = queue.lock().await.pop_front() else {
            return Ok(());
        };
        let Some(task) = manager.begin_candidate(&job_id, index).await? else {
            continue;
        };

        let query = manager.query(&job_id).await?;
        let pipeline = manager.pipeline().clone();
        let fallback = task.clone();
        let handle = tokio::spawn(
            async move { pipeline.run(&query, task).await }.in_current_span(),
        );

        let settled = match handle.await {
            Ok(run) => {
                let dir = manager.config().artifacts_dir.as_deref();
                artifact::record_run(dir, &job_id, &run).await;
                run.task
            }
            Err(e) => panicked(fallback, &e.to_string()),
        };
        debug!(candidate_id = %settled.candidate_id, status = %settled.status, "pipeline finished");
        manager.apply_candidate_result(&job_id, index, settled).await?;
    }
}

/// Settle a candidate whose pipeline task panicked or was aborted.
fn panicked(mut task: CandidateTask, reason: &str) -> CandidateTask {
    emit_candidate_panicked(&task.candidate_id, reason);
    task.status = CandidateStatus::Failed;
    task.final_scores = None;
    task.error = Some(format!("pipeline aborted: {reason}"));
    task.finished_at = Some(Utc::now());
    task
}
