//! End-to-end job runs against the scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use marksim_core::fakes::{FakeDocuments, FakeReasoning};
use marksim_core::{
    CandidateInput, CandidateStatus, EngineConfig, JobEvent, JobEventKind, JobId, JobManager,
    JobStatus, QueryContext, SimError, SimulationJob, StageKind, Subscription, Variant,
};

fn input(id: &str, heuristic: f64) -> CandidateInput {
    CandidateInput {
        candidate_id: id.to_string(),
        title: format!("MARK-{id}"),
        variant: Variant::Image,
        heuristic_score: heuristic,
        status: Some("registered".to_string()),
        class_codes: vec!["9".to_string(), "42".to_string()],
    }
}

fn inputs(ids: &[&str]) -> Vec<CandidateInput> {
    ids.iter().map(|id| input(id, 0.8)).collect()
}

fn query() -> QueryContext {
    QueryContext {
        trademark: "SUNRAISE".to_string(),
        goods_services: "coffee; tea".to_string(),
    }
}

fn manager_with(
    config: EngineConfig,
    docs: FakeDocuments,
    reasoning: Arc<FakeReasoning>,
) -> Arc<JobManager> {
    JobManager::new(config, Arc::new(docs), reasoning).expect("valid config")
}

async fn drain(mut sub: Subscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), sub.recv())
        .await
        .expect("stream stalled")
    {
        events.push(event);
    }
    events
}

async fn run_to_end(manager: &Arc<JobManager>, job_id: &JobId) -> (Vec<JobEvent>, SimulationJob) {
    let sub = manager.subscribe(job_id).await.unwrap();
    let events = drain(sub).await;
    let job = manager.get_status(job_id).await.unwrap();
    (events, job)
}

fn assert_legal_transitions(events: &[JobEvent]) {
    for pair in events.windows(2) {
        let (a, b) = (pair[0].status, pair[1].status);
        assert!(
            a == b || a.can_transition_to(b),
            "illegal transition observed: {a} -> {b}"
        );
        assert!(pair[1].seq > pair[0].seq, "events out of order");
    }
}

fn assert_candidates_well_formed(job: &SimulationJob) {
    for c in &job.candidates {
        assert!(c.is_well_formed(), "candidate {} malformed", c.candidate_id);
        assert!(c.status.is_settled(), "candidate {} left {}", c.candidate_id, c.status);
    }
}

#[tokio::test]
async fn test_three_candidates_all_succeed() {
    let reasoning = Arc::new(FakeReasoning::new());
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning.clone());

    let id = m.create_job(query(), inputs(&["a", "b", "c"])).await.unwrap();
    let (events, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert!(job
        .candidates
        .iter()
        .all(|c| c.status == CandidateStatus::Done));
    assert_candidates_well_formed(&job);

    let report = job.overall_report.as_ref().expect("report");
    assert_eq!(report.done, 3);
    assert_eq!(report.ranked.len(), 3);
    assert!(!report.narrative.is_empty());
    assert!(!report.summary_text.is_empty());
    assert_eq!(reasoning.synthesis_calls(), 1);

    // heuristic 0.8 -> 80 / 44; scorer 72 / 35; 50/50 blend
    let scores = job.candidates[0].final_scores.unwrap();
    assert_eq!(scores.conflict, 76.0);
    assert_eq!(scores.registrability, 39.5);
    assert_eq!(report.high_risk, 3);

    assert!(events.last().unwrap().is_terminal());
    assert_eq!(events.last().unwrap().snapshot, job);
    assert_legal_transitions(&events);
    assert!(job.started_at.is_some() && job.finished_at.is_some());
}

#[tokio::test]
async fn test_each_candidate_runs_stages_in_order() {
    let reasoning = Arc::new(FakeReasoning::new());
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning.clone());

    let id = m.create_job(query(), inputs(&["a", "b"])).await.unwrap();
    run_to_end(&m, &id).await;

    for candidate in ["a", "b"] {
        assert_eq!(reasoning.stages_called(candidate), StageKind::ORDER.to_vec());
    }
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let reasoning = Arc::new(FakeReasoning::new().with_latency(Duration::from_millis(15)));
    let config = EngineConfig::default().with_max_concurrency(2);
    let m = manager_with(config, FakeDocuments::new(), reasoning.clone());

    let id = m
        .create_job(query(), inputs(&["a", "b", "c", "d", "e"]))
        .await
        .unwrap();
    let (events, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert!(reasoning.max_in_flight() <= 2);
    for event in &events {
        assert!(event.snapshot.running_count() <= 2);
    }

    // sample every window start: at most 2 candidates active at that instant
    let windows = reasoning.candidate_windows();
    assert_eq!(windows.len(), 5);
    for (_, at, _) in &windows {
        let active = windows
            .iter()
            .filter(|(_, start, end)| start <= at && at < end)
            .count();
        assert!(active <= 2, "{active} candidates active at once");
    }
}

#[tokio::test]
async fn test_candidates_start_in_submission_order() {
    let reasoning = Arc::new(FakeReasoning::new().with_latency(Duration::from_millis(5)));
    let config = EngineConfig::default().with_max_concurrency(1);
    let m = manager_with(config, FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["c", "a", "b"])).await.unwrap();
    let (events, _) = run_to_end(&m, &id).await;

    let started: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.kind {
            JobEventKind::CandidateStarted { candidate_id } => Some(candidate_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_cancel_before_any_candidate_starts() {
    let reasoning = Arc::new(FakeReasoning::new());
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning.clone());

    // current-thread runtime: the scheduler cannot run before we yield
    let id = m
        .create_job(query(), inputs(&["a", "b", "c", "d"]))
        .await
        .unwrap();
    assert!(m.request_cancel(&id).await.unwrap());
    let (events, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.cancel_requested);
    assert!(job
        .candidates
        .iter()
        .all(|c| c.status == CandidateStatus::Cancelled && c.stage_outputs.is_empty()));
    assert!(reasoning.calls().is_empty());

    let report = job.overall_report.as_ref().expect("zero report");
    assert_eq!(report.cancelled, 4);
    assert_eq!(report.scored(), 0);
    assert_eq!(report.mean_conflict, 0.0);
    assert!(report.narrative.is_empty());
    assert!(!events
        .iter()
        .any(|e| matches!(e.kind, JobEventKind::CandidateStarted { .. })));
}

#[tokio::test]
async fn test_cancel_lets_running_candidate_finish() {
    let reasoning = Arc::new(FakeReasoning::new().with_latency(Duration::from_millis(20)));
    let config = EngineConfig::default().with_max_concurrency(1);
    let m = manager_with(config, FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["a", "b", "c"])).await.unwrap();
    let mut sub = m.subscribe(&id).await.unwrap();
    loop {
        let event = sub.recv().await.expect("stream ended early");
        if matches!(event.kind, JobEventKind::CandidateStarted { .. }) {
            break;
        }
    }
    m.request_cancel(&id).await.unwrap();
    drain(sub).await;

    let job = m.get_status(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.candidates[0].status, CandidateStatus::Done);
    assert_eq!(job.candidates[1].status, CandidateStatus::Cancelled);
    assert_eq!(job.candidates[2].status, CandidateStatus::Cancelled);

    let report = job.overall_report.unwrap();
    assert_eq!(report.done, 1);
    assert_eq!(report.cancelled, 2);
}

#[tokio::test]
async fn test_document_outage_never_strands_a_candidate() {
    let reasoning = Arc::new(FakeReasoning::new());
    let m = manager_with(
        EngineConfig::default(),
        FakeDocuments::new().always_fail(),
        reasoning,
    );

    let id = m.create_job(query(), inputs(&["a", "b", "c"])).await.unwrap();
    let (_, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_candidates_well_formed(&job);
    for c in &job.candidates {
        assert!(c.documents_error.is_some());
        assert_eq!(c.stage_outputs.len(), 5);
    }
}

#[tokio::test]
async fn test_one_failed_stage_degrades_only_that_candidate() {
    let reasoning = Arc::new(FakeReasoning::new().fail_stage("b", StageKind::ExaminerRebuttal));
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["a", "b", "c"])).await.unwrap();
    let (_, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    let status: Vec<_> = job.candidates.iter().map(|c| c.status).collect();
    assert_eq!(
        status,
        vec![
            CandidateStatus::Done,
            CandidateStatus::Degraded,
            CandidateStatus::Done
        ]
    );
    assert!(job.candidates[1].final_scores.is_some());
    assert_eq!(job.overall_report.unwrap().degraded, 1);
}

#[tokio::test]
async fn test_scorer_outage_fails_candidates_but_completes_job() {
    let reasoning = Arc::new(FakeReasoning::new().fail_stage_everywhere(StageKind::Scorer));
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning.clone());

    let id = m.create_job(query(), inputs(&["a", "b"])).await.unwrap();
    let (_, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert!(job
        .candidates
        .iter()
        .all(|c| c.status == CandidateStatus::Failed && c.final_scores.is_none()));
    let report = job.overall_report.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.scored(), 0);
    assert_eq!(reasoning.synthesis_calls(), 0);
}

#[tokio::test]
async fn test_panicking_pipeline_is_isolated() {
    let reasoning = Arc::new(FakeReasoning::new().panic_on("b"));
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["a", "b", "c"])).await.unwrap();
    let (_, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.candidates[0].status, CandidateStatus::Done);
    assert_eq!(job.candidates[1].status, CandidateStatus::Failed);
    assert!(job.candidates[1].error.as_deref().unwrap().contains("aborted"));
    assert_eq!(job.candidates[2].status, CandidateStatus::Done);
    assert_candidates_well_formed(&job);
}

#[tokio::test]
async fn test_narrative_failure_keeps_the_numeric_report() {
    let reasoning = Arc::new(FakeReasoning::new().fail_synthesis());
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["a", "b"])).await.unwrap();
    let (_, job) = run_to_end(&m, &id).await;

    assert_eq!(job.status, JobStatus::Complete);
    let report = job.overall_report.unwrap();
    assert!(report.narrative.is_empty());
    assert!(report.narrative_error.is_some());
    assert_eq!(report.done, 2);
    assert_eq!(report.mean_conflict, 76.0);
}

#[tokio::test]
async fn test_late_subscriber_gets_only_the_terminal_event() {
    let reasoning = Arc::new(FakeReasoning::new());
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["a"])).await.unwrap();
    run_to_end(&m, &id).await;

    let events = drain(m.subscribe(&id).await.unwrap()).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
    assert_eq!(events[0].status, JobStatus::Complete);
}

#[tokio::test]
async fn test_every_subscriber_sees_the_same_tail() {
    let reasoning = Arc::new(FakeReasoning::new().with_latency(Duration::from_millis(5)));
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning);

    let id = m.create_job(query(), inputs(&["a", "b"])).await.unwrap();
    let first = m.subscribe(&id).await.unwrap();
    let second = m.subscribe(&id).await.unwrap();
    let (a, b) = tokio::join!(drain(first), drain(second));

    assert_eq!(a.last().unwrap().seq, b.last().unwrap().seq);
    let settled_a = a
        .iter()
        .filter(|e| matches!(e.kind, JobEventKind::CandidateSettled { .. }))
        .count();
    assert_eq!(settled_a, 2);
    assert_legal_transitions(&a);
    assert_legal_transitions(&b);
}

#[tokio::test]
async fn test_artifacts_are_written_per_candidate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig::default().with_artifacts_dir(dir.path());
    let m = manager_with(config, FakeDocuments::new(), Arc::new(FakeReasoning::new()));

    let id = m.create_job(query(), inputs(&["a", "b"])).await.unwrap();
    run_to_end(&m, &id).await;

    for candidate in ["a", "b"] {
        let path = dir.path().join(id.as_str()).join(format!("{candidate}.json"));
        let raw = std::fs::read(&path).expect("artifact written");
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["candidate_id"], candidate);
        assert!(value["case_context"].as_str().unwrap().contains("SUNRAISE"));
        assert_eq!(value["stage_outputs"].as_array().unwrap().len(), 5);
    }
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected_synchronously() {
    let m = manager_with(
        EngineConfig::default(),
        FakeDocuments::new(),
        Arc::new(FakeReasoning::new()),
    );

    let err = m.create_job(query(), vec![]).await.unwrap_err();
    assert!(matches!(err, SimError::InvalidInput(_)));

    let err = m
        .create_job(query(), vec![input("a", f64::NAN)])
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidInput(_)));
    assert!(m.job_ids().await.is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = JobManager::new(
        EngineConfig::default().with_max_concurrency(0),
        Arc::new(FakeDocuments::new()),
        Arc::new(FakeReasoning::new()),
    );
    assert!(matches!(result, Err(SimError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_unrelated_jobs_run_independently() {
    let reasoning = Arc::new(FakeReasoning::new().with_latency(Duration::from_millis(5)));
    let m = manager_with(EngineConfig::default(), FakeDocuments::new(), reasoning);

    let first = m.create_job(query(), inputs(&["a", "b"])).await.unwrap();
    let second = m.create_job(query(), inputs(&["x"])).await.unwrap();
    m.request_cancel(&second).await.unwrap();

    let (_, one) = run_to_end(&m, &first).await;
    let (_, two) = run_to_end(&m, &second).await;
    assert_eq!(one.status, JobStatus::Complete);
    assert_eq!(two.status, JobStatus::Cancelled);
    assert_ne!(first, second);
}
