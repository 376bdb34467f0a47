use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use marksim_core::fakes::{FakeDocuments, FakeReasoning};
use marksim_core::{CachedDocumentSource, EngineConfig, JobManager};
use marksimd::{router, spawn_retention_sweeper, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn manager(reasoning: FakeReasoning) -> Arc<JobManager> {
    JobManager::new(
        EngineConfig::default().with_max_concurrency(2),
        Arc::new(FakeDocuments::new()),
        Arc::new(reasoning),
    )
    .unwrap()
}

fn run_body(ids: &[&str]) -> Value {
    let candidates: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "candidate_id": id,
                "title": format!("MARK {id}"),
                "variant": "text",
                "heuristic_score": 0.8,
                "class_codes": ["09"]
            })
        })
        .collect();
    json!({
        "query": { "trademark": "ACME", "goods_services": "software" },
        "candidates": candidates
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn poll_until_terminal(app: &Router, job_id: &str) -> Value {
    let uri = format!("/simulation/status/{job_id}");
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let (status, bytes) = get(app, &uri).await;
            assert_eq!(status, StatusCode::OK);
            let job: Value = serde_json::from_slice(&bytes).unwrap();
            if matches!(
                job["status"].as_str(),
                Some("complete" | "failed" | "cancelled")
            ) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish")
}

#[tokio::test]
async fn test_run_then_poll_status_to_complete() {
    let app = router(AppState::new(manager(FakeReasoning::new())));

    let (status, body) = post_json(&app, "/simulation/run", &run_body(&["a", "b", "c"])).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = poll_until_terminal(&app, &job_id).await;
    assert_eq!(job["status"], "complete");
    assert_eq!(job["candidates"].as_array().unwrap().len(), 3);
    for candidate in job["candidates"].as_array().unwrap() {
        assert_eq!(candidate["status"], "done");
        assert_eq!(candidate["stage_outputs"].as_array().unwrap().len(), 5);
    }
    assert_eq!(job["overall_report"]["done"], 3);
}

#[tokio::test]
async fn test_run_rejects_empty_batch() {
    let app = router(AppState::new(manager(FakeReasoning::new())));

    let (status, body) = post_json(&app, "/simulation/run", &run_body(&[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid input"));
}

#[tokio::test]
async fn test_run_rejects_duplicate_ids() {
    let app = router(AppState::new(manager(FakeReasoning::new())));

    let (status, body) = post_json(&app, "/simulation/run", &run_body(&["a", "a"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("duplicate"));
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let app = router(AppState::new(manager(FakeReasoning::new())));

    let (status, _) = get(&app, "/simulation/status/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/simulation/stream/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(&app, "/simulation/cancel/nope", &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["accepted"], false);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let reasoning = FakeReasoning::new().with_latency(Duration::from_millis(50));
    let app = router(AppState::new(manager(reasoning)));

    let ids = ["a", "b", "c", "d", "e", "f"];
    let (_, body) = post_json(&app, "/simulation/run", &run_body(&ids)).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, body) =
        post_json(&app, &format!("/simulation/cancel/{job_id}"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    let job = poll_until_terminal(&app, &job_id).await;
    assert_eq!(job["status"], "cancelled");
    assert_eq!(job["cancel_requested"], true);
    assert!(job["overall_report"].is_object());

    // a finished job no longer accepts cancellation
    let (status, body) =
        post_json(&app, &format!("/simulation/cancel/{job_id}"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
}

#[tokio::test]
async fn test_stream_delivers_events_and_closes_on_terminal() {
    let reasoning = FakeReasoning::new().with_latency(Duration::from_millis(5));
    let app = router(AppState::new(manager(reasoning)));

    let (_, body) = post_json(&app, "/simulation/run", &run_body(&["a", "b"])).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/simulation/stream/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let bytes = tokio::time::timeout(Duration::from_secs(10), response.into_body().collect())
        .await
        .expect("stream did not close")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect();
    assert!(!events.is_empty());

    let seqs: Vec<u64> = events.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seq not increasing: {seqs:?}");

    let last = events.last().unwrap();
    assert_eq!(last["type"], "terminal");
    assert_eq!(last["status"], "complete");
    assert_eq!(last["snapshot"]["job_id"], job_id.as_str());
    assert_eq!(
        events.iter().filter(|e| e["type"] == "terminal").count(),
        1
    );
}

#[tokio::test]
async fn test_retention_sweeper_evicts_finished_jobs() {
    let manager = manager(FakeReasoning::new());
    let app = router(AppState::new(Arc::clone(&manager)));

    let (_, body) = post_json(&app, "/simulation/run", &run_body(&["a"])).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    poll_until_terminal(&app, &job_id).await;

    let sweeper = spawn_retention_sweeper(
        Arc::clone(&manager),
        None,
        Duration::from_millis(10),
        Duration::ZERO,
    );

    let uri = format!("/simulation/status/{job_id}");
    tokio::time::timeout(Duration::from_secs(5), async {
        while get(&app, &uri).await.0 != StatusCode::NOT_FOUND {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job was not evicted");
    sweeper.abort();
}

#[tokio::test]
async fn test_retention_sweeper_purges_document_cache() {
    let cache = Arc::new(
        CachedDocumentSource::new(Arc::new(FakeDocuments::new())).with_ttl(Duration::ZERO),
    );
    let manager = JobManager::new(
        EngineConfig::default(),
        cache.clone(),
        Arc::new(FakeReasoning::new()),
    )
    .unwrap();
    let app = router(AppState::new(Arc::clone(&manager)));

    let (_, body) = post_json(&app, "/simulation/run", &run_body(&["a", "b"])).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    poll_until_terminal(&app, &job_id).await;
    assert_eq!(cache.len().await, 2);

    let sweeper = spawn_retention_sweeper(
        Arc::clone(&manager),
        Some(cache.clone()),
        Duration::from_millis(10),
        Duration::from_secs(3600),
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cache.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cache was not purged");
    sweeper.abort();

    // retention keeps the job itself
    assert_eq!(get(&app, &format!("/simulation/status/{job_id}")).await.0, StatusCode::OK);
}
