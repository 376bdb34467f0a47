//! marksimd: HTTP surface over a [`JobManager`].
//!
//! | method | path | body |
//! |--------|------|------|
//! | POST | `/simulation/run` | `{query, candidates}` → `{job_id}` |
//! | GET | `/simulation/status/:job_id` | job snapshot |
//! | GET | `/simulation/stream/:job_id` | SSE, one `JobEvent` per `data:` line |
//! | POST | `/simulation/cancel/:job_id` | `{accepted}` |

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use marksim_core::{
    CachedDocumentSource, CandidateInput, JobId, JobManager, QueryContext, SimError,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
}

impl AppState {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub query: QueryContext,
    pub candidates: Vec<CandidateInput>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    job_id: JobId,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    accepted: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps engine errors onto HTTP statuses.
struct ApiError(SimError);

impl From<SimError> for ApiError {
    fn from(err: SimError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SimError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SimError::JobNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/simulation/run", post(run_handler))
        .route("/simulation/status/:job_id", get(status_handler))
        .route("/simulation/stream/:job_id", get(stream_handler))
        .route("/simulation/cancel/:job_id", post(cancel_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn run_handler(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let job_id = state
        .manager
        .create_job(payload.query, payload.candidates)
        .await?;
    Ok(Json(RunResponse { job_id }))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.manager.get_status(&JobId(job_id)).await?;
    Ok(Json(job).into_response())
}

async fn stream_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.manager.subscribe(&JobId(job_id)).await?;

    // The subscription ends after the terminal event, which ends the response.
    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let frame = match serde_json::to_string(&event) {
            Ok(data) => Event::default().event("job").data(data),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode job event");
                Event::default().comment("encode error")
            }
        };
        Some((Ok(frame), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.request_cancel(&JobId(job_id)).await {
        Ok(accepted) => (StatusCode::OK, Json(CancelResponse { accepted })),
        Err(SimError::JobNotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(CancelResponse { accepted: false }))
        }
        Err(e) => {
            tracing::error!(error = %e, "cancel failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CancelResponse { accepted: false }),
            )
        }
    }
}

/// Periodically drop terminal jobs that finished more than `retention` ago,
/// and expired entries of the document cache when one is given.
pub fn spawn_retention_sweeper(
    manager: Arc<JobManager>,
    documents: Option<Arc<CachedDocumentSource>>,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = manager.evict_finished(retention).await;
            if evicted > 0 {
                tracing::info!(evicted, "evicted finished jobs");
            }
            if let Some(cache) = &documents {
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    let cached = cache.len().await;
                    tracing::debug!(purged, cached, "purged document cache");
                }
            }
        }
    })
}
