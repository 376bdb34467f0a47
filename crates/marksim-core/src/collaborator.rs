//! Collaborator seams: document retrieval and the reasoning service.
//!
//! Both are async traits so the engine can be driven by the HTTP adapters in
//! production and by the scripted fakes in tests. Implementations only report
//! failures; recovery happens at the stage boundary in the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{CollabResult, DocumentBundle, StageKind};

/// Who is being asked to reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum ReasoningRole {
    /// One step of a candidate's chain.
    Stage(StageKind),
    /// The job-level narrative over every candidate.
    Synthesizer,
}

impl ReasoningRole {
    /// Persona passed to the model as the system prompt subject.
    pub fn persona(self) -> &'static str {
        match self {
            ReasoningRole::Stage(StageKind::Examiner) => "a trademark office examiner",
            ReasoningRole::Stage(StageKind::Applicant) => "the applicant's trademark attorney",
            ReasoningRole::Stage(StageKind::ExaminerRebuttal) => {
                "the examiner replying to the applicant"
            }
            ReasoningRole::Stage(StageKind::Reporter) => "a neutral reporter",
            ReasoningRole::Stage(StageKind::Scorer) => "a risk scorer",
            ReasoningRole::Synthesizer => "the final reporter",
        }
    }
}

impl std::fmt::Display for ReasoningRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningRole::Stage(stage) => write!(f, "{stage}"),
            ReasoningRole::Synthesizer => write!(f, "synthesizer"),
        }
    }
}

/// Input to one reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub role: ReasoningRole,
    /// Candidate the call is made for; `None` for the synthesizer.
    pub candidate_id: Option<String>,
    pub context: String,
    pub transcript: String,
    pub instruction: String,
}

/// Fetches prior-art filings for a candidate.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, candidate_id: &str) -> CollabResult<DocumentBundle>;
}

/// Produces free text for a stage or the synthesized narrative.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn invoke(&self, request: ReasoningRequest) -> CollabResult<String>;
}

/// Memoizes successful fetches process-wide, keyed by candidate id.
///
/// Failures are not cached, so a later job retries the fetch. Entries expire
/// after `ttl`, and once `capacity` is reached the oldest entry is dropped.
pub struct CachedDocumentSource {
    inner: Arc<dyn DocumentSource>,
    ttl: Duration,
    capacity: usize,
    cache: RwLock<HashMap<String, CachedBundle>>,
}

struct CachedBundle {
    bundle: DocumentBundle,
    fetched_at: Instant,
}

impl CachedDocumentSource {
    pub fn new(inner: Arc<dyn DocumentSource>) -> Self {
        Self {
            inner,
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Drop expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        before - cache.len()
    }
}

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_CACHE_CAPACITY: usize = 4096;

#[async_trait]
impl DocumentSource for CachedDocumentSource {
    async fn fetch(&self, candidate_id: &str) -> CollabResult<DocumentBundle> {
        if let Some(hit) = self.cache.read().await.get(candidate_id) {
            if hit.fetched_at.elapsed() < self.ttl {
                debug!(candidate_id = %candidate_id, "document cache hit");
                return Ok(hit.bundle.clone());
            }
        }
        let bundle = self.inner.fetch(candidate_id).await?;

        let mut cache = self.cache.write().await;
        if cache.len() >= self.capacity && !cache.contains_key(candidate_id) {
            cache.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
            if cache.len() >= self.capacity {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, entry)| entry.fetched_at)
                    .map(|(id, _)| id.clone());
                if let Some(id) = oldest {
                    cache.remove(&id);
                }
            }
        }
        cache.insert(
            candidate_id.to_string(),
            CachedBundle {
                bundle: bundle.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(bundle)
    }
}
