//! Scripted in-memory collaborators (testing only).
//!
//! Provides `FakeDocuments` and `FakeReasoning`, which satisfy the
//! collaborator traits with configurable latency and forced failures, and
//! record enough about each call to check concurrency and ordering.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::collaborator::{DocumentSource, ReasoningRequest, ReasoningRole, ReasoningService};
use crate::domain::{CollabResult, CollaboratorError, DocumentBundle, DocumentSection, StageKind};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// FakeDocuments
// ---------------------------------------------------------------------------

/// Document source returning a small fixed bundle, or always failing.
#[derive(Debug, Default)]
pub struct FakeDocuments {
    fail: bool,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_fail(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FakeDocuments {
    async fn fetch(&self, candidate_id: &str) -> CollabResult<DocumentBundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail {
            return Err(CollaboratorError::Unavailable(format!(
                "document service down for {candidate_id}"
            )));
        }
        Ok(DocumentBundle {
            office_action: DocumentSection {
                reasons: vec![format!("similar to prior mark {candidate_id}")],
                ..Default::default()
            },
            rejection: DocumentSection::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeReasoning
// ---------------------------------------------------------------------------

/// One recorded reasoning call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub role: ReasoningRole,
    pub candidate_id: Option<String>,
    pub started: Instant,
    pub finished: Instant,
}

/// Reasoning service with scripted replies.
///
/// Stage calls answer with short canned text; the scorer answers with a JSON
/// verdict followed by a bullet. Failures can be forced per
/// `(candidate, stage)` pair, per stage for every candidate, or for the
/// synthesizer. A candidate listed with [`FakeReasoning::panic_on`] panics
/// on its first call.
#[derive(Debug)]
pub struct FakeReasoning {
    latency: Option<Duration>,
    scorer_reply: String,
    narrative: String,
    failures: HashSet<(String, StageKind)>,
    failing_stages: HashSet<StageKind>,
    fail_synthesis: bool,
    panics: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    synthesis_calls: AtomicUsize,
    calls: Mutex<Vec<CallRecord>>,
}

impl Default for FakeReasoning {
    fn default() -> Self {
        Self {
            latency: None,
            scorer_reply: "{\"conflict_score\": 72, \"register_score\": 35, \
                 \"rationale\": \"identical pronunciation\", \"factors\": [\"phonetic\"]}\n\
                 - marks sound the same"
                .to_string(),
            narrative: "# Overall summary\n- one mark is a serious obstacle".to_string(),
            failures: HashSet::new(),
            failing_stages: HashSet::new(),
            fail_synthesis: false,
            panics: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            synthesis_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_scorer_reply(mut self, reply: impl Into<String>) -> Self {
        self.scorer_reply = reply.into();
        self
    }

    /// Fail `stage` for `candidate_id` only.
    pub fn fail_stage(mut self, candidate_id: &str, stage: StageKind) -> Self {
        self.failures.insert((candidate_id.to_string(), stage));
        self
    }

    /// Fail `stage` for every candidate.
    pub fn fail_stage_everywhere(mut self, stage: StageKind) -> Self {
        self.failing_stages.insert(stage);
        self
    }

    pub fn fail_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    pub fn panic_on(mut self, candidate_id: &str) -> Self {
        self.panics.insert(candidate_id.to_string());
        self
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn synthesis_calls(&self) -> usize {
        self.synthesis_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.calls).clone()
    }

    /// Stage calls made for `candidate_id`, in call order.
    pub fn stages_called(&self, candidate_id: &str) -> Vec<StageKind> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.candidate_id.as_deref() == Some(candidate_id))
            .filter_map(|c| match c.role {
                ReasoningRole::Stage(stage) => Some(stage),
                ReasoningRole::Synthesizer => None,
            })
            .collect()
    }

    /// Per-candidate `(first call start, last call end)` windows.
    pub fn candidate_windows(&self) -> Vec<(String, Instant, Instant)> {
        let calls = lock(&self.calls);
        let mut windows: Vec<(String, Instant, Instant)> = Vec::new();
        for call in calls.iter() {
            let Some(id) = &call.candidate_id else {
                continue;
            };
            match windows.iter_mut().find(|(w, _, _)| w == id) {
                Some((_, start, end)) => {
                    *start = (*start).min(call.started);
                    *end = (*end).max(call.finished);
                }
                None => windows.push((id.clone(), call.started, call.finished)),
            }
        }
        windows
    }

    fn should_fail(&self, request: &ReasoningRequest) -> bool {
        match request.role {
            ReasoningRole::Synthesizer => self.fail_synthesis,
            ReasoningRole::Stage(stage) => {
                self.failing_stages.contains(&stage)
                    || request
                        .candidate_id
                        .as_ref()
                        .is_some_and(|id| self.failures.contains(&(id.clone(), stage)))
            }
        }
    }

    fn reply(&self, request: &ReasoningRequest) -> String {
        match request.role {
            ReasoningRole::Synthesizer => self.narrative.clone(),
            ReasoningRole::Stage(StageKind::Scorer) => self.scorer_reply.clone(),
            ReasoningRole::Stage(stage) => format!(
                "{} on {}",
                stage,
                request.candidate_id.as_deref().unwrap_or("-")
            ),
        }
    }
}

#[async_trait]
impl ReasoningService for FakeReasoning {
    async fn invoke(&self, request: ReasoningRequest) -> CollabResult<String> {
        if let Some(id) = &request.candidate_id {
            if self.panics.contains(id) {
                panic!("scripted panic for candidate {id}");
            }
        }
        if request.role == ReasoningRole::Synthesizer {
            self.synthesis_calls.fetch_add(1, Ordering::SeqCst);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let started = Instant::now();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        lock(&self.calls).push(CallRecord {
            role: request.role,
            candidate_id: request.candidate_id.clone(),
            started,
            finished: Instant::now(),
        });

        if self.should_fail(&request) {
            return Err(CollaboratorError::Unavailable(format!(
                "scripted failure for {}",
                request.role
            )));
        }
        Ok(self.reply(&request))
    }
}
