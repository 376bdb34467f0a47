//! marksim core library
//!
//! Runs batches of trademark conflict simulations: each prior-mark candidate
//! goes through a five-stage reasoning chain under a bounded worker pool, and
//! the results are aggregated into one report per job.

pub mod aggregator;
pub mod artifact;
pub mod collaborator;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod manager;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod scheduler;
pub mod stream;
pub mod telemetry;

pub use domain::{
    CandidateInput, CandidateStatus, CandidateTask, CollabResult, CollaboratorError,
    DocumentBundle, DocumentSection, FinalScores, JobId, JobStatus, OverallReport,
    QueryContext, RankedCandidate, Result, ScorerVerdict, SimError, SimulationJob, StageKind,
    StageOutput, Variant,
};

pub use aggregator::{summarize, Aggregator};
pub use artifact::{write_candidate_artifact, CandidateArtifact};
pub use collaborator::{
    CachedDocumentSource, DocumentSource, ReasoningRequest, ReasoningRole, ReasoningService,
};
pub use config::EngineConfig;
pub use manager::JobManager;
pub use pipeline::{CandidatePipeline, PipelineRun};
pub use stream::{JobEvent, JobEventKind, Subscription};

pub use metrics::{MetricsSnapshot, TokenUsage, METRICS};
pub use obs::{
    emit_aggregation_error, emit_candidate_settled, emit_job_finished, emit_job_started,
    emit_job_submitted, emit_reasoning_usage, emit_stage_failed, job_span,
};
pub use telemetry::init_tracing;

/// marksim version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
