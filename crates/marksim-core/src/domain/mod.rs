//! Domain models for the simulation engine.
//!
//! - `SimulationJob`: one submitted batch and its lifecycle
//! - `CandidateTask`: per-candidate state and stage log
//! - `StageOutput`: one entry of the five-stage chain
//! - `DocumentBundle`: prior-art filings for a candidate
//! - `OverallReport`: the aggregated result

pub mod candidate;
pub mod document;
pub mod error;
pub mod job;
pub mod report;
pub mod stage;

pub use candidate::{
    CandidateInput, CandidateStatus, CandidateTask, FinalScores, QueryContext, Variant,
};
pub use document::{DocumentBundle, DocumentSection};
pub use error::{CollabResult, CollaboratorError, Result, SimError};
pub use job::{JobId, JobStatus, SimulationJob};
pub use report::{OverallReport, RankedCandidate};
pub use stage::{ScorerVerdict, StageKind, StageOutput};
