//! Stage vocabulary: `StageKind`, `StageOutput`, `ScorerVerdict`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CollaboratorError;

/// The five stages every candidate runs through, in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Examiner,
    Applicant,
    ExaminerRebuttal,
    Reporter,
    Scorer,
}

impl StageKind {
    /// Total order of the stage log.
    pub const ORDER: [StageKind; 5] = [
        StageKind::Examiner,
        StageKind::Applicant,
        StageKind::ExaminerRebuttal,
        StageKind::Reporter,
        StageKind::Scorer,
    ];

    /// Transcript speaker label.
    pub fn speaker(self) -> &'static str {
        match self {
            StageKind::Examiner | StageKind::ExaminerRebuttal => "Examiner",
            StageKind::Applicant => "Applicant",
            StageKind::Reporter => "Reporter",
            StageKind::Scorer => "Scorer",
        }
    }

    /// Only the scorer produces structured output.
    pub fn is_structured(self) -> bool {
        self == StageKind::Scorer
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageKind::Examiner => "examiner",
            StageKind::Applicant => "applicant",
            StageKind::ExaminerRebuttal => "examiner_rebuttal",
            StageKind::Reporter => "reporter",
            StageKind::Scorer => "scorer",
        };
        write!(f, "{s}")
    }
}

/// Structured scorer output. Scores are clamped to `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerVerdict {
    pub conflict: f64,
    pub registrability: f64,
    pub rationale: Option<String>,
    #[serde(default)]
    pub factors: Vec<String>,
}

/// One entry of a candidate's append-only stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: StageKind,
    /// Free text (for the scorer: the display text with the JSON stripped).
    pub text: String,
    pub produced_at: DateTime<Utc>,
    pub succeeded: bool,
    pub error: Option<String>,
    /// Present only on a succeeded scorer stage.
    pub verdict: Option<ScorerVerdict>,
}

impl StageOutput {
    pub fn success(stage: StageKind, text: impl Into<String>) -> Self {
        Self {
            stage,
            text: text.into(),
            produced_at: Utc::now(),
            succeeded: true,
            error: None,
            verdict: None,
        }
    }

    pub fn scored(text: impl Into<String>, verdict: ScorerVerdict) -> Self {
        Self {
            verdict: Some(verdict),
            ..Self::success(StageKind::Scorer, text)
        }
    }

    pub fn failure(stage: StageKind, error: &CollaboratorError) -> Self {
        Self {
            stage,
            text: String::new(),
            produced_at: Utc::now(),
            succeeded: false,
            error: Some(error.to_string()),
            verdict: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_starts_at_examiner_and_ends_at_scorer() {
        assert_eq!(StageKind::ORDER.first(), Some(&StageKind::Examiner));
        assert_eq!(StageKind::ORDER.last(), Some(&StageKind::Scorer));
        assert!(StageKind::ORDER.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_only_scorer_is_structured() {
        let structured: Vec<_> = StageKind::ORDER
            .iter()
            .filter(|s| s.is_structured())
            .collect();
        assert_eq!(structured, vec![&StageKind::Scorer]);
    }

    #[test]
    fn test_failure_records_error_text() {
        let out = StageOutput::failure(
            StageKind::Applicant,
            &CollaboratorError::Unavailable("503".into()),
        );
        assert!(!out.succeeded);
        assert!(out.text.is_empty());
        assert!(out.error.unwrap().contains("503"));
    }

    #[test]
    fn test_stage_kind_wire_name() {
        let json = serde_json::to_string(&StageKind::ExaminerRebuttal).unwrap();
        assert_eq!(json, "\"examiner_rebuttal\"");
    }
}
