//! Scorer output parsing, score blending, and candidate notes.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::{CandidateTask, CollabResult, CollaboratorError, FinalScores, ScorerVerdict, Variant};

fn json_object_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)\{.*?\}").ok())
        .as_ref()
}

/// Clamp to `[0, 100]`; non-finite values become 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Parse the scorer's reply.
///
/// The reply must contain a JSON object with `conflict_score` and
/// `register_score`; `rationale` (or `reasoning`) and `factors` are optional.
/// Returns the verdict and the display text with the JSON removed.
pub fn parse_scorer_reply(reply: &str) -> CollabResult<(ScorerVerdict, String)> {
    let pattern = json_object_pattern().ok_or_else(|| {
        CollaboratorError::InvalidResponse("score pattern unavailable".to_string())
    })?;
    let found = pattern.find(reply).ok_or_else(|| {
        CollaboratorError::InvalidResponse("scorer reply has no JSON object".to_string())
    })?;
    let data: Value = serde_json::from_str(found.as_str()).map_err(|e| {
        CollaboratorError::InvalidResponse(format!("scorer JSON is malformed: {e}"))
    })?;

    let conflict = number(data.get("conflict_score")).ok_or_else(|| {
        CollaboratorError::InvalidResponse("scorer JSON lacks conflict_score".to_string())
    })?;
    let registrability = number(data.get("register_score")).ok_or_else(|| {
        CollaboratorError::InvalidResponse("scorer JSON lacks register_score".to_string())
    })?;
    let rationale = data
        .get("rationale")
        .or_else(|| data.get("reasoning"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let factors = data
        .get("factors")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let stripped = pattern.replace_all(reply, "").trim().to_string();
    let display = if stripped.is_empty() {
        reply.trim().to_string()
    } else {
        stripped
    };

    Ok((
        ScorerVerdict {
            conflict: clamp_score(conflict),
            registrability: clamp_score(registrability),
            rationale,
            factors,
        },
        display,
    ))
}

/// Scores implied by the upstream similarity alone.
pub fn heuristic_scores(heuristic: f64) -> FinalScores {
    let similarity = if heuristic.is_finite() {
        heuristic.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let conflict = similarity * 100.0;
    FinalScores {
        conflict,
        registrability: (100.0 - conflict * 0.7).max(5.0),
    }
}

/// `pipeline_weight * verdict + (1 - pipeline_weight) * heuristic`.
pub fn blend(verdict: &ScorerVerdict, heuristic: f64, pipeline_weight: f64) -> FinalScores {
    let h = heuristic_scores(heuristic);
    let w = pipeline_weight.clamp(0.0, 1.0);
    FinalScores {
        conflict: round1(clamp_score(w * verdict.conflict + (1.0 - w) * h.conflict)),
        registrability: round1(clamp_score(
            w * verdict.registrability + (1.0 - w) * h.registrability,
        )),
    }
}

/// Human-readable notes attached to a settled candidate.
pub fn candidate_notes(task: &CandidateTask) -> Vec<String> {
    let label = match task.variant {
        Variant::Image => "Image",
        Variant::Text => "Text",
    };
    let h = heuristic_scores(task.heuristic_score);
    let mut notes = vec![format!(
        "{label} similarity {:.3}",
        h.conflict / 100.0
    )];
    if h.conflict >= 85.0 {
        notes.push("Near identical to the prior mark.".to_string());
    } else if h.conflict >= 70.0 {
        notes.push("High conflict risk; further review needed.".to_string());
    } else if h.conflict <= 40.0 {
        notes.push("Low conflict risk.".to_string());
    }
    if let Some(status) = &task.prior_status {
        notes.push(format!("Status: {status}"));
    }
    if !task.class_codes.is_empty() {
        let codes: Vec<&str> = task.class_codes.iter().take(3).map(String::as_str).collect();
        notes.push(format!("Classes: {}", codes.join(", ")));
    }
    if let Some(summary) = task.reporter_summary() {
        notes.push(summary.to_string());
    }
    notes
}
