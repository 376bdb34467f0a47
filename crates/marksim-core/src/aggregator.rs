//! Job-level report over every settled candidate.
//!
//! Counters, means and the ranking come from `final_scores` alone
//! ([`summarize`] is a pure function). The narrative is one extra reasoning
//! call on top; when it fails the numeric report is returned unchanged with
//! `narrative_error` set.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::collaborator::{ReasoningRequest, ReasoningRole, ReasoningService};
use crate::config::EngineConfig;
use crate::domain::{
    CandidateStatus, CandidateTask, OverallReport, QueryContext, RankedCandidate, SimulationJob,
};
use crate::obs::emit_aggregation_error;
use crate::pipeline::bounded;
use crate::pipeline::scoring::round1;

const SYNTHESIS_INSTRUCTION: &str = "Write Markdown only. Start with '# Overall summary' and two \
     or three sentences on the overall risk and the decisive issues. Then '## Key risks by prior \
     mark': list at most six marks, highest conflict first, each as a bold 'title (application)' \
     line followed by bullets for conflict risk, key issues (at least two sentences) and a \
     recommendation. Finish with '## Recommendations' as a short bulleted list. Do not repeat \
     the mean scores.";

/// Mean of `values`, summed in sorted order so the result does not depend on
/// the order candidates settled in. Rounded to one decimal; 0 when empty.
fn mean(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    round1(values.into_iter().sum::<f64>() / n)
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scored candidates, highest final conflict first, ties by candidate id.
pub fn rank(tasks: &[CandidateTask]) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = tasks
        .iter()
        .filter_map(|t| {
            t.final_scores.map(|s| RankedCandidate {
                candidate_id: t.candidate_id.clone(),
                title: t.title.clone(),
                status: t.status,
                conflict: s.conflict,
                registrability: s.registrability,
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.conflict
            .partial_cmp(&a.conflict)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
    ranked
}

fn summary_text(report: &OverallReport, tasks: &[CandidateTask]) -> String {
    let scored = report.scored();
    if scored == 0 {
        return if report.settled == 0 {
            "No candidates were assessed.".to_string()
        } else {
            format!(
                "None of the {} settled candidates produced usable scores.",
                report.settled
            )
        };
    }
    let mut text = if report.high_risk == 0 {
        format!("None of the {scored} assessed candidates is a high conflict risk. ")
    } else {
        format!(
            "{} of {scored} assessed candidates are high conflict risks. ",
            report.high_risk
        )
    };
    text.push_str(&format!(
        "Mean conflict {:.1}, mean registrability {:.1}.",
        report.mean_conflict, report.mean_registrability
    ));

    let issues: Vec<String> = tasks
        .iter()
        .filter_map(|t| t.reporter_summary())
        .take(2)
        .map(one_line)
        .collect();
    if !issues.is_empty() {
        text.push_str(" Key issues: ");
        text.push_str(&issues.join(" / "));
    }
    text
}

/// Numeric report over `tasks`. Pure: depends only on the task set.
pub fn summarize(tasks: &[CandidateTask], high_risk_threshold: f64) -> OverallReport {
    let count = |status: CandidateStatus| tasks.iter().filter(|t| t.status == status).count();
    let scores: Vec<_> = tasks.iter().filter_map(|t| t.final_scores).collect();

    let mut report = OverallReport {
        total_submitted: tasks.len(),
        settled: tasks.iter().filter(|t| t.status.is_settled()).count(),
        done: count(CandidateStatus::Done),
        degraded: count(CandidateStatus::Degraded),
        failed: count(CandidateStatus::Failed),
        cancelled: count(CandidateStatus::Cancelled),
        high_risk: scores
            .iter()
            .filter(|s| s.conflict >= high_risk_threshold)
            .count(),
        high_risk_threshold,
        mean_conflict: mean(scores.iter().map(|s| s.conflict).collect()),
        mean_registrability: mean(scores.iter().map(|s| s.registrability).collect()),
        summary_text: String::new(),
        narrative: String::new(),
        narrative_error: None,
        ranked: rank(tasks),
    };
    report.summary_text = summary_text(&report, tasks);
    report
}

/// The synthesizer request: one line per scored candidate in rank order.
pub fn synthesis_request(query: &QueryContext, tasks: &[CandidateTask]) -> ReasoningRequest {
    let mark = if query.trademark.is_empty() {
        "(not provided)"
    } else {
        query.trademark.as_str()
    };
    let mut lines = vec![
        format!("Mark under examination: {mark}"),
        "Prior marks assessed:".to_string(),
    ];
    for (idx, ranked) in rank(tasks).iter().enumerate() {
        let rationale = tasks
            .iter()
            .find(|t| t.candidate_id == ranked.candidate_id)
            .and_then(|t| t.scorer_rationale().or_else(|| t.reporter_summary()))
            .map(one_line)
            .unwrap_or_default();
        lines.push(format!(
            "{}. {} (application {}) | conflict {:.1} | registrability {:.1} | {}",
            idx + 1,
            ranked.title,
            ranked.candidate_id,
            ranked.conflict,
            ranked.registrability,
            rationale
        ));
    }
    ReasoningRequest {
        role: ReasoningRole::Synthesizer,
        candidate_id: None,
        context: lines.join("\n"),
        transcript: String::new(),
        instruction: SYNTHESIS_INSTRUCTION.to_string(),
    }
}

/// Builds the [`OverallReport`] for a finished job.
#[derive(Clone)]
pub struct Aggregator {
    reasoning: Arc<dyn ReasoningService>,
    timeout: Duration,
    high_risk_threshold: f64,
}

impl Aggregator {
    pub fn new(reasoning: Arc<dyn ReasoningService>, config: &EngineConfig) -> Self {
        Self {
            reasoning,
            timeout: config.stage_timeout,
            high_risk_threshold: config.high_risk_threshold,
        }
    }

    /// Summarize `job` and, when anything was scored, attach the narrative.
    pub async fn aggregate(&self, job: &SimulationJob) -> OverallReport {
        let mut report = summarize(&job.candidates, self.high_risk_threshold);
        if report.scored() == 0 {
            debug!(job_id = %job.job_id, "nothing scored; skipping narrative");
            return report;
        }

        let request = synthesis_request(&job.query, &job.candidates);
        match bounded(self.timeout, self.reasoning.invoke(request)).await {
            Ok(text) => report.narrative = text.trim().to_string(),
            Err(e) => {
                emit_aggregation_error(job.job_id.as_str(), &e);
                report.narrative_error = Some(e.to_string());
            }
        }
        report
    }
}
