//! Builds the reasoning request for each stage from the stage log.
//!
//! A failed stage contributes nothing; downstream stages always get a request,
//! falling back to [`NO_INPUT`] when there is nothing to read.

use crate::collaborator::{ReasoningRequest, ReasoningRole};
use crate::domain::{CandidateTask, DocumentBundle, QueryContext, StageKind, StageOutput};

pub const NO_INPUT: &str = "no input available";
pub const NO_CONVERSATION: &str = "(no conversation)";

/// Case context shared by the three debate stages.
pub fn case_context(query: &QueryContext, task: &CandidateTask, bundle: &DocumentBundle) -> String {
    let mut lines = vec![
        format!(
            "[Mark under examination]\n{}\nGoods/services: {}",
            if query.trademark.is_empty() {
                "(not provided)"
            } else {
                query.trademark.as_str()
            },
            if query.goods_services.is_empty() {
                "(not provided)"
            } else {
                query.goods_services.as_str()
            }
        ),
        format!(
            "[Prior mark]\n{} (application {})\nSelected by {} similarity {:.3}",
            task.title, task.candidate_id, task.variant, task.heuristic_score
        ),
    ];
    if let Some(status) = &task.prior_status {
        lines.push(format!("Status: {status}"));
    }
    if !task.class_codes.is_empty() {
        lines.push(format!("Classes: {}", task.class_codes.join(", ")));
    }
    let documents = bundle.render();
    if !documents.is_empty() {
        lines.push(documents);
    }
    lines.join("\n\n")
}

/// `[speaker] text` lines for every succeeded stage so far.
pub fn transcript(outputs: &[StageOutput]) -> String {
    outputs
        .iter()
        .filter(|o| o.succeeded && !o.text.is_empty())
        .map(|o| format!("[{}] {}", o.stage.speaker(), o.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn instruction(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Examiner => {
            "Using the collected filings, explain the grounds on which the mark under \
             examination could be refused over the prior mark, citing the legal basis."
        }
        StageKind::Applicant => {
            "Rebut the examiner's position or propose amendments that would overcome it."
        }
        StageKind::ExaminerRebuttal => {
            "State which of the applicant's arguments you accept or reject and give your final position."
        }
        StageKind::Reporter => {
            "Summarize the exchange as Markdown: a one-line verdict on whether the marks \
             conflict, then the key issues as a numbered list."
        }
        StageKind::Scorer => {
            "Using only the summary, rate conflict risk and registrability from 0 to 100. \
             First line: a JSON object {conflict_score, register_score, rationale, factors[]}. \
             Then a short bulleted assessment."
        }
    }
}

/// Request for `stage` given the outputs produced so far.
pub fn stage_request(
    stage: StageKind,
    task: &CandidateTask,
    case_context: &str,
) -> ReasoningRequest {
    let prior = &task.stage_outputs;
    let (context, transcript_text) = match stage {
        StageKind::Examiner | StageKind::Applicant | StageKind::ExaminerRebuttal => {
            let t = transcript(prior);
            (
                case_context.to_string(),
                if t.is_empty() { NO_INPUT.to_string() } else { t },
            )
        }
        StageKind::Reporter => {
            let t = transcript(prior);
            let t = if t.is_empty() {
                NO_CONVERSATION.to_string()
            } else {
                t
            };
            (t.clone(), t)
        }
        StageKind::Scorer => {
            let source = prior
                .iter()
                .find(|o| o.stage == StageKind::Reporter && o.succeeded && !o.text.is_empty())
                .or_else(|| prior.iter().rev().find(|o| o.succeeded && !o.text.is_empty()))
                .map(|o| o.text.clone())
                .unwrap_or_else(|| NO_INPUT.to_string());
            (source, String::new())
        }
    };
    ReasoningRequest {
        role: ReasoningRole::Stage(stage),
        candidate_id: Some(task.candidate_id.clone()),
        context,
        transcript: transcript_text,
        instruction: instruction(stage).to_string(),
    }
}
