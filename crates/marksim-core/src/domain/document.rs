//! Prior-art filings returned by the document-retrieval collaborator.

use serde::{Deserialize, Serialize};

/// One filing (office action or rejection decision) for a prior mark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub additional_reasons: Vec<String>,
    #[serde(default)]
    pub examination_result: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub last_transfer_date: Option<String>,
}

impl DocumentSection {
    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
            && self.additional_reasons.is_empty()
            && self.examination_result.is_none()
            && self.images.is_empty()
            && self.last_transfer_date.is_none()
    }

    /// Render the section as prompt context. Empty parts are omitted.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if !self.reasons.is_empty() {
            parts.push(format!("Primary rejection reasons:\n{}", self.reasons.join("\n")));
        }
        if !self.additional_reasons.is_empty() {
            parts.push(format!(
                "Additional rejection reasons:\n{}",
                self.additional_reasons.join("\n")
            ));
        }
        if let Some(result) = &self.examination_result {
            parts.push(format!("Examination result: {result}"));
        }
        if let Some(date) = &self.last_transfer_date {
            parts.push(format!("Last transfer date: {date}"));
        }
        if !self.images.is_empty() {
            let shown: Vec<&str> = self.images.iter().take(3).map(String::as_str).collect();
            parts.push(format!("Image references: {}", shown.join(", ")));
        }
        parts.join("\n\n")
    }
}

/// Everything the retrieval service knows about one candidate.
///
/// An empty bundle is valid input for every stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBundle {
    #[serde(default)]
    pub office_action: DocumentSection,
    #[serde(default)]
    pub rejection: DocumentSection,
}

impl DocumentBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.office_action.is_empty() && self.rejection.is_empty()
    }

    pub fn render(&self) -> String {
        let mut blocks = Vec::new();
        let office = self.office_action.render();
        if !office.is_empty() {
            blocks.push(format!("[Office action]\n{office}"));
        }
        let rejection = self.rejection.render();
        if !rejection.is_empty() {
            blocks.push(format!("[Rejection decision]\n{rejection}"));
        }
        blocks.join("\n\n")
    }
}
