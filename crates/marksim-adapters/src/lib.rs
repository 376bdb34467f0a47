//! marksim adapters
//!
//! HTTP implementations of the two collaborator seams in `marksim-core`:
//! document retrieval and the reasoning service.

pub mod documents;
pub mod error;
pub mod openai;

pub use documents::{DocumentServiceConfig, HttpDocumentSource};
pub use error::{AdapterConfigError, Result};
pub use openai::{OpenAiReasoningService, ReasoningConfig, UsageRates};
