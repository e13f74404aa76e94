//! Capability traits for the conversational collaborators.
//!
//! Turning free text into a [`SearchRequest`] and turning a [`Report`] into
//! prose are delegated to implementations supplied by the caller, typically
//! backed by a language model.

use async_trait::async_trait;

use crate::report::Report;
use crate::request::SearchRequest;
use crate::Result;

/// Result of interpreting a free-text query.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    /// The query contained everything needed to search.
    Ready(SearchRequest),
    /// Information is missing; ask the user this question.
    NeedsInfo { question: String },
}

/// Turns a free-text query into a search request.
#[async_trait]
pub trait QueryInterpreter: Send + Sync {
    /// Implementations report failures as [`crate::FareError::Interpretation`]
    /// and invalid extracted values as [`crate::FareError::InvalidRequest`].
    async fn interpret(&self, text: &str) -> Result<Interpretation>;
}

/// Writes a human-readable summary of a report.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, report: &Report) -> Result<String>;
}

/// Outcome of a free-text search.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSearchOutcome {
    Report(Box<Report>),
    /// The interpreter needs more information before searching.
    FollowUp(String),
}

/// Outcome of a search followed by summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedReport {
    pub report: Report,
    pub summary: String,
}
