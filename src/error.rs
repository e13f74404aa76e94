//! Error types for the fare search engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, FareError>;

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Browser launch and navigation.
    Session,
    /// Overlay dismissal and search form entry.
    FormFill,
    /// Waiting for results to stabilize.
    Wait,
    /// Parsing the result list.
    Extract,
    /// Ranking and selecting candidates.
    Select,
    /// Report assembly.
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Session => "session",
            Stage::FormFill => "form fill",
            Stage::Wait => "result wait",
            Stage::Extract => "extraction",
            Stage::Select => "selection",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while searching for fares.
#[derive(Error, Debug)]
pub enum FareError {
    /// The search request failed validation.
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    /// The site profile or a locator is malformed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The browser session could not be established or maintained.
    #[error("Browser session failed: {0}")]
    Session(String),

    /// The search form could not be completed. Nothing was submitted.
    #[error("Form fill failed: {0}")]
    FormFill(String),

    /// Results did not reach a stable state in time.
    #[error("Results did not stabilize within {waited_ms}ms ({polls} polls)")]
    Timeout {
        /// Time spent waiting in milliseconds.
        waited_ms: u64,
        /// Number of samples taken.
        polls: u32,
    },

    /// The result page structure was not recognized.
    #[error("Result extraction failed: {0}")]
    Extraction(String),

    /// There were no flight options to select from.
    #[error("No flight options available (requested {requested})")]
    InsufficientResults {
        /// Number of candidates asked for.
        requested: usize,
    },

    /// The search was cancelled from outside.
    #[error("Search aborted during {stage}: {reason}")]
    Aborted {
        /// Stage that was running or about to run.
        stage: Stage,
        /// Cancellation reason.
        reason: String,
    },

    /// The query interpreter failed.
    #[error("Query interpretation failed: {0}")]
    Interpretation(String),

    /// The summarizer failed.
    #[error("Summarization failed: {0}")]
    Summary(String),

    /// Raw browser driver failure, not yet attributed to a stage.
    #[error("Browser error: {0}")]
    Browser(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FareError {
    /// Returns the pipeline stage this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FareError::Session(_) => Some(Stage::Session),
            FareError::FormFill(_) => Some(Stage::FormFill),
            FareError::Timeout { .. } => Some(Stage::Wait),
            FareError::Extraction(_) => Some(Stage::Extract),
            FareError::InsufficientResults { .. } => Some(Stage::Select),
            FareError::Aborted { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether re-running the same search may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FareError::Timeout { .. } | FareError::Session(_) | FareError::Aborted { .. }
        )
    }

    /// Whether this is the empty-but-valid outcome rather than a fault.
    pub fn is_no_flights(&self) -> bool {
        matches!(self, FareError::InsufficientResults { .. })
    }

    /// Reclassifies a raw browser error as a failure of `stage`.
    ///
    /// Already classified errors pass through unchanged.
    pub fn within(self, stage: Stage) -> Self {
        let FareError::Browser(reason) = self else {
            return self;
        };
        match stage {
            Stage::Session => FareError::Session(reason),
            Stage::FormFill => FareError::FormFill(reason),
            Stage::Wait => FareError::Session(format!("lost page while waiting: {}", reason)),
            Stage::Extract => FareError::Extraction(reason),
            Stage::Select | Stage::Report => FareError::Browser(reason),
        }
    }

    pub(crate) fn aborted(stage: Stage, reason: impl Into<String>) -> Self {
        FareError::Aborted {
            stage,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_timeout() {
        let err = FareError::Timeout {
            waited_ms: 5000,
            polls: 7,
        };
        assert_eq!(
            err.to_string(),
            "Results did not stabilize within 5000ms (7 polls)"
        );
    }

    #[test]
    fn test_error_display_aborted() {
        let err = FareError::aborted(Stage::Extract, "user abort");
        assert_eq!(err.to_string(), "Search aborted during extraction: user abort");
    }

    #[test]
    fn test_error_display_insufficient() {
        let err = FareError::InsufficientResults { requested: 3 };
        assert_eq!(err.to_string(), "No flight options available (requested 3)");
    }

    #[test]
    fn test_within_reclassifies_browser_errors() {
        let err = FareError::Browser("node detached".into()).within(Stage::FormFill);
        assert!(matches!(err, FareError::FormFill(ref r) if r == "node detached"));

        let err = FareError::Browser("gone".into()).within(Stage::Extract);
        assert!(matches!(err, FareError::Extraction(_)));

        let err = FareError::Browser("crash".into()).within(Stage::Session);
        assert!(matches!(err, FareError::Session(_)));
    }

    #[test]
    fn test_within_keeps_classified_errors() {
        let err = FareError::Timeout {
            waited_ms: 1,
            polls: 1,
        }
        .within(Stage::Extract);
        assert!(matches!(err, FareError::Timeout { .. }));
    }

    #[test]
    fn test_stage_attribution() {
        assert_eq!(FareError::FormFill("x".into()).stage(), Some(Stage::FormFill));
        assert_eq!(FareError::Extraction("x".into()).stage(), Some(Stage::Extract));
        assert_eq!(
            FareError::InsufficientResults { requested: 1 }.stage(),
            Some(Stage::Select)
        );
        assert_eq!(FareError::InvalidRequest("x".into()).stage(), None);
    }

    #[test]
    fn test_retryable_classes() {
        assert!(FareError::Timeout { waited_ms: 0, polls: 0 }.is_retryable());
        assert!(FareError::Session("x".into()).is_retryable());
        assert!(!FareError::Extraction("x".into()).is_retryable());
        assert!(!FareError::FormFill("x".into()).is_retryable());
        assert!(FareError::InsufficientResults { requested: 1 }.is_no_flights());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Wait.to_string(), "result wait");
        assert_eq!(Stage::FormFill.to_string(), "form fill");
    }
}
