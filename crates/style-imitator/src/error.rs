//! Imitator error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImitatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine startup error: {0}")]
    ProcessStartup(String),

    #[error("Engine I/O error: {0}")]
    ProcessIo(String),

    #[error("No candidates to select from")]
    EmptyCandidateSet,

    #[error("Engine produced no candidates")]
    CollectionFailure,

    #[error("Search aborted: {0}")]
    SearchAborted(String),

    #[error("Tagging error: {0}")]
    Tagging(String),

    #[error("Style profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Style profile {name} is malformed: {source}")]
    ProfileParse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Decision log error: {0}")]
    DecisionLog(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImitatorError {
    /// Errors after which the bridge cannot keep talking to the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImitatorError::ProcessIo(_) | ImitatorError::ProcessStartup(_)
        )
    }
}
