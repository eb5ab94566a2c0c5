//! Session-level error taxonomy.
//!
//! Candidate-level failures never reach this type; they are dropped inside
//! the scheduler and reported as events.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("identifier {0} has an invalid check digit")]
    InvalidChecksum(String),

    #[error("no product title was supplied and none could be looked up")]
    MissingTitle,

    #[error("could not clean the top-ranked photo: {0}")]
    PhotoCleanup(String),

    #[error("collaborator failure: {0}")]
    Collaborator(String),

    #[error("search session was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Single user-facing message for a fatal session error.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidChecksum(_) => "That barcode doesn't look right. Please check the digits.",
            Self::MissingTitle => "Enter a product title to search for photos.",
            Self::PhotoCleanup(_) | Self::Collaborator(_) => {
                "Something went wrong while building the gallery. Please try again."
            }
            Self::Cancelled => "Search cancelled.",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}
