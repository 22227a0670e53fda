use thiserror::Error;

/// Domain-level failures that originate from the `Agent` entity itself —
/// illegal state transitions, malformed construction — rather than from I/O
/// or persistence. These are never persisted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid agent state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("prompt must be non-empty")]
    EmptyPrompt,

    #[error("runner already registered for agent {0}")]
    RunnerAlreadyRegistered(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
