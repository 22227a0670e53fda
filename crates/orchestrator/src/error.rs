use thiserror::Error;

use agent_core_common::CoreError;
use agent_core_store::StoreError;

/// Crate-boundary error type for the orchestrator. Wraps the domain
/// (`CoreError`) and persistence (`StoreError`) layers plus the failure
/// modes specific to driving and streaming a runner.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to start runner for agent {agent_id}: {reason}")]
    RunnerStartFailure { agent_id: String, reason: String },

    #[error("runner stream error for agent {agent_id}: {reason}")]
    RunnerStreamError { agent_id: String, reason: String },

    #[error("launch cancelled: {0}")]
    LaunchCancelled(String),

    #[error("launch queue full (capacity {0})")]
    LaunchQueueFull(usize),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Maps a `StoreError` into the orchestrator error taxonomy, preserving
/// the distinction between the two constraint violations the streaming
/// service branches its retry logic on.
pub fn classify_store_error(err: StoreError) -> OrchestratorError {
    match err {
        StoreError::ForeignKeyViolation(agent_id) => {
            OrchestratorError::ForeignKeyViolation(agent_id)
        }
        StoreError::UniqueViolation(agent_id) => OrchestratorError::UniqueViolation(agent_id),
        other => OrchestratorError::Store(other),
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
