use thiserror::Error;
use tracing::warn;

/// Persistence-layer failures, distinguishing the two constraint
/// violations the streaming service branches on from everything else
/// `sqlx` can raise.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("FOREIGN KEY constraint failed: agent {0} does not exist")]
    ForeignKeyViolation(String),

    #[error("UNIQUE constraint failed on (agent_id, sequence_number) for agent {0}")]
    UniqueViolation(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Classify a raw `sqlx::Error` into the constraint-specific variants the
/// rest of the system branches on. SQLite reports both violations as
/// `SqliteError` with a code; we fall back to matching the driver's
/// message text, which is stable across the `sqlx` versions this crate
/// targets.
pub(crate) fn classify(agent_id: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        let message = db_err.message();
        if message.contains("FOREIGN KEY constraint failed") {
            warn!(agent_id, "insert rejected: agent row does not exist");
            return StoreError::ForeignKeyViolation(agent_id.to_string());
        }
        if message.contains("UNIQUE constraint failed") {
            warn!(agent_id, "sequence number race, will retry with a fresh one");
            return StoreError::UniqueViolation(agent_id.to_string());
        }
    }
    StoreError::Database(err)
}
