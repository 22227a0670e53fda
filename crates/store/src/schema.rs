use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::StoreResult;

/// DDL for the two tables the core persists to. `AgentMessage` cascades on
/// delete of its parent `Agent`; `sequence_number` is unique per agent so
/// the streaming service can treat a UNIQUE violation as "someone else
/// already claimed this slot" and retry with the next one.
const CREATE_AGENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS agent (
    id             TEXT PRIMARY KEY,
    agent_type     TEXT NOT NULL,
    prompt         TEXT NOT NULL,
    configuration  TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    started_at     TEXT,
    completed_at   TEXT,
    error          TEXT
)
"#;

const CREATE_AGENT_MESSAGE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS agent_message (
    id               TEXT PRIMARY KEY,
    agent_id         TEXT NOT NULL REFERENCES agent(id) ON DELETE CASCADE,
    sequence_number  INTEGER NOT NULL,
    message_type     TEXT NOT NULL,
    role             TEXT,
    content          TEXT NOT NULL,
    metadata         TEXT,
    created_at       TEXT NOT NULL,
    UNIQUE(agent_id, sequence_number)
)
"#;

const CREATE_AGENT_MESSAGE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_agent_message_agent_seq
    ON agent_message (agent_id, sequence_number)
"#;

/// Opens a connection pool against `database_path` and brings the schema
/// up to date. Foreign keys are off by default in SQLite and a bare
/// `PRAGMA` issued against the pool only lands on whichever single
/// connection executes it — the options are attached to
/// `SqliteConnectOptions` instead so every connection the pool opens, now
/// or later, enables them on connect. `journal_mode = DELETE` keeps the
/// database a single file with no `-wal`/`-shm` sidecars, matching a
/// durability model where a process restart sees exactly what was last
/// committed.
pub async fn connect(database_url: &str) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    init_schema(&pool).await?;
    debug!(%database_url, "store schema ready");
    Ok(pool)
}

/// An in-memory pool for tests. A bare `sqlite::memory:` URL hands out a
/// fresh, unrelated database to every new pooled connection, so this pins
/// the pool to a single connection — otherwise a query that happens to
/// acquire a second connection would see an empty schema.
pub async fn connect_in_memory() -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(CREATE_AGENT_TABLE).execute(pool).await?;
    sqlx::query(CREATE_AGENT_MESSAGE_TABLE)
        .execute(pool)
        .await?;
    sqlx::query(CREATE_AGENT_MESSAGE_INDEX)
        .execute(pool)
        .await?;
    Ok(())
}
