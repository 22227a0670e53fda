use agent_core_common::{Agent, AgentId, AgentStatus, AgentType, Configuration};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{classify, StoreError, StoreResult};

/// Persistence adapter for `Agent`. Every save re-serializes the whole row
/// — there is no column-level patch API, mirroring the in-memory entity's
/// own "no partial updates" rule.
#[derive(Clone)]
pub struct AgentStore {
    pool: SqlitePool,
}

impl AgentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, agent: &Agent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO agent (id, agent_type, prompt, configuration, status, created_at, started_at, completed_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(agent.id.to_string())
        .bind(agent.agent_type.to_string())
        .bind(&agent.prompt)
        .bind(serde_json::to_string(&agent.configuration)?)
        .bind(agent.status.to_string())
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.started_at.map(|t| t.to_rfc3339()))
        .bind(agent.completed_at.map(|t| t.to_rfc3339()))
        .bind(&agent.error)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(&agent.id.to_string(), e))?;
        Ok(())
    }

    /// Re-serializes every mutable column. Called after every `mark_as_*`
    /// transition on the in-memory entity.
    pub async fn update(&self, agent: &Agent) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE agent SET agent_type = ?2, prompt = ?3, configuration = ?4, status = ?5,
             started_at = ?6, completed_at = ?7, error = ?8
             WHERE id = ?1",
        )
        .bind(agent.id.to_string())
        .bind(agent.agent_type.to_string())
        .bind(&agent.prompt)
        .bind(serde_json::to_string(&agent.configuration)?)
        .bind(agent.status.to_string())
        .bind(agent.started_at.map(|t| t.to_rfc3339()))
        .bind(agent.completed_at.map(|t| t.to_rfc3339()))
        .bind(&agent.error)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(&agent.id.to_string(), e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(agent.id.to_string()));
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: AgentId) -> StoreResult<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agent WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_agent).transpose()
    }

    pub async fn list_all(&self) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agent ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_agent).collect()
    }

    /// Deletes the agent row; `agent_message` rows cascade via the foreign
    /// key.
    pub async fn delete(&self, id: AgentId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM agent WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_agent(row: sqlx::sqlite::SqliteRow) -> StoreResult<Agent> {
    let id: String = row.try_get("id")?;
    let agent_type: String = row.try_get("agent_type")?;
    let configuration: String = row.try_get("configuration")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Agent {
        id: AgentId(Uuid::parse_str(&id).map_err(|e| {
            StoreError::Database(sqlx::Error::Decode(Box::new(e)))
        })?),
        agent_type: AgentType::from(agent_type.as_str()),
        prompt: row.try_get("prompt")?,
        configuration: serde_json::from_str::<Configuration>(&configuration)?,
        status: parse_status(&status)?,
        created_at: parse_timestamp(&created_at)?,
        started_at: started_at.map(|s| parse_timestamp(&s)).transpose()?,
        completed_at: completed_at.map(|s| parse_timestamp(&s)).transpose()?,
        error: row.try_get("error")?,
    })
}

fn parse_status(s: &str) -> StoreResult<AgentStatus> {
    match s {
        "initializing" => Ok(AgentStatus::Initializing),
        "running" => Ok(AgentStatus::Running),
        "paused" => Ok(AgentStatus::Paused),
        "completed" => Ok(AgentStatus::Completed),
        "failed" => Ok(AgentStatus::Failed),
        "terminated" => Ok(AgentStatus::Terminated),
        other => Err(StoreError::Database(sqlx::Error::Decode(
            format!("unknown agent status: {other}").into(),
        ))),
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}
