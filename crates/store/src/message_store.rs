use agent_core_common::{AgentId, AgentMessage, Content, Metadata, MessageType};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{classify, StoreError, StoreResult};

/// Marker stashed in `metadata` so JSON-object content round-trips through
/// the `TEXT` column without being mistaken for a plain string.
const CONTENT_TYPE_KEY: &str = "content_type";
const CONTENT_TYPE_JSON: &str = "json";

/// Persistence adapter for `AgentMessage`. Sequence numbers are assigned
/// atomically inside the insert statement itself — `save` never reads a
/// "next sequence" value and writes it back separately, which would race
/// under concurrent callers. A `UNIQUE(agent_id, sequence_number)` loser
/// is retried with a freshly computed next sequence, bounded by
/// `max_retries`.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists `message`, assigning it the next sequence number for its
    /// agent. On a `UNIQUE` race, retries up to `max_retries` times with a
    /// newly computed sequence number before giving up.
    pub async fn save(
        &self,
        agent_id: AgentId,
        message_type: MessageType,
        role: Option<String>,
        content: Content,
        metadata: Option<Metadata>,
        max_retries: u32,
    ) -> StoreResult<AgentMessage> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let (content_str, metadata) = encode_content(content, metadata);

        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                "INSERT INTO agent_message (id, agent_id, sequence_number, message_type, role, content, metadata, created_at)
                 SELECT ?1, ?2, COALESCE(MAX(sequence_number), 0) + 1, ?3, ?4, ?5, ?6, ?7
                 FROM agent_message WHERE agent_id = ?2",
            )
            .bind(id.to_string())
            .bind(agent_id.to_string())
            .bind(message_type.to_string())
            .bind(&role)
            .bind(&content_str)
            .bind(metadata.as_ref().map(|m| serde_json::to_string(m)).transpose()?)
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    return self
                        .find_by_message_id(id)
                        .await?
                        .ok_or_else(|| StoreError::AgentNotFound(agent_id.to_string()));
                }
                Err(e) => {
                    let classified = classify(&agent_id.to_string(), e);
                    match classified {
                        StoreError::UniqueViolation(_) if attempt < max_retries => {
                            attempt += 1;
                            continue;
                        }
                        other => return Err(other),
                    }
                }
            }
        }
    }

    async fn find_by_message_id(&self, id: Uuid) -> StoreResult<Option<AgentMessage>> {
        let row = sqlx::query("SELECT * FROM agent_message WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_message).transpose()
    }

    /// All messages for `agent_id`, ordered by `sequence_number` ascending.
    pub async fn find_by_agent(&self, agent_id: AgentId) -> StoreResult<Vec<AgentMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM agent_message WHERE agent_id = ?1 ORDER BY sequence_number ASC",
        )
        .bind(agent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    /// Messages for `agent_id` with `sequence_number > since`, used by a
    /// reconnecting subscriber to fill the gap between its last-seen
    /// sequence and the live stream.
    pub async fn find_by_agent_since(
        &self,
        agent_id: AgentId,
        since: i64,
    ) -> StoreResult<Vec<AgentMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM agent_message WHERE agent_id = ?1 AND sequence_number > ?2 ORDER BY sequence_number ASC",
        )
        .bind(agent_id.to_string())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }
}

fn encode_content(content: Content, metadata: Option<Metadata>) -> (String, Option<Metadata>) {
    match content {
        Content::Text(s) => (s, metadata),
        Content::Json(v) => {
            let mut metadata = metadata.unwrap_or_default();
            metadata.insert(
                CONTENT_TYPE_KEY.to_string(),
                serde_json::Value::String(CONTENT_TYPE_JSON.to_string()),
            );
            (v.to_string(), Some(metadata))
        }
    }
}

fn decode_content(content: String, metadata: &Option<Metadata>) -> StoreResult<Content> {
    let is_json = metadata
        .as_ref()
        .and_then(|m| m.get(CONTENT_TYPE_KEY))
        .and_then(|v| v.as_str())
        == Some(CONTENT_TYPE_JSON);

    if is_json {
        Ok(Content::Json(serde_json::from_str(&content)?))
    } else {
        Ok(Content::Text(content))
    }
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> StoreResult<AgentMessage> {
    let id: String = row.try_get("id")?;
    let agent_id: String = row.try_get("agent_id")?;
    let message_type: String = row.try_get("message_type")?;
    let content: String = row.try_get("content")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;

    let metadata: Option<Metadata> = metadata.map(|m| serde_json::from_str(&m)).transpose()?;

    Ok(AgentMessage {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        agent_id: AgentId(
            Uuid::parse_str(&agent_id)
                .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        ),
        sequence_number: row.try_get("sequence_number")?,
        message_type: parse_message_type(&message_type)?,
        role: row.try_get("role")?,
        content: decode_content(content, &metadata)?,
        metadata,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_message_type(s: &str) -> StoreResult<MessageType> {
    match s {
        "user" => Ok(MessageType::User),
        "assistant" => Ok(MessageType::Assistant),
        "system" => Ok(MessageType::System),
        "error" => Ok(MessageType::Error),
        other => Err(StoreError::Database(sqlx::Error::Decode(
            format!("unknown message type: {other}").into(),
        ))),
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_store::AgentStore;
    use crate::schema::connect_in_memory;
    use agent_core_common::{Agent, AgentType, Configuration};

    async fn test_pool() -> SqlitePool {
        connect_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn sequence_numbers_are_gap_free_and_ordered() {
        let pool = test_pool().await;
        let agent_store = AgentStore::new(pool.clone());
        let message_store = MessageStore::new(pool);

        let agent = Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent_store.insert(&agent).await.unwrap();

        for i in 0..5 {
            let msg = message_store
                .save(
                    agent.id,
                    MessageType::Assistant,
                    None,
                    Content::Text(format!("chunk-{i}")),
                    None,
                    5,
                )
                .await
                .unwrap();
            assert_eq!(msg.sequence_number, i + 1);
        }

        let all = message_store.find_by_agent(agent.id).await.unwrap();
        let seqs: Vec<i64> = all.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn save_without_agent_row_rejects_with_foreign_key_violation() {
        let pool = test_pool().await;
        let message_store = MessageStore::new(pool);
        let err = message_store
            .save(
                AgentId::new(),
                MessageType::User,
                None,
                Content::Text("orphan".into()),
                None,
                5,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn json_content_round_trips_via_content_type_metadata() {
        let pool = test_pool().await;
        let agent_store = AgentStore::new(pool.clone());
        let message_store = MessageStore::new(pool);

        let agent = Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent_store.insert(&agent).await.unwrap();

        let payload = serde_json::json!({"usage": {"tokens": 42}});
        let saved = message_store
            .save(
                agent.id,
                MessageType::System,
                None,
                Content::Json(payload.clone()),
                None,
                5,
            )
            .await
            .unwrap();

        assert_eq!(saved.content, Content::Json(payload));

        let fetched = message_store.find_by_agent(agent.id).await.unwrap();
        assert_eq!(fetched[0].content.as_str(), None);
    }

    #[tokio::test]
    async fn find_by_agent_since_returns_only_newer_messages() {
        let pool = test_pool().await;
        let agent_store = AgentStore::new(pool.clone());
        let message_store = MessageStore::new(pool);

        let agent = Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent_store.insert(&agent).await.unwrap();

        for i in 0..3 {
            message_store
                .save(
                    agent.id,
                    MessageType::Assistant,
                    None,
                    Content::Text(format!("m{i}")),
                    None,
                    5,
                )
                .await
                .unwrap();
        }

        let since = message_store.find_by_agent_since(agent.id, 1).await.unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].sequence_number, 2);
        assert_eq!(since[1].sequence_number, 3);
    }
}
