//! Core domain types: `Agent`, `AgentMessage`, `LaunchRequest`, and the
//! supporting enums.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Opaque agent identity (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The runner variant an agent is driven by. Open-ended
/// (`type ∈ {claude-code, gemini-cli, synthetic, …}`): unrecognized values
/// round-trip through `Custom` rather than failing to deserialize. The wire
/// representation is always a plain string, so (de)serialization is
/// implemented by hand instead of via `#[derive]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentType {
    ClaudeCli,
    ClaudeSdk,
    ClaudePythonProxy,
    GeminiCli,
    Synthetic,
    Custom(String),
}

impl AgentType {
    fn as_wire_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Self::ClaudeCli => "claude-cli".into(),
            Self::ClaudeSdk => "claude-sdk".into(),
            Self::ClaudePythonProxy => "claude-python-proxy".into(),
            Self::GeminiCli => "gemini-cli".into(),
            Self::Synthetic => "synthetic".into(),
            Self::Custom(s) => s.as_str().into(),
        }
    }
}

impl From<&str> for AgentType {
    fn from(s: &str) -> Self {
        match s {
            "claude-cli" => Self::ClaudeCli,
            "claude-sdk" => Self::ClaudeSdk,
            "claude-python-proxy" => Self::ClaudePythonProxy,
            "gemini-cli" => Self::GeminiCli,
            "synthetic" => Self::Synthetic,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

impl Serialize for AgentType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for AgentType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AgentType::from(s.as_str()))
    }
}

/// Agent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Terminated,
}

impl AgentStatus {
    /// `completed`, `failed`, `terminated` are terminal — no further
    /// transitions are legal from them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Running, Completed)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Terminated)
                | (Initializing, Failed)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

pub type Configuration = HashMap<String, Value>;

/// The persisted `Agent` entity. Status transitions are encapsulated
/// behind `mark_as_*` methods — there is no public setter for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub agent_type: AgentType,
    pub prompt: String,
    pub configuration: Configuration,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Agent {
    /// Construct a fresh agent in `initializing` state. Fails if `prompt`
    /// is empty.
    pub fn new(
        agent_type: AgentType,
        prompt: String,
        configuration: Configuration,
    ) -> CoreResult<Self> {
        if prompt.trim().is_empty() {
            return Err(CoreError::EmptyPrompt);
        }
        Ok(Self {
            id: AgentId::new(),
            agent_type,
            prompt,
            configuration,
            status: AgentStatus::Initializing,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        })
    }

    fn transition(&mut self, next: AgentStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// `initializing → running`. Sets `started_at`.
    pub fn mark_as_running(&mut self) -> CoreResult<()> {
        self.transition(AgentStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `running → completed`. Sets `completed_at`.
    pub fn mark_as_completed(&mut self) -> CoreResult<()> {
        self.transition(AgentStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `running → paused`.
    pub fn mark_as_paused(&mut self) -> CoreResult<()> {
        self.transition(AgentStatus::Paused)
    }

    /// `paused → running`. Does not re-set `started_at` (already set on
    /// first entry into `running`).
    pub fn mark_as_resumed(&mut self) -> CoreResult<()> {
        self.transition(AgentStatus::Running)
    }

    /// `running → terminated`. Sets `completed_at`.
    pub fn mark_as_terminated(&mut self) -> CoreResult<()> {
        self.transition(AgentStatus::Terminated)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `{initializing, running} → failed`. Records `error` and sets
    /// `completed_at`.
    pub fn mark_as_failed(&mut self, error: impl Into<String>) -> CoreResult<()> {
        self.transition(AgentStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// `type ∈ {user, assistant, system, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// `content: string | JSON-object`. JSON content is
/// round-tripped through `metadata.content_type = "json"` at the store
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Json(Value),
}

impl Content {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Json(_) => None,
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

pub type Metadata = HashMap<String, Value>;

/// A durable, append-only record created only by the Streaming Service,
/// never mutated, deleted only by cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub sequence_number: i64,
    pub message_type: MessageType,
    pub role: Option<String>,
    pub content: Content,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

/// Transient request living only inside the launch queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub id: Uuid,
    pub agent_type: AgentType,
    pub prompt: String,
    pub configuration: Configuration,
    pub has_instructions: bool,
    pub created_at: DateTime<Utc>,
}

impl LaunchRequest {
    pub fn new(agent_type: AgentType, prompt: String, configuration: Configuration) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type,
            prompt,
            configuration,
            has_instructions: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_instructions(mut self, has_instructions: bool) -> Self {
        self.has_instructions = has_instructions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_prompt() {
        let result = Agent::new(AgentType::Synthetic, "   ".into(), Configuration::new());
        assert_eq!(result.unwrap_err(), CoreError::EmptyPrompt);
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut agent =
            Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        assert_eq!(agent.status, AgentStatus::Initializing);
        assert!(agent.started_at.is_none());

        agent.mark_as_running().unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
        assert!(agent.started_at.is_some());

        agent.mark_as_completed().unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        assert!(agent.completed_at.is_some());
        assert!(agent.status.is_terminal());
    }

    #[test]
    fn pause_and_resume_round_trips() {
        let mut agent =
            Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent.mark_as_running().unwrap();
        agent.mark_as_paused().unwrap();
        assert_eq!(agent.status, AgentStatus::Paused);
        agent.mark_as_resumed().unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
    }

    #[test]
    fn illegal_transition_is_rejected_and_not_applied() {
        let mut agent =
            Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        let before = agent.status;
        let err = agent.mark_as_completed().unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(agent.status, before);
    }

    #[test]
    fn failed_records_error_and_is_terminal_from_running() {
        let mut agent =
            Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent.mark_as_running().unwrap();
        agent.mark_as_failed("boom").unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert_eq!(agent.error.as_deref(), Some("boom"));
        assert!(agent.completed_at.is_some());
    }

    #[test]
    fn agent_type_round_trips_through_json() {
        let t = AgentType::Custom("codex-cli".into());
        let json = serde_json::to_string(&t).unwrap();
        let back: AgentType = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
