//! Consumer-side helper that collapses streaming deltas into display
//! messages. Not part of the persisted log — operates on whatever
//! sequence of `AgentMessage`s a subscriber has already received.

use agent_core_common::{AgentMessage, Content, Metadata, MessageType};
use serde_json::Value;

fn is_content_delta(message: &AgentMessage) -> bool {
    message.message_type == MessageType::Assistant
        && message
            .metadata
            .as_ref()
            .and_then(|m| m.get("eventType"))
            .and_then(Value::as_str)
            == Some("content_delta")
}

fn is_bare_assistant(message: &AgentMessage) -> bool {
    message.message_type == MessageType::Assistant
        && message
            .metadata
            .as_ref()
            .and_then(|m| m.get("eventType"))
            .is_none()
}

fn text_of(message: &AgentMessage) -> String {
    message.content.as_str().unwrap_or_default().to_string()
}

fn synthesize(buffer: &[String], streaming: bool) -> AgentMessage {
    let aggregated = buffer.concat();
    let mut metadata = Metadata::new();
    metadata.insert("aggregated".to_string(), Value::Bool(true));
    metadata.insert(
        "tokenCount".to_string(),
        Value::Number(buffer.len().into()),
    );
    metadata.insert("streaming".to_string(), Value::Bool(streaming));

    AgentMessage {
        id: uuid::Uuid::new_v4(),
        agent_id: agent_core_common::AgentId::new(),
        sequence_number: -1,
        message_type: MessageType::Assistant,
        role: Some("assistant".to_string()),
        content: Content::Text(aggregated),
        metadata: Some(metadata),
        created_at: chrono::Utc::now(),
    }
}

/// Walks `messages` in order, collapsing runs of `content_delta` entries
/// into one synthesized message each, and dropping the trailing
/// complete-frame duplicate a provider may emit after its own deltas.
/// The `agent_id`/`id`/`created_at`/`sequence_number` on a synthesized
/// message are placeholders — this is a display transform, not a new
/// persisted record.
pub fn aggregate(messages: &[AgentMessage]) -> Vec<AgentMessage> {
    let mut out = Vec::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let message = &messages[i];

        if is_content_delta(message) {
            buffer.push(text_of(message));
            i += 1;
            continue;
        }

        if !buffer.is_empty() {
            let aggregated_text: String = buffer.concat();
            out.push(synthesize(&buffer, false));
            buffer.clear();

            if is_bare_assistant(message) && text_of(message).trim() == aggregated_text.trim() {
                i += 1;
                continue;
            }
        }

        out.push(message.clone());
        i += 1;
    }

    if !buffer.is_empty() {
        out.push(synthesize(&buffer, true));
    }

    out
}
