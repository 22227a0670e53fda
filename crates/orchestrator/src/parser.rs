//! Normalizes a runner's raw event lines into `AgentMessage` fields.

use agent_core_common::{Content, Metadata, MessageType};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// The normalized fields a parsed line contributes to a persisted message.
/// `None` means the line carries no displayable content and should be
/// dropped rather than persisted.
pub struct ParsedEvent {
    pub message_type: MessageType,
    pub role: Option<String>,
    pub content: Content,
    pub metadata: Option<Metadata>,
}

pub trait Parser: Send + Sync {
    fn parse(&self, line: &str) -> Result<Option<ParsedEvent>, ParseError>;
}

/// Parses the JSONL event stream emitted by Claude Code-style runners:
/// `content_block_delta` chunks, a final assistant message, a `system`
/// init event, and a terminal `result`/`message_stop` event carrying
/// usage stats. Anything else is treated as non-displayable and dropped.
pub struct ClaudeStyleParser;

impl Parser for ClaudeStyleParser {
    fn parse(&self, line: &str) -> Result<Option<ParsedEvent>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(line)?;
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("type"))?;

        match event_type {
            "content_block_delta" => Ok(Some(parse_content_delta(&value)?)),
            "message" | "assistant" => Ok(Some(parse_final_assistant_message(&value)?)),
            "system" => Ok(Some(parse_system_init(&value)?)),
            "result" | "message_stop" => Ok(Some(parse_terminal_result(&value)?)),
            _ => Ok(None),
        }
    }
}

fn text_delta(value: &Value) -> String {
    value
        .get("delta")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_content_delta(value: &Value) -> Result<ParsedEvent, ParseError> {
    let mut metadata = Metadata::new();
    metadata.insert(
        "eventType".to_string(),
        Value::String("content_delta".to_string()),
    );

    Ok(ParsedEvent {
        message_type: MessageType::Assistant,
        role: Some("assistant".to_string()),
        content: Content::Text(text_delta(value)),
        metadata: Some(metadata),
    })
}

fn parse_final_assistant_message(value: &Value) -> Result<ParsedEvent, ParseError> {
    let text = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .or_else(|| value.get("content").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Ok(ParsedEvent {
        message_type: MessageType::Assistant,
        role: Some("assistant".to_string()),
        content: Content::Text(text),
        metadata: None,
    })
}

fn parse_system_init(value: &Value) -> Result<ParsedEvent, ParseError> {
    let mut metadata = Metadata::new();
    metadata.insert("subtype".to_string(), Value::String("init".to_string()));

    Ok(ParsedEvent {
        message_type: MessageType::System,
        role: Some("system".to_string()),
        content: Content::Json(value.clone()),
        metadata: Some(metadata),
    })
}

fn parse_terminal_result(value: &Value) -> Result<ParsedEvent, ParseError> {
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || value.get("stop_reason").and_then(Value::as_str) == Some("error");

    let mut metadata = Metadata::new();
    metadata.insert(
        "subtype".to_string(),
        Value::String(if is_error { "error" } else { "success" }.to_string()),
    );
    if let Some(usage) = value.get("usage") {
        metadata.insert("usage".to_string(), usage.clone());
    }

    Ok(ParsedEvent {
        message_type: MessageType::System,
        role: Some("system".to_string()),
        content: Content::Json(value.clone()),
        metadata: Some(metadata),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_dropped() {
        let parser = ClaudeStyleParser;
        assert!(parser.parse("").unwrap().is_none());
        assert!(parser.parse("   ").unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let parser = ClaudeStyleParser;
        assert!(matches!(parser.parse("{not json"), Err(ParseError::Json(_))));
    }

    #[test]
    fn missing_type_field_is_a_parse_error() {
        let parser = ClaudeStyleParser;
        let err = parser.parse(r#"{"foo": "bar"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("type")));
    }

    #[test]
    fn content_delta_becomes_assistant_with_event_type_metadata() {
        let parser = ClaudeStyleParser;
        let line = r#"{"type":"content_block_delta","delta":{"text":"hel"}}"#;
        let parsed = parser.parse(line).unwrap().unwrap();
        assert_eq!(parsed.message_type, MessageType::Assistant);
        assert_eq!(parsed.content.as_str(), Some("hel"));
        assert_eq!(
            parsed.metadata.unwrap().get("eventType").unwrap(),
            "content_delta"
        );
    }

    #[test]
    fn final_message_has_no_event_type_metadata() {
        let parser = ClaudeStyleParser;
        let line = r#"{"type":"message","message":{"content":[{"text":"done"}]}}"#;
        let parsed = parser.parse(line).unwrap().unwrap();
        assert_eq!(parsed.message_type, MessageType::Assistant);
        assert_eq!(parsed.content.as_str(), Some("done"));
        assert!(parsed.metadata.is_none());
    }

    #[test]
    fn system_init_sets_subtype() {
        let parser = ClaudeStyleParser;
        let line = r#"{"type":"system","subtype":"init"}"#;
        let parsed = parser.parse(line).unwrap().unwrap();
        assert_eq!(parsed.message_type, MessageType::System);
        assert_eq!(parsed.metadata.unwrap().get("subtype").unwrap(), "init");
    }

    #[test]
    fn result_event_carries_usage_and_success_subtype() {
        let parser = ClaudeStyleParser;
        let line = r#"{"type":"result","usage":{"tokens":42}}"#;
        let parsed = parser.parse(line).unwrap().unwrap();
        let metadata = parsed.metadata.unwrap();
        assert_eq!(metadata.get("subtype").unwrap(), "success");
        assert_eq!(metadata.get("usage").unwrap()["tokens"], 42);
    }

    #[test]
    fn result_event_with_error_stop_reason_is_marked_error() {
        let parser = ClaudeStyleParser;
        let line = r#"{"type":"result","stop_reason":"error"}"#;
        let parsed = parser.parse(line).unwrap().unwrap();
        assert_eq!(parsed.metadata.unwrap().get("subtype").unwrap(), "error");
    }

    #[test]
    fn unrecognized_event_type_is_dropped() {
        let parser = ClaudeStyleParser;
        let line = r#"{"type":"ping"}"#;
        assert!(parser.parse(line).unwrap().is_none());
    }
}
