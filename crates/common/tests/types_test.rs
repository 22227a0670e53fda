use agent_core_common::{AgentId, AgentType, Configuration, Content, LaunchRequest, MessageType};

#[test]
fn agent_id_instances_are_distinct() {
    assert_ne!(AgentId::new(), AgentId::new());
}

#[test]
fn unrecognized_agent_type_round_trips_as_custom() {
    let t: AgentType = "codex-cli".into();
    assert_eq!(t, AgentType::Custom("codex-cli".to_string()));
    assert_eq!(t.to_string(), "codex-cli");
}

#[test]
fn known_agent_types_use_their_wire_names() {
    assert_eq!(AgentType::ClaudeCli.to_string(), "claude-cli");
    assert_eq!(AgentType::GeminiCli.to_string(), "gemini-cli");
    assert_eq!(AgentType::Synthetic.to_string(), "synthetic");
}

#[test]
fn message_type_display_matches_wire_strings() {
    assert_eq!(MessageType::User.to_string(), "user");
    assert_eq!(MessageType::Assistant.to_string(), "assistant");
    assert_eq!(MessageType::System.to_string(), "system");
    assert_eq!(MessageType::Error.to_string(), "error");
}

#[test]
fn text_content_exposes_its_str_json_content_does_not() {
    let text = Content::from("hello");
    assert_eq!(text.as_str(), Some("hello"));

    let json = Content::Json(serde_json::json!({"a": 1}));
    assert_eq!(json.as_str(), None);
}

#[test]
fn launch_request_defaults_has_instructions_to_false() {
    let request = LaunchRequest::new(AgentType::Synthetic, "hi".to_string(), Configuration::new());
    assert!(!request.has_instructions);

    let with = request.with_instructions(true);
    assert!(with.has_instructions);
}
