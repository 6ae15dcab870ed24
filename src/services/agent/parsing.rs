//! Reply parsing for the Agent Orchestrator (SPEC_FULL.md §4.J). Ported
//! directly from `original_source/backend/app/agents/orchestrator.py`'s
//! `_parse_response`: try a fenced ```json block first, then the whole
//! reply as JSON, and finally fall back to treating the reply as a direct,
//! tool-free response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap());

#[derive(Debug, Clone, Deserialize, Default)]
struct RawThought {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    action_input: Option<Value>,
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentThought {
    pub thought: String,
    pub action: Option<String>,
    pub action_input: Option<Value>,
    pub response: Option<String>,
}

impl From<RawThought> for AgentThought {
    fn from(raw: RawThought) -> Self {
        Self { thought: raw.thought, action: raw.action, action_input: raw.action_input, response: raw.response }
    }
}

pub fn parse_reply(reply: &str) -> AgentThought {
    if let Some(captures) = FENCED_JSON.captures(reply) {
        if let Ok(raw) = serde_json::from_str::<RawThought>(&captures[1]) {
            return raw.into();
        }
    }

    if let Ok(raw) = serde_json::from_str::<RawThought>(reply.trim()) {
        return raw.into();
    }

    AgentThought {
        thought: "Responding directly".to_string(),
        action: Some("respond".to_string()),
        action_input: None,
        response: Some(reply.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_block() {
        let reply = "some preamble\n```json\n{\"thought\":\"t\",\"action\":\"rag_search\",\"action_input\":{\"query\":\"q\"}}\n```\ntrailer";
        let thought = parse_reply(reply);
        assert_eq!(thought.action.as_deref(), Some("rag_search"));
        assert_eq!(thought.action_input.unwrap()["query"], "q");
    }

    #[test]
    fn parses_bare_json() {
        let reply = r#"{"thought":"t","action":"respond","response":"hi"}"#;
        let thought = parse_reply(reply);
        assert_eq!(thought.response.as_deref(), Some("hi"));
    }

    #[test]
    fn falls_back_to_plain_text() {
        let reply = "Just a normal answer with no JSON at all.";
        let thought = parse_reply(reply);
        assert_eq!(thought.action.as_deref(), Some("respond"));
        assert_eq!(thought.response.as_deref(), Some(reply));
    }

    #[test]
    fn malformed_fenced_block_falls_through_to_plain_text() {
        let reply = "```json\n{not valid json\n```";
        let thought = parse_reply(reply);
        assert_eq!(thought.action.as_deref(), Some("respond"));
    }
}
