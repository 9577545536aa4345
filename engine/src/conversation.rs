//! Conversation model
//!
//! A conversation is an ordered list of [`Turn`]s. Tool traffic is explicit:
//! an assistant turn that requests tools is a [`Turn::ToolRequest`], and each
//! requested call is answered by exactly one [`Turn::ToolResult`] placed
//! directly after it, in request order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One entry in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    /// Text typed by the user
    User { content: String },

    /// Final assistant text for a user turn
    Assistant { content: String },

    /// Assistant turn asking for one or more tool calls
    ToolRequest {
        #[serde(default)]
        content: String,
        calls: Vec<ToolCall>,
    },

    /// Answer to one tool call
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Short role label used in listings and logs.
    pub fn role(&self) -> &'static str {
        match self {
            Turn::User { .. } => "user",
            Turn::Assistant { .. } => "assistant",
            Turn::ToolRequest { .. } => "tool_request",
            Turn::ToolResult { .. } => "tool_result",
        }
    }
}

/// Where a qualified tool name resolved to at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolTarget {
    pub server: String,
    pub tool: String,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name as it appeared in the aggregated catalog
    pub name: String,

    /// Arguments to pass to the tool
    #[serde(default)]
    pub arguments: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ToolTarget>,
}

impl ToolCall {
    /// Create a new tool call with a fresh id
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
            target: None,
        }
    }
}

/// Ordered, append-only history of one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Content of the first user turn, used to derive default titles.
    pub fn first_user_message(&self) -> Option<&str> {
        self.turns.iter().find_map(|turn| match turn {
            Turn::User { content } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Checks the tool pairing rules.
    ///
    /// Every `ToolResult` must answer a call of the `ToolRequest` directly
    /// before its block, in order, and every call must be answered before the
    /// next non-result turn.
    pub fn validate(&self) -> Result<(), String> {
        let mut open: Vec<&str> = Vec::new();

        for (position, turn) in self.turns.iter().enumerate() {
            match turn {
                Turn::ToolResult { call_id, .. } => {
                    if open.is_empty() {
                        return Err(format!(
                            "turn {} answers call '{}' that was never requested",
                            position, call_id
                        ));
                    }
                    let expected = open.remove(0);
                    if expected != call_id {
                        return Err(format!(
                            "turn {} answers call '{}' but '{}' was next",
                            position, call_id, expected
                        ));
                    }
                }
                other => {
                    if let Some(unanswered) = open.first() {
                        return Err(format!(
                            "call '{}' is unanswered before turn {}",
                            unanswered, position
                        ));
                    }
                    if let Turn::ToolRequest { calls, .. } = other {
                        let mut seen = HashSet::new();
                        for call in calls {
                            if !seen.insert(call.id.as_str()) {
                                return Err(format!("duplicate call id '{}'", call.id));
                            }
                            open.push(call.id.as_str());
                        }
                    }
                }
            }
        }

        match open.first() {
            Some(unanswered) => Err(format!("call '{}' is unanswered", unanswered)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_for(call: &ToolCall, content: &str) -> Turn {
        Turn::ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.to_string(),
            is_error: false,
        }
    }

    #[test]
    fn test_turn_wire_format() {
        let turn = Turn::user("hello");
        let encoded = serde_json::to_value(&turn).unwrap();
        assert_eq!(encoded, json!({ "role": "user", "content": "hello" }));

        let call = ToolCall::new("list_dir", json!({ "path": "." }));
        let request = Turn::ToolRequest {
            content: String::new(),
            calls: vec![call],
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["role"], "tool_request");
        assert_eq!(encoded["calls"][0]["name"], "list_dir");
        assert!(encoded["calls"][0].get("target").is_none());
    }

    #[test]
    fn test_tool_call_ids_are_unique() {
        let a = ToolCall::new("x", Value::Null);
        let b = ToolCall::new("x", Value::Null);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("call_"));
    }

    #[test]
    fn test_validate_accepts_answered_calls() {
        let first = ToolCall::new("read_file", json!({ "path": "a" }));
        let second = ToolCall::new("read_file", json!({ "path": "b" }));
        let conversation = Conversation::from_turns(vec![
            Turn::user("read a and b"),
            Turn::ToolRequest {
                content: String::new(),
                calls: vec![first.clone(), second.clone()],
            },
            result_for(&first, "A"),
            result_for(&second, "B"),
            Turn::assistant("done"),
        ]);
        assert!(conversation.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unanswered_call() {
        let call = ToolCall::new("read_file", json!({}));
        let conversation = Conversation::from_turns(vec![
            Turn::user("go"),
            Turn::ToolRequest {
                content: String::new(),
                calls: vec![call],
            },
            Turn::assistant("done"),
        ]);
        assert!(conversation.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_order_results() {
        let first = ToolCall::new("a", json!({}));
        let second = ToolCall::new("b", json!({}));
        let conversation = Conversation::from_turns(vec![
            Turn::ToolRequest {
                content: String::new(),
                calls: vec![first.clone(), second.clone()],
            },
            result_for(&second, "B"),
            result_for(&first, "A"),
        ]);
        assert!(conversation.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_orphan_result() {
        let call = ToolCall::new("a", json!({}));
        let conversation =
            Conversation::from_turns(vec![Turn::user("hi"), result_for(&call, "A")]);
        assert!(conversation.validate().is_err());
    }

    #[test]
    fn test_first_user_message() {
        let conversation =
            Conversation::from_turns(vec![Turn::assistant("hi"), Turn::user("question")]);
        assert_eq!(conversation.first_user_message(), Some("question"));
        assert_eq!(Conversation::new().first_user_message(), None);
    }
}
