//! LLM Provider Abstraction Layer
//!
//! The orchestrator talks to the model runtime through the [`LLMProvider`]
//! trait. A provider receives the system prompt, the committed history, the
//! turns produced so far in the current user turn, and the aggregated tool
//! catalog, and answers with either tool calls or a final answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::{ToolCall, Turn};
use crate::servers::catalog::CatalogEntry;

pub mod ollama;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Everything the model sees for one round.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,

    /// Committed conversation, ending with the current user turn
    pub history: &'a [Turn],

    /// Tool requests and results produced earlier in this user turn
    pub pending: &'a [Turn],

    pub tools: &'a [CatalogEntry],
}

impl<'a> ModelRequest<'a> {
    /// History followed by pending turns, in conversation order.
    pub fn turns(&self) -> impl Iterator<Item = &'a Turn> {
        self.history.iter().chain(self.pending.iter())
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMResponse {
    /// LLM wants one or more tools called
    ToolCalls {
        #[serde(default)]
        content: String,
        calls: Vec<ToolCall>,
    },

    /// LLM has provided a final answer
    FinalAnswer(FinalAnswer),
}

/// Final answer from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// The answer content
    pub content: String,
}

impl FinalAnswer {
    /// Create a new final answer
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama")
    fn name(&self) -> &str;

    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Generate a response from the LLM
    ///
    /// # Returns
    /// * `Ok(LLMResponse)` - Either tool calls or a final answer
    /// * `Err(LLMError)` - If the request fails
    async fn generate(&self, request: ModelRequest<'_>) -> Result<LLMResponse>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Helper function to parse a tool call from plain response text.
///
/// Used when the runtime returns no native tool calls. Handles:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}` (or `"name"`)
/// 2. Fenced JSON, with or without trailing text
/// 3. `<tool_call>name({...})</tool_call>` markers
/// 4. JSON embedded in prose, found by scanning for `{"function":`
pub fn parse_tool_calls(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();

    if let Some(tc) = try_parse_function_json(trimmed) {
        return Some(tc);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(tc) = try_parse_function_json(inner.trim()) {
            return Some(tc);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find("<tool_call>"), trimmed.find("</tool_call>")) {
        if start + 11 <= end {
            let tool_content = &trimmed[start + 11..end];
            if let Some(paren_pos) = tool_content.find('(') {
                let tool_name = tool_content[..paren_pos].trim();
                let args_end = tool_content
                    .rfind(')')
                    .filter(|&end| end > paren_pos)
                    .unwrap_or(tool_content.len());
                let raw_args = tool_content[paren_pos + 1..args_end].trim();
                if !tool_name.is_empty() {
                    return Some(ToolCall::new(tool_name, parse_arguments(raw_args)));
                }
            }
        }
    }

    for key in ["{\"function\"", "{\"name\""] {
        if let Some(pos) = trimmed.find(key) {
            if let Some(json_str) = extract_balanced_json(&trimmed[pos..]) {
                if let Some(tc) = try_parse_function_json(json_str) {
                    return Some(tc);
                }
            }
        }
    }

    None
}

/// Decodes an argument payload; strings holding JSON are unwrapped.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => {
            serde_json::from_str(&inner).unwrap_or(Value::String(inner))
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Try to parse a string as a `{"function"|"name": "...", "arguments": {...}}` tool call.
fn try_parse_function_json(s: &str) -> Option<ToolCall> {
    let json: Value = serde_json::from_str(s).ok()?;
    let function = json
        .get("function")
        .and_then(Value::as_str)
        .or_else(|| json.get("name").and_then(Value::as_str))?;
    let arguments = match json.get("arguments")? {
        Value::String(raw) => parse_arguments(raw),
        other => other.clone(),
    };
    Some(ToolCall::new(function, arguments))
}

/// Extract the body of the first markdown code fence in the text.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line
    let body_start = fence_start + 3 + after_opening.find('\n')? + 1;
    let body_end = body_start + content[body_start..].find("```")?;

    if body_start >= body_end {
        return None;
    }
    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
