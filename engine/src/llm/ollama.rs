//! Ollama LLM Provider
//!
//! Implements [`LLMProvider`] against a local Ollama runtime, typically at
//! http://localhost:11434, using the non-streaming `/api/chat` endpoint.
//!
//! Key features:
//! - Native tool calling: the aggregated catalog is sent as `tools`
//! - Tool requests and results are replayed as `tool_calls` / `tool` messages
//! - Text fallback through [`parse_tool_calls`] for models without native tools
//! - Model listing through `/api/tags`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{
    parse_arguments, parse_tool_calls, FinalAnswer, LLMError, LLMProvider, LLMResponse,
    ModelRequest, Result,
};
use crate::conversation::{ToolCall, Turn};
use crate::servers::catalog::CatalogEntry;

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

/// One locally installed model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the default 300s request timeout
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(300))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Models available at the runtime (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse model list: {}", e)))?;
        Ok(tags.models)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> LLMError {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(format!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.base_url
            ))
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }

    /// Convert the request turns to Ollama's message format
    fn convert_messages(&self, request: &ModelRequest<'_>) -> Vec<OllamaMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + request.pending.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(OllamaMessage::text("system", request.system_prompt));
        }

        for turn in request.turns() {
            let message = match turn {
                Turn::User { content } => OllamaMessage::text("user", content),
                Turn::Assistant { content } => OllamaMessage::text("assistant", content),
                Turn::ToolRequest { content, calls } => OllamaMessage {
                    role: "assistant".to_string(),
                    content: content.clone(),
                    tool_calls: calls
                        .iter()
                        .map(|call| OllamaToolCall {
                            function: OllamaFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect(),
                    tool_name: None,
                },
                Turn::ToolResult { name, content, .. } => OllamaMessage {
                    role: "tool".to_string(),
                    content: content.clone(),
                    tool_calls: Vec::new(),
                    tool_name: Some(name.clone()),
                },
            };
            messages.push(message);
        }
        messages
    }
}

fn convert_tools(tools: &[CatalogEntry]) -> Vec<OllamaTool> {
    tools
        .iter()
        .map(|entry| OllamaTool {
            kind: "function".to_string(),
            function: OllamaFunction {
                name: entry.qualified_name.clone(),
                description: entry.description.clone(),
                parameters: entry.input_schema.clone(),
            },
        })
        .collect()
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: ModelRequest<'_>) -> Result<LLMResponse> {
        let ollama_messages = self.convert_messages(&request);

        tracing::debug!(
            "Ollama request: model={}, messages={}, tools={}, total_chars={}",
            self.model,
            ollama_messages.len(),
            request.tools.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>()
        );

        let body = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            tools: convert_tools(request.tools),
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        let status = response.status();
        if status.is_client_error() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::InvalidRequest(format!(
                "Ollama rejected the request ({}): {}",
                status, error_text
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let message = ollama_response.message;
        if !message.tool_calls.is_empty() {
            let calls = message
                .tool_calls
                .into_iter()
                .map(|tc| {
                    let arguments = match tc.function.arguments {
                        Value::String(raw) => parse_arguments(&raw),
                        Value::Null => Value::Object(Default::default()),
                        other => other,
                    };
                    ToolCall::new(tc.function.name, arguments)
                })
                .collect();
            return Ok(LLMResponse::ToolCalls {
                content: message.content,
                calls,
            });
        }

        match parse_tool_calls(&message.content) {
            Some(call) => Ok(LLMResponse::ToolCalls {
                content: String::new(),
                calls: vec![call],
            }),
            None => Ok(LLMResponse::FinalAnswer(FinalAnswer::new(message.content))),
        }
    }

    async fn check_health(&self) -> bool {
        self.list_models().await.is_ok()
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl OllamaMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    kind: String,
    function: OllamaFunction,
}

#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: Value,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ollama_provider_properties() {
        let provider = OllamaProvider::new("http://localhost:11434/", "llama3.1:8b");
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama3.1:8b");
        assert_eq!(provider.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_message_conversion() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");
        let call = ToolCall::new("list_dir", json!({ "path": "." }));
        let history = vec![Turn::user("list files")];
        let pending = vec![
            Turn::ToolRequest {
                content: String::new(),
                calls: vec![call.clone()],
            },
            Turn::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: r#"["a.txt"]"#.to_string(),
                is_error: false,
            },
        ];
        let request = ModelRequest {
            system_prompt: "You are a helpful assistant",
            history: &history,
            pending: &pending,
            tools: &[],
        };

        let messages = provider.convert_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[2].tool_calls[0].function.name, "list_dir");
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_name.as_deref(), Some("list_dir"));
    }

    #[test]
    fn test_tools_serialize_as_functions() {
        let entry = CatalogEntry {
            qualified_name: "fs.read_file".to_string(),
            server: "fs".to_string(),
            tool: "read_file".to_string(),
            description: "Read a file".to_string(),
            input_schema: json!({ "type": "object" }),
        };
        let encoded = serde_json::to_value(convert_tools(&[entry])).unwrap();
        assert_eq!(encoded[0]["type"], "function");
        assert_eq!(encoded[0]["function"]["name"], "fs.read_file");
        assert_eq!(encoded[0]["function"]["parameters"]["type"], "object");
    }
}
