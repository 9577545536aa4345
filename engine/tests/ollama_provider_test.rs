//! Integration tests for the Ollama provider against a mock runtime
//!
//! Validates the wire contract of `/api/chat` and `/api/tags`:
//! - Native tool calls and the text fallback
//! - Error statuses and timeouts
//! - A whole turn driven through the orchestrator

mod common;

use common::{running_supervisor, MockTransport};
use parley_engine::agent::{Orchestrator, SessionContext};
use parley_engine::conversation::Turn;
use parley_engine::llm::ollama::OllamaProvider;
use parley_engine::llm::{LLMError, LLMProvider, LLMResponse, ModelRequest};
use parley_engine::servers::CatalogEntry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn chat_reply(message: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3.1:8b",
        "created_at": "2024-08-04T19:22:45.499127Z",
        "message": message,
        "done": true
    }))
}

fn list_dir_entry() -> CatalogEntry {
    CatalogEntry {
        qualified_name: "list_dir".to_string(),
        server: "fs".to_string(),
        tool: "list_dir".to_string(),
        description: "List a directory".to_string(),
        input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
    }
}

#[tokio::test]
async fn test_native_tool_calls_are_parsed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "tools": [{"type": "function", "function": {"name": "list_dir"}}]
        })))
        .respond_with(chat_reply(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                {"function": {"name": "list_dir", "arguments": {"path": "."}}},
                {"function": {"name": "read_file", "arguments": "{\"path\": \"a.txt\"}"}}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    let history = vec![Turn::user("list files")];
    let tools = vec![list_dir_entry()];
    let response = provider
        .generate(ModelRequest {
            system_prompt: "be brief",
            history: &history,
            pending: &[],
            tools: &tools,
        })
        .await
        .unwrap();

    match response {
        LLMResponse::ToolCalls { calls, .. } => {
            assert_eq!(calls.len(), 2);
            assert_eq!(calls[0].name, "list_dir");
            assert_eq!(calls[0].arguments, json!({"path": "."}));
            assert_eq!(calls[1].arguments, json!({"path": "a.txt"}));
            assert_ne!(calls[0].id, calls[1].id);
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_text_tool_call_fallback() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply(json!({
            "role": "assistant",
            "content": "{\"function\": \"list_dir\", \"arguments\": {\"path\": \"src\"}}"
        })))
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    let history = vec![Turn::user("what is in src?")];
    let response = provider
        .generate(ModelRequest {
            system_prompt: "",
            history: &history,
            pending: &[],
            tools: &[],
        })
        .await
        .unwrap();

    match response {
        LLMResponse::ToolCalls { calls, .. } => {
            assert_eq!(calls[0].name, "list_dir");
            assert_eq!(calls[0].arguments, json!({"path": "src"}));
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_plain_text_is_final_answer() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply(json!({"role": "assistant", "content": "Hello there."})))
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    let history = vec![Turn::user("hi")];
    let response = provider
        .generate(ModelRequest {
            system_prompt: "",
            history: &history,
            pending: &[],
            tools: &[],
        })
        .await
        .unwrap();
    assert!(matches!(response, LLMResponse::FinalAnswer(ref a) if a.content == "Hello there."));
}

#[tokio::test]
async fn test_error_statuses() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model 'nope' not found"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "nope");
    let history = vec![Turn::user("hi")];
    let request = ModelRequest {
        system_prompt: "",
        history: &history,
        pending: &[],
        tools: &[],
    };

    assert!(matches!(
        provider.generate(request).await,
        Err(LLMError::InvalidRequest(ref m)) if m.contains("not found")
    ));
    assert!(matches!(
        provider.generate(request).await,
        Err(LLMError::ProviderUnavailable(ref m)) if m.contains("out of memory")
    ));
}

#[tokio::test]
async fn test_slow_runtime_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            chat_reply(json!({"role": "assistant", "content": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let provider =
        OllamaProvider::with_timeout(mock_server.uri(), "llama3.1:8b", Duration::from_millis(100));
    let history = vec![Turn::user("hi")];
    let result = provider
        .generate(ModelRequest {
            system_prompt: "",
            history: &history,
            pending: &[],
            tools: &[],
        })
        .await;
    assert!(matches!(result, Err(LLMError::Timeout)));
}

#[tokio::test]
async fn test_unreachable_runtime_is_unavailable() {
    let provider = OllamaProvider::new("http://127.0.0.1:1", "llama3.1:8b");
    assert!(!provider.check_health().await);
    assert!(matches!(
        provider.list_models().await,
        Err(LLMError::ProviderUnavailable(_))
    ));
}

#[tokio::test]
async fn test_list_models() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3.1:8b", "size": 4661224676u64, "modified_at": "2024-08-01T10:00:00Z"},
                {"name": "qwen2.5:7b"}
            ]
        })))
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    let models = provider.list_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3.1:8b");
    assert_eq!(models[0].size, Some(4661224676));
    assert_eq!(models[1].size, None);
    assert!(provider.check_health().await);
}

#[tokio::test]
async fn test_turn_through_ollama_and_tool_server() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{"function": {"name": "list_dir", "arguments": {"path": "."}}}]
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system"},
                {"role": "user", "content": "What is in this folder?"},
                {"role": "assistant"},
                {"role": "tool", "tool_name": "list_dir"}
            ]
        })))
        .respond_with(chat_reply(json!({
            "role": "assistant",
            "content": "There are two files: `a.txt` and `b.txt`."
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fs = Arc::new(
        MockTransport::new(&["list_dir"]).with_result(
            "list_dir",
            sdk::protocol::ToolCallResult::text(r#"["a.txt","b.txt"]"#),
        ),
    );
    let supervisor = running_supervisor(vec![("fs", Arc::clone(&fs))]).await;
    let provider = Arc::new(OllamaProvider::new(mock_server.uri(), "llama3.1:8b"));
    let orchestrator = Orchestrator::new(provider, None);
    let mut ctx = SessionContext::new("llama3.1:8b");

    let outcome = orchestrator
        .run_turn(&mut ctx, &supervisor, "What is in this folder?")
        .await
        .unwrap();
    assert_eq!(outcome.answer, "There are two files: `a.txt` and `b.txt`.");
    assert_eq!(fs.call_count(), 1);
    assert_eq!(ctx.session.conversation.len(), 4);
}
