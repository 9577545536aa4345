//! Shared test doubles: in-memory tool servers and a scripted model.

#![allow(dead_code)]

use async_trait::async_trait;
use parley_engine::conversation::Turn;
use parley_engine::llm::{self, FinalAnswer, LLMError, LLMProvider, LLMResponse, ModelRequest};
use parley_engine::secrets::{CredentialSource, MemoryCredentials, SecretString};
use parley_engine::servers::{Launcher, ServerDescriptor, Supervisor, ToolTransport};
use sdk::errors::EngineError;
use sdk::protocol::{ToolCallResult, ToolDescriptor};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A tool server living in memory.
///
/// Unless a canned result is set, a call answers `<tool> <arguments>`.
#[derive(Default)]
pub struct MockTransport {
    tools: Vec<ToolDescriptor>,
    delays: HashMap<String, Duration>,
    results: HashMap<String, ToolCallResult>,
    stalled_listing: bool,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub closed: AtomicBool,
}

impl MockTransport {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|name| {
                    ToolDescriptor::new(
                        *name,
                        format!("{} tool", name),
                        json!({"type": "object", "properties": {}}),
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.to_string(), delay);
        self
    }

    pub fn with_result(mut self, tool: &str, result: ToolCallResult) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    /// Completes the handshake but never answers `tools/list`.
    pub fn with_stalled_listing(mut self) -> Self {
        self.stalled_listing = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTransport for MockTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError> {
        if self.stalled_listing {
            std::future::pending::<()>().await;
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool.to_string(), arguments.clone()));
        if let Some(delay) = self.delays.get(tool) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .results
            .get(tool)
            .cloned()
            .unwrap_or_else(|| ToolCallResult::text(format!("{} {}", tool, arguments))))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out prepared transports by server name; unknown names fail.
#[derive(Default)]
pub struct MockLauncher {
    transports: HashMap<String, Arc<MockTransport>>,
    pub launched: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, server: &str, transport: Arc<MockTransport>) -> Self {
        self.transports.insert(server.to_string(), transport);
        self
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(
        &self,
        descriptor: &ServerDescriptor,
        credentials: Vec<(String, SecretString)>,
    ) -> Result<Arc<dyn ToolTransport>, EngineError> {
        self.launched.lock().unwrap().push((
            descriptor.name.clone(),
            credentials
                .iter()
                .map(|(var, value)| (var.clone(), value.unsecure().to_string()))
                .collect(),
        ));
        match self.transports.get(&descriptor.name) {
            Some(transport) => Ok(Arc::clone(transport) as Arc<dyn ToolTransport>),
            None => Err(EngineError::Protocol(format!(
                "no such program for '{}'",
                descriptor.name
            ))),
        }
    }
}

/// Registers and starts one server per transport, in the given order.
pub async fn running_supervisor(servers: Vec<(&str, Arc<MockTransport>)>) -> Supervisor {
    let mut launcher = MockLauncher::new();
    for (name, transport) in &servers {
        launcher = launcher.with(name, Arc::clone(transport));
    }
    let credentials: Arc<dyn CredentialSource> = Arc::new(MemoryCredentials::new());
    let mut supervisor = Supervisor::new(Arc::new(launcher), credentials);
    for (name, _) in &servers {
        supervisor
            .register(ServerDescriptor::new(*name, "mock"))
            .unwrap();
    }
    let failures = supervisor.start_enabled().await;
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
    supervisor
}

/// What one model round received.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub turns: Vec<Turn>,
    pub tools: Vec<String>,
}

/// Replays a fixed script of responses; answers "done" once it runs out.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<llm::Result<LLMResponse>>>,
    delay: Option<Duration>,
    pub seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<llm::Result<LLMResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: ModelRequest<'_>) -> llm::Result<LLMResponse> {
        self.seen.lock().unwrap().push(SeenRequest {
            turns: request.turns().cloned().collect(),
            tools: request
                .tools
                .iter()
                .map(|t| t.qualified_name.clone())
                .collect(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(LLMResponse::FinalAnswer(FinalAnswer::new("done"))))
    }
}

pub fn final_answer(text: &str) -> llm::Result<LLMResponse> {
    Ok(LLMResponse::FinalAnswer(FinalAnswer::new(text)))
}

pub fn tool_calls(calls: Vec<parley_engine::conversation::ToolCall>) -> llm::Result<LLMResponse> {
    Ok(LLMResponse::ToolCalls {
        content: String::new(),
        calls,
    })
}

pub fn model_down() -> llm::Result<LLMResponse> {
    Err(LLMError::ProviderUnavailable("connection refused".to_string()))
}

/// Credentials source for tests that start servers with requirements.
pub fn credentials(entries: &[(&str, &str, &str)]) -> Arc<dyn CredentialSource> {
    let mut source = MemoryCredentials::new();
    for (server, var, value) in entries {
        source = source.with(server, var, value);
    }
    Arc::new(source)
}
