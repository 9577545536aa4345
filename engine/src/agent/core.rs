//! Conversation orchestrator
//!
//! Runs one user turn to completion:
//!
//! 1. Append the user turn to the history
//! 2. Call the model with the history and the current aggregated catalog
//! 3. On tool calls: dispatch them concurrently, collect results in request
//!    order, and call the model again
//! 4. On a final answer: commit the turn, extract elements, auto-save
//!
//! Tool requests and results are staged until the final answer arrives. A
//! turn that fails or is cancelled therefore leaves only the user turn in
//! the history.

use futures::future::join_all;
use sdk::errors::EngineError;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::conversation::{ToolCall, ToolTarget, Turn};
use crate::llm::{LLMError, LLMProvider, LLMResponse, ModelRequest};
use crate::servers::{Catalog, Supervisor};
use crate::session::SessionStore;

use super::SessionContext;

/// Default cap on tool-call rounds per user turn
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 20;

/// Default timeout for one model call in seconds
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant running in a terminal. \
You can call the provided tools to act on the user's behalf. \
Call a tool only when it is needed, and answer in Markdown.";

/// Summary of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    /// Tool-call rounds the model needed
    pub rounds: usize,
    pub tool_calls: usize,
    pub failed_calls: usize,
    /// Session id written by auto-save, if it ran
    pub saved: Option<String>,
    pub duration_ms: u128,
}

pub struct Orchestrator {
    provider: Arc<dyn LLMProvider>,
    store: Option<SessionStore>,
    system_prompt: String,
    max_tool_rounds: usize,
    llm_timeout: Duration,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LLMProvider>, store: Option<SessionStore>) -> Self {
        Self {
            provider,
            store,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Values below one are raised to one.
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn with_llm_timeout(mut self, limit: Duration) -> Self {
        self.llm_timeout = limit;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    pub fn store(&self) -> Option<&SessionStore> {
        self.store.as_ref()
    }

    /// Runs one user turn against the servers currently running.
    ///
    /// Model failures abort the turn and keep only the user turn. Tool
    /// failures become error tool-results the model gets to see.
    pub async fn run_turn(
        &self,
        ctx: &mut SessionContext,
        supervisor: &Supervisor,
        input: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let start = Instant::now();
        ctx.session.conversation.push(Turn::user(input));

        let mut staged: Vec<Turn> = Vec::new();
        let mut rounds = 0;
        let mut tool_calls = 0;
        let mut failed_calls = 0;

        let answer = loop {
            let catalog = supervisor.catalog();
            debug!(
                "Model round {} ({} tools available)",
                rounds + 1,
                catalog.len()
            );

            let request = ModelRequest {
                system_prompt: &self.system_prompt,
                history: ctx.session.conversation.turns(),
                pending: &staged,
                tools: catalog.entries(),
            };

            match self.call_model(request).await? {
                LLMResponse::FinalAnswer(answer) => break answer.content,
                LLMResponse::ToolCalls { content, calls } if calls.is_empty() => break content,
                LLMResponse::ToolCalls { content, calls } => {
                    if rounds == self.max_tool_rounds {
                        warn!(
                            "Model exceeded {} tool rounds; aborting turn",
                            self.max_tool_rounds
                        );
                        return Err(EngineError::MaxToolRoundsExceeded(self.max_tool_rounds));
                    }
                    rounds += 1;

                    let (calls, results) = dispatch(supervisor, &catalog, calls).await;
                    tool_calls += results.len();
                    failed_calls += results
                        .iter()
                        .filter(|t| matches!(t, Turn::ToolResult { is_error: true, .. }))
                        .count();

                    staged.push(Turn::ToolRequest { content, calls });
                    staged.extend(results);
                }
            }
        };

        ctx.session.conversation.extend(staged);
        ctx.session.conversation.push(Turn::assistant(answer.clone()));
        ctx.session.model = self.provider.model().to_string();
        ctx.set_last_response(&answer);

        let saved = if ctx.auto_save {
            self.auto_save(ctx)
        } else {
            None
        };

        let outcome = TurnOutcome {
            answer,
            rounds,
            tool_calls,
            failed_calls,
            saved,
            duration_ms: start.elapsed().as_millis(),
        };
        info!(
            "Turn completed in {}ms after {} tool rounds ({} calls, {} failed)",
            outcome.duration_ms, outcome.rounds, outcome.tool_calls, outcome.failed_calls
        );
        Ok(outcome)
    }

    /// Auto-save never fails the turn; errors are logged.
    fn auto_save(&self, ctx: &mut SessionContext) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.auto_save(&mut ctx.session) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Auto-save failed: {}", e);
                None
            }
        }
    }

    async fn call_model(&self, request: ModelRequest<'_>) -> Result<LLMResponse, EngineError> {
        match timeout(self.llm_timeout, self.provider.generate(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!("Model call failed: {}", e);
                Err(map_llm_error(e, self.llm_timeout))
            }
            Err(_) => {
                warn!("Model call timed out after {}s", self.llm_timeout.as_secs());
                Err(EngineError::ModelTimeout(self.llm_timeout.as_secs()))
            }
        }
    }
}

fn map_llm_error(error: LLMError, limit: Duration) -> EngineError {
    match error {
        LLMError::Timeout => EngineError::ModelTimeout(limit.as_secs()),
        other => EngineError::ModelUnavailable(other.to_string()),
    }
}

/// Resolves and invokes every call concurrently.
///
/// Results come back in request order regardless of completion order.
async fn dispatch(
    supervisor: &Supervisor,
    catalog: &Catalog,
    calls: Vec<ToolCall>,
) -> (Vec<ToolCall>, Vec<Turn>) {
    let calls: Vec<ToolCall> = calls
        .into_iter()
        .map(|mut call| {
            call.target = catalog.resolve(&call.name).map(|entry| ToolTarget {
                server: entry.server.clone(),
                tool: entry.tool.clone(),
            });
            if call.arguments.is_null() {
                call.arguments = Value::Object(Default::default());
            }
            call
        })
        .collect();

    let results = join_all(calls.iter().map(|call| async move {
        let outcome = match &call.target {
            Some(target) => {
                supervisor
                    .invoke(&target.server, &target.tool, call.arguments.clone())
                    .await
            }
            None => Err(EngineError::ToolNotFound(call.name.clone())),
        };

        match outcome {
            Ok(result) => Turn::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: result.joined_text(),
                is_error: false,
            },
            Err(e) => {
                warn!("Tool call {} ({}) failed: {}", call.name, call.id, e);
                Turn::ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: format!("ERROR: {}", e),
                    is_error: true,
                }
            }
        }
    }))
    .await;

    (calls, results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_errors_map_to_turn_errors() {
        let limit = Duration::from_secs(7);
        assert!(matches!(
            map_llm_error(LLMError::Timeout, limit),
            EngineError::ModelTimeout(7)
        ));
        assert!(matches!(
            map_llm_error(LLMError::ProviderUnavailable("down".into()), limit),
            EngineError::ModelUnavailable(ref m) if m.contains("down")
        ));
    }
}
