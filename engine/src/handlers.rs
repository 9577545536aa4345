//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: start the interactive shell
//! - sessions: list saved sessions
//! - models: list models at the Ollama endpoint
//! - servers: list configured tool servers

use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

use crate::agent::{Orchestrator, SessionContext};
use crate::cli::ChatArgs;
use crate::config::Config;
use crate::llm::ollama::OllamaProvider;
use crate::llm::LLMProvider;
use crate::repl::Repl;
use crate::secrets::{CredentialSource, KeyringCredentials};
use crate::servers::stdio::StdioLauncher;
use crate::servers::{ServerDescriptor, Supervisor};
use crate::session::SessionStore;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Registers every configured server, in configuration order.
pub fn build_supervisor(
    config: &Config,
    credentials: Arc<dyn CredentialSource>,
) -> Result<Supervisor> {
    let mut supervisor = Supervisor::new(Arc::new(StdioLauncher::default()), credentials);
    for server in &config.servers {
        supervisor
            .register(ServerDescriptor::from(server))
            .with_context(|| format!("Failed to register server '{}'", server.name))?;
    }
    Ok(supervisor)
}

/// Start the interactive chat shell
///
/// Applies command-line overrides, launches the enabled servers and hands
/// stdin to the shell until the user exits.
pub async fn handle_chat(
    args: ChatArgs,
    mut config: Config,
    config_path: Option<PathBuf>,
) -> Result<()> {
    config
        .apply_overrides(&args.overrides())
        .context("Invalid command-line overrides")?;

    let provider = Arc::new(OllamaProvider::with_timeout(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));
    if !provider.check_health().await {
        tracing::warn!("Ollama is not reachable at {}", provider.base_url());
        println!(
            "warning: Ollama is not reachable at {}; turns will fail until it is",
            provider.base_url()
        );
    }

    let store = SessionStore::new(config.sessions_dir());
    let mut orchestrator = Orchestrator::new(provider, Some(store.clone()))
        .with_max_tool_rounds(config.llm.max_tool_rounds)
        .with_llm_timeout(Duration::from_secs(config.llm.timeout_secs));
    if let Some(prompt) = &config.llm.system_prompt {
        orchestrator = orchestrator.with_system_prompt(prompt.clone());
    }

    let credentials: Arc<dyn CredentialSource> = Arc::new(KeyringCredentials::new());
    let mut supervisor = build_supervisor(&config, credentials)?;
    for (name, error) in supervisor.start_enabled().await {
        tracing::warn!("Server '{}' excluded from this run: {}", name, error);
    }

    let mut ctx = SessionContext::new(config.llm.model.clone());
    ctx.auto_save = config.input.auto_save;

    let mut repl = Repl::new(config, config_path, orchestrator, supervisor, store, ctx);
    if let Some(id) = &args.load {
        repl.load_session(id)
            .with_context(|| format!("Failed to load session '{}'", id))?;
    }

    repl.run(BufReader::new(tokio::io::stdin())).await
}

/// List saved sessions, most recent first
pub async fn handle_sessions(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let store = SessionStore::new(config.sessions_dir());
    let mut sessions = store.list().context("Failed to read the session index")?;
    sessions.truncate(limit);

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No saved sessions");
                return Ok(());
            }

            for session in &sessions {
                println!(
                    "{}  {}  {}",
                    session.id,
                    session.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    session.title
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "sessions": sessions,
                "count": sessions.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List models available at the configured Ollama endpoint
pub async fn handle_models(config: &Config, format: OutputFormat) -> Result<()> {
    let provider = OllamaProvider::new(config.llm.base_url.clone(), config.llm.model.clone());
    let models = provider
        .list_models()
        .await
        .with_context(|| format!("Failed to list models at {}", provider.base_url()))?;

    match format {
        OutputFormat::Text => {
            if models.is_empty() {
                println!("No models installed at {}", provider.base_url());
                return Ok(());
            }

            for model in &models {
                let marker = if model.name == config.llm.model { "*" } else { " " };
                println!(
                    "{} {:<32} {:>8.1} GB",
                    marker,
                    model.name,
                    model.size.unwrap_or(0) as f64 / 1_000_000_000.0
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "models": models,
                "current": config.llm.model,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List configured tool servers and their credential status
pub async fn handle_servers(config: &Config, format: OutputFormat) -> Result<()> {
    let credentials = KeyringCredentials::new();
    let servers: Vec<_> = config
        .servers
        .iter()
        .map(|server| {
            let missing: Vec<&String> = server
                .required_env
                .iter()
                .filter(|var| credentials.get(&server.name, var).is_none())
                .collect();
            (server, missing)
        })
        .collect();

    match format {
        OutputFormat::Text => {
            for (server, missing) in &servers {
                println!(
                    "{:<12} {:<8} {} {}",
                    server.name,
                    if server.enabled { "enabled" } else { "disabled" },
                    server.command,
                    server.args.join(" ")
                );
                if !missing.is_empty() {
                    let names: Vec<&str> = missing.iter().map(|v| v.as_str()).collect();
                    println!(
                        "             missing credentials: {} (use /config {})",
                        names.join(", "),
                        server.name
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = servers
                .iter()
                .map(|(server, missing)| {
                    json!({
                        "name": server.name,
                        "enabled": server.enabled,
                        "command": server.command,
                        "args": server.args,
                        "required_env": server.required_env,
                        "missing_credentials": missing,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
