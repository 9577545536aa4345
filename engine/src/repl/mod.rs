//! Interactive chat shell
//!
//! Reads lines from stdin, buffers them until the end-of-input marker and
//! hands each finished message to the [`Orchestrator`]. Lines typed at an
//! empty buffer may be shell commands (see [`commands`]).
//!
//! Ctrl-C while a turn runs cancels that turn; the conversation keeps only
//! the user message. At the prompt Ctrl-C is ignored.

pub mod commands;
pub mod input;

use anyhow::Result;
use sdk::errors::{EngineError, ParleyErrorExt};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::{info, warn};

use crate::agent::{Orchestrator, SessionContext};
use crate::config::Config;
use crate::conversation::Turn;
use crate::secrets::{default_value, SecretManager};
use crate::servers::Supervisor;
use crate::session::SessionStore;

pub use commands::{parse, ShellCommand, HELP};
pub use input::InputBuffer;

const START_RECORDING: &str = "start_recording";
const STOP_RECORDING: &str = "stop_recording";

/// Whether the loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Repl {
    config: Config,
    config_path: Option<PathBuf>,
    orchestrator: Orchestrator,
    supervisor: Supervisor,
    store: SessionStore,
    ctx: SessionContext,
    input: InputBuffer,
    /// Server currently recording audio
    recording: Option<String>,
}

impl Repl {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        orchestrator: Orchestrator,
        supervisor: Supervisor,
        store: SessionStore,
        ctx: SessionContext,
    ) -> Self {
        let input = InputBuffer::new(config.input.eof_marker.clone());
        Self {
            config,
            config_path,
            orchestrator,
            supervisor,
            store,
            ctx,
            input,
            recording: None,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Runs until `exit` or end of input, then stops every server.
    pub async fn run<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.banner();
        let mut lines = reader.lines();

        loop {
            if self.input.is_empty() {
                println!("\n>> (end with {})", self.input.marker());
            }

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!("\n(type 'exit' to quit)");
                    continue;
                }
            };
            let Some(line) = line else {
                break;
            };

            let command = if self.input.is_empty() {
                parse(&line, &self.config.input.voice_trigger)
            } else if line.trim() == self.config.input.voice_trigger {
                Some(ShellCommand::ToggleRecording)
            } else {
                None
            };

            if let Some(command) = command {
                if self.handle_command(command, &mut lines).await == Flow::Exit {
                    break;
                }
                continue;
            }

            if let Some(message) = self.input.push_line(&line) {
                self.submit(&message).await;
            }
        }

        self.supervisor.shutdown().await;
        info!("Shell closed");
        Ok(())
    }

    fn banner(&self) {
        let catalog = self.supervisor.catalog();
        println!(
            "parley v{} | model {} | {} tools | /? for help",
            env!("CARGO_PKG_VERSION"),
            self.orchestrator.provider().model(),
            catalog.len()
        );
        for status in self.supervisor.status() {
            if let Some(reason) = &status.reason {
                println!("  server '{}' unavailable: {}", status.name, reason);
            }
        }
    }

    /// Runs one turn; Ctrl-C drops it.
    async fn submit(&mut self, message: &str) {
        let outcome = tokio::select! {
            result = self.orchestrator.run_turn(&mut self.ctx, &self.supervisor, message) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };

        match outcome {
            Some(Ok(outcome)) => {
                println!("\n{}\n", outcome.answer);
                if outcome.failed_calls > 0 {
                    println!(
                        "({} of {} tool calls failed)",
                        outcome.failed_calls, outcome.tool_calls
                    );
                }
                if let Some(id) = outcome.saved {
                    println!("(auto-saved {})", id);
                }
            }
            Some(Err(e)) => report(&e),
            None => {
                warn!("Turn cancelled by user");
                println!("\n(turn cancelled)");
            }
        }
    }

    async fn handle_command<R>(&mut self, command: ShellCommand, lines: &mut Lines<R>) -> Flow
    where
        R: AsyncBufRead + Unpin,
    {
        let result = match command {
            ShellCommand::Exit => return Flow::Exit,
            ShellCommand::Help => {
                for (usage, text) in HELP {
                    println!("  {:<18} {}", usage, text);
                }
                println!(
                    "  {:<18} toggle voice recording",
                    self.config.input.voice_trigger
                );
                Ok(())
            }
            ShellCommand::Save(title) => self.save(title.as_deref()),
            ShellCommand::Load(id) => self.load_session(&id),
            ShellCommand::Sessions => self.list_sessions(),
            ShellCommand::Delete(id) => self.delete(&id),
            ShellCommand::ToggleAutoSave => {
                self.toggle_auto_save();
                Ok(())
            }
            ShellCommand::Eof(marker) => self.change_marker(marker.as_deref()),
            ShellCommand::Settings => {
                self.print_settings();
                Ok(())
            }
            ShellCommand::Servers => {
                self.print_servers();
                Ok(())
            }
            ShellCommand::Tools => {
                self.print_tools();
                Ok(())
            }
            ShellCommand::Enable(name) => self.enable(&name).await,
            ShellCommand::Disable(name) => self.disable(&name).await,
            ShellCommand::Configure(name) => self.configure(&name, lines).await,
            ShellCommand::Shell(cmd) => {
                run_shell(&cmd).await;
                Ok(())
            }
            ShellCommand::CodeBlocks(index) => self.show_code_blocks(index),
            ShellCommand::Tables(index) => self.show_tables(index),
            ShellCommand::ToggleRecording => self.toggle_recording().await,
            ShellCommand::Usage(usage) => {
                println!("usage: {}", usage);
                Ok(())
            }
            ShellCommand::Unknown(head) => {
                println!("unknown command {} (try /?)", head);
                Ok(())
            }
        };

        if let Err(e) = result {
            report(&e);
        }
        Flow::Continue
    }

    fn save(&mut self, title: Option<&str>) -> Result<(), EngineError> {
        let id = self.store.save(&mut self.ctx.session, title)?;
        let title = self.ctx.session.title.clone().unwrap_or_default();
        println!("saved session {} \"{}\"", id, title);
        Ok(())
    }

    /// Replaces the conversation with a saved one.
    ///
    /// `id` may also name a session file, which is imported unsaved.
    pub fn load_session(&mut self, id: &str) -> Result<(), EngineError> {
        let file = Path::new(id);
        let session = if file.is_file() {
            self.store.load_path(file)?
        } else {
            self.store.load(id)?
        };
        let turns = session.conversation.len();
        let previous_model = session.model.clone();
        let last_answer = session
            .conversation
            .turns()
            .iter()
            .rev()
            .find_map(|turn| match turn {
                Turn::Assistant { content } => Some(content.clone()),
                _ => None,
            });

        self.ctx.replace_session(session);
        if let Some(answer) = last_answer {
            self.ctx.set_last_response(&answer);
        }

        println!("loaded session {} ({} turns)", id, turns);
        let current = self.orchestrator.provider().model();
        if !previous_model.is_empty() && previous_model != current {
            println!(
                "(session was held with {}, continuing with {})",
                previous_model, current
            );
        }
        Ok(())
    }

    fn list_sessions(&self) -> Result<(), EngineError> {
        let sessions = self.store.list()?;
        if sessions.is_empty() {
            println!("no saved sessions");
        }
        for summary in sessions {
            let marker = if self.ctx.session.id.as_deref() == Some(summary.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{} {}  {}  {}",
                marker,
                summary.id,
                summary.updated_at.format("%Y-%m-%d %H:%M"),
                summary.title
            );
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        self.store.remove(id)?;
        if self.ctx.session.id.as_deref() == Some(id) {
            self.ctx.session.id = None;
            self.ctx.session.path = None;
            self.ctx.auto_save = false;
            println!("(current conversation is now unsaved; auto-save off)");
        }
        println!("deleted session {}", id);
        Ok(())
    }

    fn toggle_auto_save(&mut self) {
        if !self.ctx.session.is_saved() {
            println!("use /save at least once before enabling auto-save");
            return;
        }
        self.ctx.auto_save = !self.ctx.auto_save;
        println!(
            "auto-save is now {}",
            if self.ctx.auto_save { "on" } else { "off" }
        );
    }

    fn change_marker(&mut self, marker: Option<&str>) -> Result<(), EngineError> {
        let Some(marker) = marker else {
            println!("end-of-input marker: {}", self.input.marker());
            return Ok(());
        };
        if !self.input.set_marker(marker) {
            println!("the marker cannot be blank");
            return Ok(());
        }
        self.config.input.eof_marker = self.input.marker().to_string();
        println!("end-of-input marker is now {}", self.input.marker());

        // Persist only the marker, not the command-line overrides
        if let Some(path) = &self.config_path {
            let mut on_disk = Config::load_or_create_at(path)?;
            on_disk.input.eof_marker = self.input.marker().to_string();
            on_disk.save_to(path)?;
        }
        Ok(())
    }

    fn print_settings(&self) {
        let session = &self.ctx.session;
        println!("model:         {}", self.orchestrator.provider().model());
        println!("endpoint:      {}", self.config.llm.base_url);
        println!("eof marker:    {}", self.input.marker());
        println!("voice trigger: {}", self.config.input.voice_trigger);
        println!(
            "auto-save:     {}",
            if self.ctx.auto_save { "on" } else { "off" }
        );
        println!(
            "session:       {}",
            session.id.as_deref().unwrap_or("(unsaved)")
        );
        println!("sessions dir:  {}", self.store.root().display());
        if let Some(path) = &self.config_path {
            println!("config file:   {}", path.display());
        }
    }

    fn print_servers(&self) {
        for status in self.supervisor.status() {
            let mut line = format!(
                "  {:<12} {:<11} {:>3} tools",
                status.name, status.state, status.tools
            );
            if !status.enabled {
                line.push_str("  (disabled)");
            }
            if let Some(reason) = &status.reason {
                line.push_str(&format!("  {}", reason));
            }
            println!("{}", line);
        }
    }

    fn print_tools(&self) {
        let catalog = self.supervisor.catalog();
        if catalog.is_empty() {
            println!("no tools available");
        }
        for entry in catalog.entries() {
            let summary = entry.description.lines().next().unwrap_or_default();
            println!("  {:<28} [{}] {}", entry.qualified_name, entry.server, summary);
        }
    }

    async fn enable(&mut self, name: &str) -> Result<(), EngineError> {
        self.supervisor.set_enabled(name, true)?;
        let tools = self.supervisor.start(name).await?;
        println!("server '{}' running with {} tools", name, tools.len());
        Ok(())
    }

    async fn disable(&mut self, name: &str) -> Result<(), EngineError> {
        self.supervisor.set_enabled(name, false)?;
        self.supervisor.stop(name).await?;
        if self.recording.as_deref() == Some(name) {
            self.recording = None;
        }
        println!("server '{}' stopped", name);
        Ok(())
    }

    /// Prompts for every credential the server declares, then starts it.
    ///
    /// Values with a default are read from the shell's own input so queued
    /// lines stay in order. Other values are read from the terminal hidden.
    async fn configure<R>(&mut self, name: &str, lines: &mut Lines<R>) -> Result<(), EngineError>
    where
        R: AsyncBufRead + Unpin,
    {
        let vars = self
            .supervisor
            .descriptor(name)
            .ok_or_else(|| EngineError::UnknownServer(name.to_string()))?
            .required_env
            .clone();

        if vars.is_empty() {
            println!("server '{}' needs no credentials", name);
        } else {
            println!("configuring '{}' (values are stored in the OS keychain)", name);
            for var in &vars {
                let secret = match default_value(var) {
                    Some(default) => {
                        eprint!("{} [{}]: ", var, default);
                        let answer = lines.next_line().await?.unwrap_or_default();
                        SecretManager::accept_answer(var, &answer, Some(default))?
                    }
                    None => {
                        let label = var.clone();
                        tokio::task::spawn_blocking(move || SecretManager::prompt_hidden(&label))
                            .await
                            .map_err(|e| {
                                EngineError::KeyringError(format!("prompt for {} failed: {}", var, e))
                            })??
                    }
                };
                self.supervisor.credentials().store(name, var, secret)?;
            }
        }

        if self.supervisor.is_running(name) {
            self.supervisor.stop(name).await?;
        }
        self.enable(name).await
    }

    fn show_code_blocks(&self, index: Option<usize>) -> Result<(), EngineError> {
        if self.ctx.last_response().is_none() {
            println!("no response yet");
            return Ok(());
        }
        let extraction = self.ctx.extraction();
        match index {
            Some(index) => {
                let block = extraction.code_block(index)?;
                println!("{}", block.body);
            }
            None => {
                if extraction.code_blocks().is_empty() {
                    println!("no code blocks in the last response");
                }
                for block in extraction.code_blocks() {
                    println!(
                        "[{}] {} ({} lines)",
                        block.index,
                        block.language.as_deref().unwrap_or("text"),
                        block.body.lines().count()
                    );
                }
            }
        }
        Ok(())
    }

    fn show_tables(&self, index: Option<usize>) -> Result<(), EngineError> {
        if self.ctx.last_response().is_none() {
            println!("no response yet");
            return Ok(());
        }
        let extraction = self.ctx.extraction();
        match index {
            Some(index) => println!("{}", extraction.table(index)?.raw()),
            None => {
                if extraction.tables().is_empty() {
                    println!("no tables in the last response");
                }
                for table in extraction.tables() {
                    println!(
                        "[{}] {} rows: {}",
                        table.index,
                        table.rows.len(),
                        table.rows.first().map(String::as_str).unwrap_or_default()
                    );
                }
            }
        }
        Ok(())
    }

    /// Starts or stops recording on the server exposing the recording tools.
    ///
    /// The transcription returned on stop is appended to the input buffer.
    async fn toggle_recording(&mut self) -> Result<(), EngineError> {
        if let Some(server) = self.recording.take() {
            println!("stopping recording and transcribing...");
            let result = self
                .supervisor
                .invoke(&server, STOP_RECORDING, json!({}))
                .await?;
            let text = result.joined_text();
            println!("transcribed: {}", text);
            self.input.append(&text);
            return Ok(());
        }

        let catalog = self.supervisor.catalog();
        let server = catalog
            .server_with_tool(START_RECORDING)
            .ok_or_else(|| EngineError::ToolNotFound(START_RECORDING.to_string()))?
            .to_string();

        let result = self
            .supervisor
            .invoke(&server, START_RECORDING, json!({}))
            .await?;
        println!("{}", result.joined_text());
        self.recording = Some(server);
        Ok(())
    }
}

fn report(error: &EngineError) {
    println!("error: {}", error);
    println!("hint: {}", error.user_hint());
}

async fn run_shell(cmd: &str) {
    #[cfg(unix)]
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .await;

    #[cfg(windows)]
    let output = tokio::process::Command::new("cmd")
        .arg("/C")
        .arg(cmd)
        .output()
        .await;

    match output {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                println!("({})", output.status);
            }
        }
        Err(e) => println!("error: could not run '{}': {}", cmd, e),
    }
}
