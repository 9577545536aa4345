//! Tool server supervision
//!
//! The [`Supervisor`] owns every configured tool server. Each server is an
//! independent, independently fallible process reached through a
//! [`ToolTransport`]; a server that cannot start is marked unavailable and
//! its tools simply drop out of the [`Catalog`].
//!
//! # Lifecycle
//!
//! ```text
//! Registered --start--> Running --stop/shutdown--> Stopped
//!      |                                              |
//!      +--start fails--> Unavailable <--start fails---+
//! ```

pub mod catalog;
pub mod stdio;

use async_trait::async_trait;
use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::protocol::{ToolCallResult, ToolDescriptor};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::secrets::{CredentialSource, SecretString};
pub use catalog::{Catalog, CatalogEntry};

/// Launch and policy settings for one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub enabled: bool,
    /// Credential variables resolved before launch
    pub required_env: Vec<String>,
    pub call_timeout: Duration,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            enabled: true,
            required_env: Vec::new(),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ServerConfig> for ServerDescriptor {
    fn from(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            cwd: config.cwd.clone(),
            enabled: config.enabled,
            required_env: config.required_env.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }
}

/// A live connection to one tool server.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Fetches the full tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError>;

    /// Invokes one tool. Domain failures come back as `is_error` results.
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, EngineError>;

    /// Tears the connection down. Must be safe to call more than once.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Establishes transports, including the protocol handshake.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        descriptor: &ServerDescriptor,
        credentials: Vec<(String, SecretString)>,
    ) -> Result<Arc<dyn ToolTransport>, EngineError>;
}

pub enum ServerState {
    Registered,
    Running {
        transport: Arc<dyn ToolTransport>,
        tools: Vec<ToolDescriptor>,
    },
    Unavailable {
        reason: String,
    },
    Stopped,
}

impl ServerState {
    pub fn label(&self) -> &'static str {
        match self {
            ServerState::Registered => "registered",
            ServerState::Running { .. } => "running",
            ServerState::Unavailable { .. } => "unavailable",
            ServerState::Stopped => "stopped",
        }
    }
}

struct ManagedServer {
    descriptor: ServerDescriptor,
    state: ServerState,
}

/// Read-only view of one server for listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub enabled: bool,
    pub state: &'static str,
    pub tools: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub required_env: Vec<String>,
}

pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    credentials: Arc<dyn CredentialSource>,
    servers: Vec<ManagedServer>,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            launcher,
            credentials,
            servers: Vec::new(),
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialSource> {
        &self.credentials
    }

    /// Adds a server to the managed set without starting it.
    pub fn register(&mut self, descriptor: ServerDescriptor) -> Result<(), EngineError> {
        if descriptor.name.is_empty() || descriptor.name.contains('.') {
            return Err(EngineError::Config(format!(
                "invalid server name '{}': must be non-empty and contain no '.'",
                descriptor.name
            )));
        }
        if self.find(&descriptor.name).is_some() {
            return Err(EngineError::Config(format!(
                "server '{}' is registered twice",
                descriptor.name
            )));
        }
        debug!(
            "Registered server '{}' (enabled: {})",
            descriptor.name, descriptor.enabled
        );
        self.servers.push(ManagedServer {
            descriptor,
            state: ServerState::Registered,
        });
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&ManagedServer> {
        self.servers.iter().find(|s| s.descriptor.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut ManagedServer, EngineError> {
        self.servers
            .iter_mut()
            .find(|s| s.descriptor.name == name)
            .ok_or_else(|| EngineError::UnknownServer(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Option<&ServerDescriptor> {
        self.find(name).map(|s| &s.descriptor)
    }

    /// Credential variables of `name` that no source can provide.
    pub fn missing_credentials(&self, name: &str) -> Result<Vec<String>, EngineError> {
        let server = self
            .find(name)
            .ok_or_else(|| EngineError::UnknownServer(name.to_string()))?;
        Ok(server
            .descriptor
            .required_env
            .iter()
            .filter(|var| self.credentials.get(name, var).is_none())
            .cloned()
            .collect())
    }

    /// Launches a server and fetches its catalog.
    ///
    /// Starting a running server returns its current catalog. Any failure
    /// leaves the server `Unavailable` without touching the others.
    pub async fn start(&mut self, name: &str) -> Result<Vec<ToolDescriptor>, EngineError> {
        let credentials = Arc::clone(&self.credentials);
        let launcher = Arc::clone(&self.launcher);
        let server = self.find_mut(name)?;

        if let ServerState::Running { tools, .. } = &server.state {
            return Ok(tools.clone());
        }

        let mut resolved = Vec::with_capacity(server.descriptor.required_env.len());
        for var in &server.descriptor.required_env {
            match credentials.get(name, var) {
                Some(value) => resolved.push((var.clone(), value)),
                None => {
                    let error = EngineError::MissingCredential {
                        server: name.to_string(),
                        var: var.clone(),
                    };
                    warn!("Server '{}' unavailable: {}", name, error);
                    server.state = ServerState::Unavailable {
                        reason: error.to_string(),
                    };
                    return Err(error);
                }
            }
        }

        let transport = match launcher.launch(&server.descriptor, resolved).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Server '{}' unavailable: {}", name, e);
                server.state = ServerState::Unavailable {
                    reason: e.to_string(),
                };
                return Err(unavailable(name, e));
            }
        };

        let limit = server.descriptor.call_timeout;
        let listing = tokio::time::timeout(limit, transport.list_tools())
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::ToolUnavailable {
                    server: name.to_string(),
                    reason: format!("no tool listing within {}s", limit.as_secs()),
                })
            });
        let tools = match listing {
            Ok(tools) => tools,
            Err(e) => {
                warn!("Server '{}' failed to list tools: {}", name, e);
                if let Err(close_err) = transport.close().await {
                    debug!("Closing '{}' after failed listing: {}", name, close_err);
                }
                server.state = ServerState::Unavailable {
                    reason: e.to_string(),
                };
                return Err(unavailable(name, e));
            }
        };

        info!("Started server '{}' with {} tools", name, tools.len());
        server.state = ServerState::Running {
            transport,
            tools: tools.clone(),
        };
        Ok(tools)
    }

    /// Starts every enabled server that is not running yet.
    ///
    /// Returns the failures; they never stop the remaining servers.
    pub async fn start_enabled(&mut self) -> Vec<(String, EngineError)> {
        let names: Vec<String> = self
            .servers
            .iter()
            .filter(|s| s.descriptor.enabled && !matches!(s.state, ServerState::Running { .. }))
            .map(|s| s.descriptor.name.clone())
            .collect();

        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.start(&name).await {
                failures.push((name, e));
            }
        }
        failures
    }

    /// Routes one tool call to `server`.
    pub async fn invoke(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, EngineError> {
        let managed = self
            .find(server)
            .ok_or_else(|| EngineError::UnknownServer(server.to_string()))?;

        let (transport, tools) = match &managed.state {
            ServerState::Running { transport, tools } => (Arc::clone(transport), tools),
            other => {
                return Err(EngineError::ToolUnavailable {
                    server: server.to_string(),
                    reason: format!("server is {}", other.label()),
                })
            }
        };

        if !tools.iter().any(|t| t.name == tool) {
            return Err(EngineError::UnknownTool {
                server: server.to_string(),
                tool: tool.to_string(),
            });
        }

        let limit = managed.descriptor.call_timeout;
        debug!("Invoking {}/{}", server, tool);
        let result = tokio::time::timeout(limit, transport.call_tool(tool, arguments))
            .await
            .map_err(|_| EngineError::ToolTimeout {
                server: server.to_string(),
                tool: tool.to_string(),
                secs: limit.as_secs(),
            })??;

        if result.is_error {
            return Err(EngineError::ToolError {
                server: server.to_string(),
                tool: tool.to_string(),
                message: result.joined_text(),
            });
        }
        Ok(result)
    }

    /// Stops one server. Its tools leave the catalog immediately.
    pub async fn stop(&mut self, name: &str) -> Result<(), EngineError> {
        let server = self.find_mut(name)?;
        let previous = std::mem::replace(&mut server.state, ServerState::Stopped);
        if let ServerState::Running { transport, .. } = previous {
            if let Err(e) = transport.close().await {
                warn!("Server '{}' did not shut down cleanly: {}", name, e);
            }
            info!("Stopped server '{}'", name);
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), EngineError> {
        self.find_mut(name)?.descriptor.enabled = enabled;
        Ok(())
    }

    /// Stops every running server, best-effort and concurrently.
    pub async fn shutdown(&mut self) {
        let mut closing = Vec::new();
        for server in &mut self.servers {
            let previous = std::mem::replace(&mut server.state, ServerState::Stopped);
            if let ServerState::Running { transport, .. } = previous {
                closing.push((server.descriptor.name.clone(), transport));
            }
        }

        let results = join_all(
            closing
                .iter()
                .map(|(_, transport)| transport.close()),
        )
        .await;

        for ((name, _), result) in closing.iter().zip(results) {
            match result {
                Ok(()) => info!("Stopped server '{}'", name),
                Err(e) => warn!("Server '{}' did not shut down cleanly: {}", name, e),
            }
        }
    }

    /// Aggregated catalog of the servers running right now.
    pub fn catalog(&self) -> Catalog {
        Catalog::aggregate(self.servers.iter().filter_map(|s| match &s.state {
            ServerState::Running { tools, .. } => {
                Some((s.descriptor.name.as_str(), tools.as_slice()))
            }
            _ => None,
        }))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|s| matches!(s.state, ServerState::Running { .. }))
    }

    /// Status of all servers in registration order.
    pub fn status(&self) -> Vec<ServerStatus> {
        self.servers
            .iter()
            .map(|s| ServerStatus {
                name: s.descriptor.name.clone(),
                enabled: s.descriptor.enabled,
                state: s.state.label(),
                tools: match &s.state {
                    ServerState::Running { tools, .. } => tools.len(),
                    _ => 0,
                },
                reason: match &s.state {
                    ServerState::Unavailable { reason } => Some(reason.clone()),
                    _ => None,
                },
                required_env: s.descriptor.required_env.clone(),
            })
            .collect()
    }
}

fn unavailable(server: &str, error: EngineError) -> EngineError {
    match error {
        e @ EngineError::ToolUnavailable { .. } => e,
        other => EngineError::ToolUnavailable {
            server: server.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemoryCredentials;

    struct NeverLauncher;

    #[async_trait]
    impl Launcher for NeverLauncher {
        async fn launch(
            &self,
            descriptor: &ServerDescriptor,
            _credentials: Vec<(String, SecretString)>,
        ) -> Result<Arc<dyn ToolTransport>, EngineError> {
            Err(EngineError::ToolUnavailable {
                server: descriptor.name.clone(),
                reason: "no such binary".to_string(),
            })
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(Arc::new(NeverLauncher), Arc::new(MemoryCredentials::new()))
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let mut sup = supervisor();
        assert!(sup.register(ServerDescriptor::new("fs", "parley-fs")).is_ok());
        assert!(sup.register(ServerDescriptor::new("fs", "other")).is_err());
        assert!(sup.register(ServerDescriptor::new("a.b", "x")).is_err());
        assert!(sup.register(ServerDescriptor::new("", "x")).is_err());
    }

    #[tokio::test]
    async fn test_failed_start_marks_unavailable() {
        let mut sup = supervisor();
        sup.register(ServerDescriptor::new("fs", "parley-fs")).unwrap();

        let err = sup.start("fs").await.unwrap_err();
        assert!(matches!(err, EngineError::ToolUnavailable { .. }));
        assert_eq!(sup.status()[0].state, "unavailable");
        assert!(sup.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_blocks_launch() {
        let mut sup = supervisor();
        let mut spotify = ServerDescriptor::new("spotify", "spotify-server");
        spotify.required_env = vec!["SPOTIPY_CLIENT_ID".to_string()];
        sup.register(spotify).unwrap();

        assert_eq!(
            sup.missing_credentials("spotify").unwrap(),
            vec!["SPOTIPY_CLIENT_ID".to_string()]
        );
        let err = sup.start("spotify").await.unwrap_err();
        assert!(matches!(err, EngineError::MissingCredential { ref var, .. } if var == "SPOTIPY_CLIENT_ID"));
    }

    #[tokio::test]
    async fn test_invoke_on_stopped_server() {
        let mut sup = supervisor();
        sup.register(ServerDescriptor::new("fs", "parley-fs")).unwrap();
        let err = sup
            .invoke("fs", "read_file", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolUnavailable { .. }));
        assert!(matches!(
            sup.invoke("nope", "x", Value::Null).await,
            Err(EngineError::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_started() {
        let mut sup = supervisor();
        sup.register(ServerDescriptor::new("fs", "parley-fs")).unwrap();
        sup.shutdown().await;
        assert_eq!(sup.status()[0].state, "stopped");
    }
}
