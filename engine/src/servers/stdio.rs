//! Stdio tool transport
//!
//! Newline-delimited JSON-RPC 2.0 over a child process's stdin/stdout. A
//! reader task routes responses to waiting callers by request id, so any
//! number of calls can be in flight on one server. A caller that stops
//! waiting (timeout or interrupt) sends `notifications/cancelled`.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::protocol::{
    codes, methods, Incoming, ListToolsResult, RpcNotification, RpcRequest, RpcResponse,
    ToolCallResult, ToolDescriptor, PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Launcher, ServerDescriptor, ToolTransport};
use crate::secrets::{scrub, SecretString};

/// Upper bound on `tools/list` pages, against servers that repeat a cursor.
const MAX_LIST_PAGES: usize = 64;

const EXIT_GRACE: Duration = Duration::from_secs(2);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

pub struct StdioTransport {
    server: String,
    writer: Arc<Mutex<Option<Writer>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: StdMutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Wraps an already connected byte stream pair and starts routing.
    pub fn new<R, W>(server: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let server = server.into();
        let writer: Arc<Mutex<Option<Writer>>> = Arc::new(Mutex::new(Some(Box::new(writer))));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));

        let task = tokio::spawn(read_loop(
            server.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&writer),
        ));

        Self {
            server,
            writer,
            pending,
            next_id: AtomicU64::new(1),
            reader: StdMutex::new(Some(task)),
            child: Mutex::new(None),
        }
    }

    /// Attaches the process to terminate on close.
    pub fn with_child(self, child: Child) -> Self {
        Self {
            child: Mutex::new(Some(child)),
            ..self
        }
    }

    /// `initialize` request followed by the `initialized` notification.
    pub async fn initialize(&self) -> Result<Value, EngineError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "parley",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self
            .request(methods::INITIALIZE, Some(params), false)
            .await
            .map_err(|e| EngineError::ToolUnavailable {
                server: self.server.clone(),
                reason: format!("initialize failed: {}", e),
            })?;
        self.send(&RpcNotification::new(methods::INITIALIZED, None))
            .await?;
        debug!("Handshake with '{}' complete", self.server);
        Ok(result)
    }

    async fn send<T: Serialize>(&self, message: &T) -> Result<(), EngineError> {
        write_message(&self.writer, message).await.map_err(|e| {
            EngineError::ToolUnavailable {
                server: self.server.clone(),
                reason: format!("write failed: {}", e),
            }
        })
    }

    /// Sends a request and waits for the matching response.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancellable: bool,
    ) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let mut guard = PendingRequest {
            id,
            cancellable,
            done: false,
            pending: Arc::clone(&self.pending),
            writer: Arc::clone(&self.writer),
        };

        self.send(&RpcRequest::new(id, method, params)).await?;

        let response = rx.await.map_err(|_| EngineError::ToolUnavailable {
            server: self.server.clone(),
            reason: "server closed the connection".to_string(),
        })?;
        guard.done = true;

        response
            .into_result()
            .map_err(|e| EngineError::Protocol(format!("{} (code {})", e.message, e.code)))
    }
}

/// Removes the pending entry of a request nobody waits for anymore and, for
/// cancellable requests, tells the server.
struct PendingRequest {
    id: u64,
    cancellable: bool,
    done: bool,
    pending: PendingMap,
    writer: Arc<Mutex<Option<Writer>>>,
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let was_pending = lock(&self.pending).remove(&self.id).is_some();
        if !was_pending || !self.cancellable {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let writer = Arc::clone(&self.writer);
        let notification = RpcNotification::cancelled(self.id, "client stopped waiting");
        runtime.spawn(async move {
            if let Err(e) = write_message(&writer, &notification).await {
                debug!("Could not send cancellation: {}", e);
            }
        });
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn write_message<T: Serialize>(
    writer: &Mutex<Option<Writer>>,
    message: &T,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');

    let mut guard = writer.lock().await;
    let stream = guard
        .as_mut()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))?;
    stream.write_all(&line).await?;
    stream.flush().await
}

async fn read_loop<R>(
    server: String,
    reader: R,
    pending: PendingMap,
    writer: Arc<Mutex<Option<Writer>>>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Reading from '{}' failed: {}", server, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Incoming::from_line(&line) {
            Some(Incoming::Response(response)) => {
                let Some(id) = response.numeric_id() else {
                    debug!("'{}' sent a response without a usable id", server);
                    continue;
                };
                match lock(&pending).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!("'{}' answered unknown or cancelled request {}", server, id),
                }
            }
            Some(Incoming::Request(request)) => {
                let reply = if request.method == methods::PING {
                    RpcResponse::success(request.id, json!({}))
                } else {
                    RpcResponse::failure(
                        request.id,
                        codes::METHOD_NOT_FOUND,
                        format!("client does not handle {}", request.method),
                    )
                };
                if let Err(e) = write_message(&writer, &reply).await {
                    debug!("Could not answer '{}': {}", server, e);
                }
            }
            Some(Incoming::Notification(notification)) => {
                debug!("'{}' notification: {}", server, notification.method);
            }
            None => debug!("Discarding non-protocol output from '{}'", server),
        }
    }

    // Wake every waiter; their receivers observe the closed channel.
    lock(&pending).clear();
    debug!("Reader for '{}' finished", server);
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let value = self.request(methods::TOOLS_LIST, params, true).await?;
            let page: ListToolsResult = serde_json::from_value(value).map_err(|e| {
                EngineError::Protocol(format!("bad tools/list result from '{}': {}", self.server, e))
            })?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!(
            "'{}' kept paginating tools/list; using the first {} pages",
            self.server, MAX_LIST_PAGES
        );
        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, EngineError> {
        let params = json!({ "name": tool, "arguments": arguments });
        let value = self
            .request(methods::TOOLS_CALL, Some(params), true)
            .await
            .map_err(|e| match e {
                EngineError::Protocol(message) => EngineError::ToolError {
                    server: self.server.clone(),
                    tool: tool.to_string(),
                    message,
                },
                other => other,
            })?;

        serde_json::from_value(value).map_err(|e| {
            EngineError::Protocol(format!("bad tools/call result from '{}': {}", self.server, e))
        })
    }

    async fn close(&self) -> Result<(), EngineError> {
        // Closing stdin is the polite shutdown request.
        self.writer.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            terminate(&self.server, &mut child).await?;
        }

        if let Some(task) = lock(&self.reader).take() {
            task.abort();
        }
        lock(&self.pending).clear();
        Ok(())
    }
}

/// Waits for exit, then escalates to SIGTERM and finally SIGKILL.
async fn terminate(server: &str, child: &mut Child) -> Result<(), EngineError> {
    if let Ok(status) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        let status = status?;
        debug!("'{}' exited: {}", server, status);
        return Ok(());
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGTERM to '{}' ({})", server, pid);
        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_ok()
        {
            return Ok(());
        }
    }

    warn!("'{}' ignored shutdown, killing it", server);
    child.kill().await?;
    Ok(())
}

/// Spawns servers as child processes speaking the protocol on stdio.
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    handshake_timeout: Duration,
}

impl StdioLauncher {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for StdioLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Bare command names that ship next to the running binary resolve there,
/// so `parley-fs` works without being on PATH.
fn resolve_program(command: &str) -> PathBuf {
    let path = PathBuf::from(command);
    if path.components().count() != 1 {
        return path;
    }
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(command)));
    match sibling {
        Some(candidate) if candidate.is_file() => candidate,
        _ => path,
    }
}

#[async_trait]
impl Launcher for StdioLauncher {
    async fn launch(
        &self,
        descriptor: &ServerDescriptor,
        credentials: Vec<(String, SecretString)>,
    ) -> Result<Arc<dyn ToolTransport>, EngineError> {
        let name = descriptor.name.clone();
        let program = resolve_program(&descriptor.command);

        let mut command = Command::new(&program);
        command
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (var, value) in &credentials {
            command.env(var, value.unsecure());
        }
        if let Some(cwd) = &descriptor.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| EngineError::ToolUnavailable {
            server: name.clone(),
            reason: format!("failed to launch {}: {}", program.display(), e),
        })?;

        let missing = |what: &str| EngineError::ToolUnavailable {
            server: name.clone(),
            reason: format!("no {} pipe", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        // Drain stderr so the pipe never fills up and blocks the server.
        if let Some(stderr) = child.stderr.take() {
            let server = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "{}", scrub(&line));
                }
            });
        }

        let transport = StdioTransport::new(name.clone(), stdout, stdin).with_child(child);

        match tokio::time::timeout(self.handshake_timeout, transport.initialize()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                let _ = transport.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = transport.close().await;
                return Err(EngineError::ToolUnavailable {
                    server: name,
                    reason: format!(
                        "no handshake within {}s",
                        self.handshake_timeout.as_secs()
                    ),
                });
            }
        }

        info!("Launched server '{}' ({})", name, program.display());
        Ok(Arc::new(transport))
    }
}
