//! Error types and handling
//!
//! This module provides the error types used throughout parley.
//! All errors implement the `ParleyErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Propagation
//!
//! - Failures scoped to a single tool call are turned into tool-result turns
//!   and never abort the conversation loop.
//! - Failures scoped to a whole turn (model unreachable) abort only that turn.
//! - Failures scoped to a whole server (launch, handshake, credentials) mark
//!   that server unavailable and drop its tools from the catalog.
//! - Only a corrupt session body is fatal, and only for the load that hit it.

use std::path::PathBuf;
use thiserror::Error;

/// Trait for parley error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ParleyErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// credentials or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave the session usable. Non-recoverable errors
    /// require the user to fix something outside the running process.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Model**: runtime unreachable, timed out, or looping on tool calls
/// - **Tool servers**: unavailable servers, unknown tools, timeouts, domain errors
/// - **Sessions**: missing or corrupt session files
/// - **Extraction**: no element at the requested index
/// - **File System**: path validation used by the filesystem server
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ParleyErrorExt};
///
/// let error = EngineError::ToolTimeout {
///     server: "fs".to_string(),
///     tool: "read_file".to_string(),
///     secs: 60,
/// };
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::SessionCorrupt {
///     id: "abc123".to_string(),
///     reason: "expected value at line 1".to_string(),
/// };
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Model runtime errors
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model call timed out after {0}s")]
    ModelTimeout(u64),

    #[error("Exceeded {0} tool-call rounds without a final answer")]
    MaxToolRoundsExceeded(usize),

    // Tool server errors
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Server '{server}' unavailable: {reason}")]
    ToolUnavailable { server: String, reason: String },

    #[error("Missing credential {var} for server '{server}'")]
    MissingCredential { server: String, var: String },

    #[error("Tool '{0}' not found in any active server")]
    ToolNotFound(String),

    #[error("Unknown tool '{tool}' on server '{server}'")]
    UnknownTool { server: String, tool: String },

    #[error("Tool '{tool}' on server '{server}' timed out after {secs}s")]
    ToolTimeout {
        server: String,
        tool: String,
        secs: u64,
    },

    #[error("Tool '{tool}' on server '{server}' failed: {message}")]
    ToolError {
        server: String,
        tool: String,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session '{id}' is corrupt: {reason}")]
    SessionCorrupt { id: String, reason: String },

    #[error("Session has not been saved yet")]
    SessionUnsaved,

    // Extraction errors
    #[error("No {0}s found in the last response")]
    ExtractionEmpty(String),

    #[error("No {kind} at index {index} (found {len})")]
    IndexOutOfRange {
        kind: String,
        index: usize,
        len: usize,
    },

    // File system security errors
    #[error("Path denied: {0:?}")]
    PathDenied(PathBuf),

    #[error("Path outside root: {0:?}")]
    PathOutsideRoot(PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(PathBuf, String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ParleyErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::ModelUnavailable(_) => "Is Ollama running? Start it with 'ollama serve'",
            Self::ModelTimeout(_) => "The model took too long to respond. Try again",
            Self::MaxToolRoundsExceeded(_) => {
                "The model kept calling tools. Try rephrasing or breaking the request up"
            }

            Self::UnknownServer(_) => "Use /servers to see configured servers",
            Self::ToolUnavailable { .. } => "The server could not be started. Check its command",
            Self::MissingCredential { .. } => "Use /config <server> to provide credentials",
            Self::ToolNotFound(_) | Self::UnknownTool { .. } => {
                "The requested tool is not available. Use /tools to list tools"
            }
            Self::ToolTimeout { .. } => "The tool did not answer in time",
            Self::ToolError { .. } => "Tool operation failed",
            Self::Protocol(_) => "The tool server sent an unexpected message",

            Self::SessionNotFound(_) => "Use /sessions to list saved sessions",
            Self::SessionCorrupt { .. } => "The session file is damaged and cannot be loaded",
            Self::SessionUnsaved => "Save the session with /save first",

            Self::ExtractionEmpty(_) => "The last response has nothing to extract",
            Self::IndexOutOfRange { .. } => "Use >> or || without a number to list elements",

            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideRoot(_) => "Operation must be within the server root",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::Serialization(_) => "Data could not be encoded or decoded",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::SessionCorrupt { .. } => false,

            // All other errors leave the session usable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_errors_are_recoverable() {
        let errors = [
            EngineError::ToolNotFound("search".to_string()),
            EngineError::UnknownTool {
                server: "fs".to_string(),
                tool: "nope".to_string(),
            },
            EngineError::ToolError {
                server: "fs".to_string(),
                tool: "read_file".to_string(),
                message: "no such file".to_string(),
            },
            EngineError::ModelUnavailable("connection refused".to_string()),
        ];
        for error in &errors {
            assert!(error.is_recoverable(), "{} should be recoverable", error);
            assert!(!error.user_hint().is_empty());
        }
    }

    #[test]
    fn test_corruption_is_fatal() {
        let error = EngineError::SessionCorrupt {
            id: "s1".to_string(),
            reason: "truncated".to_string(),
        };
        assert!(!error.is_recoverable());
        assert_eq!(error.to_string(), "Session 's1' is corrupt: truncated");
    }

    #[test]
    fn test_extraction_messages() {
        let empty = EngineError::ExtractionEmpty("code block".to_string());
        assert_eq!(empty.to_string(), "No code blocks found in the last response");

        let range = EngineError::IndexOutOfRange {
            kind: "table".to_string(),
            index: 4,
            len: 2,
        };
        assert_eq!(range.to_string(), "No table at index 4 (found 2)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: EngineError = io.into();
        assert!(matches!(error, EngineError::Io(_)));
    }
}
