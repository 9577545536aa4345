//! Parley SDK
//!
//! Shared library providing the error taxonomy and the tool protocol types.
//! This crate is used by both the engine and the bundled tool servers.

/// Error types and handling
pub mod errors;

/// Tool protocol wire types
pub mod protocol;

/// Tool call argument types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ParleyErrorExt};
pub use protocol::{Content, Incoming, ToolCallResult, ToolDescriptor};
pub use types::{ToolError, ToolInput};
