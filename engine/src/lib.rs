//! parley engine library
//!
//! This library provides the core functionality of parley: the turn loop,
//! tool server supervision, session storage and element extraction.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Credential storage and redaction
pub mod secrets;

/// Conversation turns and tool calls
pub mod conversation;

/// Code block and table extraction
pub mod extract;

/// Session persistence and indexing
pub mod session;

/// Tool server supervision and catalog
pub mod servers;

/// LLM provider abstraction layer
pub mod llm;

/// Conversation orchestration
pub mod agent;

/// Interactive shell
pub mod repl;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
