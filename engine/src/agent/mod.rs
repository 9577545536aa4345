//! Conversation Orchestration
//!
//! This module implements the turn loop that interleaves model responses
//! with tool calls, and the context object it runs against.

pub mod context;
pub mod core;

pub use context::SessionContext;
pub use core::{Orchestrator, TurnOutcome};
