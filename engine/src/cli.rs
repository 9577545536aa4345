//! CLI interface for parley
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ChatOverrides;

/// parley: a terminal chat client for local models with tool servers
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the interactive chat shell
    Chat(ChatArgs),

    /// List saved sessions, most recent first
    Sessions {
        /// Number of sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List models available at the Ollama endpoint
    Models,

    /// List configured tool servers
    Servers,
}

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Model to use instead of the configured one
    #[arg(long)]
    pub model: Option<String>,

    /// Resume a saved session, by id or session file
    #[arg(long, value_name = "ID|FILE")]
    pub load: Option<String>,

    /// Enable a configured server (repeatable)
    #[arg(long, value_name = "SERVER")]
    pub enable: Vec<String>,

    /// Disable a configured server (repeatable)
    #[arg(long, value_name = "SERVER")]
    pub disable: Vec<String>,

    /// Root directory for the filesystem server
    #[arg(long, value_name = "DIR")]
    pub fs_root: Option<PathBuf>,
}

impl ChatArgs {
    pub fn overrides(&self) -> ChatOverrides {
        ChatOverrides {
            model: self.model.clone(),
            enable: self.enable.clone(),
            disable: self.disable.clone(),
            fs_root: self.fs_root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["parley", "models"]);
        assert!(matches!(cli.command, Command::Models));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["parley", "--json", "--log", "debug", "servers"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_chat_flags() {
        let cli = Cli::parse_from([
            "parley",
            "chat",
            "--model",
            "qwen2.5:7b",
            "--load",
            "a1b2c3d4",
            "--enable",
            "voice",
            "--enable",
            "spotify",
            "--fs-root",
            "/tmp/work",
        ]);
        if let Command::Chat(args) = cli.command {
            assert_eq!(args.load.as_deref(), Some("a1b2c3d4"));
            let overrides = args.overrides();
            assert_eq!(overrides.model.as_deref(), Some("qwen2.5:7b"));
            assert_eq!(overrides.enable, vec!["voice", "spotify"]);
            assert!(overrides.disable.is_empty());
            assert_eq!(overrides.fs_root, Some(PathBuf::from("/tmp/work")));
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_sessions_limit() {
        let cli = Cli::parse_from(["parley", "sessions", "--limit", "5"]);
        if let Command::Sessions { limit } = cli.command {
            assert_eq!(limit, 5);
        } else {
            panic!("Expected Sessions command");
        }
    }
}
