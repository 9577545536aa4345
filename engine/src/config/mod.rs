//! Configuration management
//!
//! This module handles loading, validation, and management of the parley
//! configuration. Configuration is stored in TOML format at
//! ~/.parley/config.toml and created with defaults on first run.
//!
//! # Configuration Sections
//!
//! - **core**: log level, data directory
//! - **llm**: Ollama endpoint, model, timeouts, tool-round limit, system prompt
//! - **input**: EOF marker, voice trigger, auto-save default
//! - **servers**: one `[[servers]]` table per tool server, in registration order
//!
//! # Examples
//!
//! ```no_run
//! use parley_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Model: {}", config.llm.model);
//! println!("Sessions: {:?}", config.sessions_dir());
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Model runtime settings
    #[serde(default)]
    pub llm: LLMConfig,

    /// Interactive input settings
    #[serde(default)]
    pub input: InputConfig,

    /// Tool servers, in registration order. Omitting the array keeps the
    /// built-in set; an empty array means no servers.
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerConfig>,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Model runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL for the Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Timeout for one model call (seconds)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum tool-call rounds per user turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Interactive input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Line marker that submits the buffered message
    #[serde(default = "default_eof_marker")]
    pub eof_marker: String,

    /// Line that toggles voice recording
    #[serde(default = "default_voice_trigger")]
    pub voice_trigger: String,

    /// Start sessions with auto-save on
    #[serde(default)]
    pub auto_save: bool,
}

/// One tool server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Unique name, also the namespace prefix on tool collisions
    pub name: String,

    /// Program to launch
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra non-secret environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Credential variables, resolved from the environment or keychain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,

    /// Timeout for one tool call (seconds)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl ServerConfig {
    fn new(name: &str, command: &str, args: &[&str], enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            cwd: None,
            enabled,
            required_env: Vec::new(),
            call_timeout_secs: default_call_timeout(),
        }
    }

    fn requiring(mut self, vars: &[&str]) -> Self {
        self.required_env = vars.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Command-line overrides for `parley chat`.
#[derive(Debug, Clone, Default)]
pub struct ChatOverrides {
    pub model: Option<String>,
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub fs_root: Option<PathBuf>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.parley")
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_max_tool_rounds() -> usize {
    20
}

fn default_eof_marker() -> String {
    "EOF".to_string()
}

fn default_voice_trigger() -> String {
    "<<".to_string()
}

fn default_call_timeout() -> u64 {
    60
}

fn default_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::new("fs", "parley-fs", &["."], true),
        ServerConfig::new("image", "python3", &["image_gen_server.py"], false),
        ServerConfig::new("voice", "python3", &["voice_server.py"], false),
        ServerConfig::new("multimedia", "python3", &["multimedia_server.py"], false),
        ServerConfig::new("video", "python3", &["openshot_server.py"], false),
        ServerConfig::new("youtube", "python3", &["youtube_server.py"], false),
        ServerConfig::new("konyks", "python3", &["konyks_server.py"], false).requiring(&[
            "TUYA_CLIENT_ID",
            "TUYA_CLIENT_SECRET",
            "TUYA_UID",
            "TUYA_BASE_URL",
        ]),
        ServerConfig::new("spotify", "python3", &["spotify_server.py"], false).requiring(&[
            "SPOTIPY_CLIENT_ID",
            "SPOTIPY_CLIENT_SECRET",
            "SPOTIPY_REDIRECT_URI",
        ]),
    ]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            timeout_secs: default_llm_timeout(),
            max_tool_rounds: default_max_tool_rounds(),
            system_prompt: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            eof_marker: default_eof_marker(),
            voice_trigger: default_voice_trigger(),
            auto_save: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.parley/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Same as [`Config::load_or_create`] for an explicit path.
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;
        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        let config = Self::default_config();
        config.save_to(path)?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Writes the configuration as TOML.
    pub fn save_to(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Get the default configuration file path (~/.parley/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".parley").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            input: InputConfig::default(),
            servers: default_servers(),
        }
    }

    /// Where saved sessions live.
    pub fn sessions_dir(&self) -> PathBuf {
        self.core.data_dir.join("sessions")
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    fn server_mut(&mut self, name: &str) -> Result<&mut ServerConfig, EngineError> {
        self.servers
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| EngineError::Config(format!("No server named '{}' is configured", name)))
    }

    /// Applies `parley chat` flags on top of the file configuration.
    pub fn apply_overrides(&mut self, overrides: &ChatOverrides) -> Result<(), EngineError> {
        if let Some(model) = &overrides.model {
            self.llm.model = model.clone();
        }
        for name in &overrides.enable {
            self.server_mut(name)?.enabled = true;
        }
        for name in &overrides.disable {
            self.server_mut(name)?.enabled = false;
        }
        if let Some(root) = &overrides.fs_root {
            let root = expand_path(root)?;
            let fs = self.server_mut("fs")?;
            fs.args = vec![root.to_string_lossy().into_owned()];
            fs.enabled = true;
        }
        self.validate()
    }

    /// Checks invariants without touching the filesystem.
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            return Err(EngineError::Config(format!(
                "llm.base_url must be an http(s) URL, got '{}'",
                self.llm.base_url
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(EngineError::Config("llm.model cannot be empty".to_string()));
        }
        if self.llm.max_tool_rounds == 0 {
            return Err(EngineError::Config(
                "llm.max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.input.eof_marker.trim().is_empty() {
            return Err(EngineError::Config(
                "input.eof_marker cannot be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() || server.name.contains('.') {
                return Err(EngineError::Config(format!(
                    "Invalid server name '{}': must be non-empty and contain no '.'",
                    server.name
                )));
            }
            if !names.insert(server.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "Server '{}' is configured twice",
                    server.name
                )));
            }
            if server.command.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "Server '{}' has no command",
                    server.name
                )));
            }
            if server.call_timeout_secs == 0 {
                return Err(EngineError::Config(format!(
                    "Server '{}': call_timeout_secs must be at least 1",
                    server.name
                )));
            }
        }
        Ok(())
    }

    /// Validates and expands paths.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;
        self.core.data_dir = expand_path(&self.core.data_dir)?;
        for server in &mut self.servers {
            if let Some(cwd) = &server.cwd {
                server.cwd = Some(expand_path(cwd)?);
            }
        }
        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.model, "llama3.1:8b");
        assert_eq!(config.llm.max_tool_rounds, 20);
        assert_eq!(config.input.eof_marker, "EOF");
        assert_eq!(config.servers[0].name, "fs");
        assert!(config.servers[0].enabled);
        assert!(config.servers[1..].iter().all(|s| !s.enabled));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credential_servers_declare_variables() {
        let config = Config::default_config();
        let spotify = config.server("spotify").unwrap();
        assert!(spotify
            .required_env
            .contains(&"SPOTIPY_REDIRECT_URI".to_string()));
        assert_eq!(config.server("konyks").unwrap().required_env.len(), 4);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/test")).unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.servers, deserialized.servers);
        assert_eq!(config.llm.base_url, deserialized.llm.base_url);
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default_config();
        let overrides = ChatOverrides {
            model: Some("qwen2.5:7b".to_string()),
            enable: vec!["voice".to_string()],
            disable: vec!["fs".to_string()],
            fs_root: None,
        };
        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert!(config.server("voice").unwrap().enabled);
        assert!(!config.server("fs").unwrap().enabled);

        let unknown = ChatOverrides {
            enable: vec!["nope".to_string()],
            ..Default::default()
        };
        assert!(config.apply_overrides(&unknown).is_err());
    }

    #[test]
    fn test_fs_root_override() {
        let mut config = Config::default_config();
        let overrides = ChatOverrides {
            fs_root: Some(PathBuf::from("/srv/notes")),
            ..Default::default()
        };
        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.server("fs").unwrap().args, vec!["/srv/notes".to_string()]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default_config();
        config.llm.max_tool_rounds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.input.eof_marker = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.servers.push(config.servers[0].clone());
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.servers[0].name = "my.fs".to_string();
        assert!(config.validate().is_err());
    }
}
