//! Integration tests for configuration management
//!
//! These tests verify that the Config struct is created on first run,
//! loaded from TOML, validated, and processed with path expansion.

use parley_engine::config::Config;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_first_run_writes_default_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("config.toml");

    let config = Config::load_or_create_at(&path).unwrap();
    assert!(path.is_file());
    assert_eq!(config.llm.model, "llama3.1:8b");
    // data_dir is expanded on load
    assert!(!config.core.data_dir.starts_with("~"));

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("[[servers]]"));
    assert!(written.contains("name = \"fs\""));

    let again = Config::load_or_create_at(&path).unwrap();
    assert_eq!(again.servers, config.servers);
}

#[test]
fn test_config_toml_parsing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(
        &path,
        r#"
[core]
log_level = "debug"
data_dir = "/var/lib/parley"

[llm]
base_url = "http://gpu-box:11434"
model = "qwen2.5:14b"
max_tool_rounds = 8
system_prompt = "Answer like a pirate."

[input]
eof_marker = "END"
auto_save = true

[[servers]]
name = "fs"
command = "parley-fs"
args = ["/srv/notes"]

[[servers]]
name = "spotify"
command = "python3"
args = ["spotify_server.py"]
enabled = false
required_env = ["SPOTIPY_CLIENT_ID", "SPOTIPY_CLIENT_SECRET"]
call_timeout_secs = 15

[servers.env]
SPOTIPY_REDIRECT_URI = "http://localhost:8888/callback"
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.sessions_dir(), std::path::PathBuf::from("/var/lib/parley/sessions"));
    assert_eq!(config.llm.base_url, "http://gpu-box:11434");
    assert_eq!(config.llm.max_tool_rounds, 8);
    assert_eq!(config.llm.timeout_secs, 300);
    assert_eq!(config.llm.system_prompt.as_deref(), Some("Answer like a pirate."));
    assert_eq!(config.input.eof_marker, "END");
    assert_eq!(config.input.voice_trigger, "<<");
    assert!(config.input.auto_save);

    assert_eq!(config.servers.len(), 2);
    let fs_server = config.server("fs").unwrap();
    assert!(fs_server.enabled);
    assert_eq!(fs_server.call_timeout_secs, 60);
    let spotify = config.server("spotify").unwrap();
    assert!(!spotify.enabled);
    assert_eq!(spotify.call_timeout_secs, 15);
    assert_eq!(spotify.required_env.len(), 2);
    assert_eq!(
        spotify.env.get("SPOTIPY_REDIRECT_URI").map(String::as_str),
        Some("http://localhost:8888/callback")
    );
}

#[test]
fn test_missing_sections_fall_back_to_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[llm]\nmodel = \"mistral:7b\"\n").unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.llm.model, "mistral:7b");
    assert_eq!(config.input.eof_marker, "EOF");
    assert_eq!(config.servers, Config::default_config().servers);

    fs::write(&path, "servers = []\n").unwrap();
    assert!(Config::load_from_path(&path).unwrap().servers.is_empty());
}

#[test]
fn test_invalid_files_are_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");

    fs::write(&path, "[llm\nmodel = ").unwrap();
    let error = Config::load_from_path(&path).unwrap_err();
    assert!(error.to_string().contains("Failed to parse config"));

    fs::write(&path, "[core]\nlog_level = \"loud\"\n").unwrap();
    assert!(Config::load_from_path(&path).is_err());

    fs::write(&path, "[llm]\nbase_url = \"localhost:11434\"\n").unwrap();
    assert!(Config::load_from_path(&path).is_err());

    fs::write(
        &path,
        "[[servers]]\nname = \"a\"\ncommand = \"x\"\n\n[[servers]]\nname = \"a\"\ncommand = \"y\"\n",
    )
    .unwrap();
    assert!(Config::load_from_path(&path).is_err());

    assert!(Config::load_from_path(&temp.path().join("absent.toml")).is_err());
}

#[test]
fn test_save_to_persists_changes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    let mut config = Config::load_or_create_at(&path).unwrap();

    config.input.eof_marker = "DONE".to_string();
    config.save_to(&path).unwrap();

    let reloaded = Config::load_from_path(&path).unwrap();
    assert_eq!(reloaded.input.eof_marker, "DONE");
}
