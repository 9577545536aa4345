pub mod string;

pub use string::SecretString;

use keyring::Entry;
use regex::Regex;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// Keychain service all parley credentials are stored under.
pub const SERVICE_NAME: &str = "parley";

/// Where tool servers get their credentials from.
///
/// Values are looked up per server and variable name so two servers can use
/// the same variable name with different values.
pub trait CredentialSource: Send + Sync {
    /// Returns the value for `var` of `server`, if one is known.
    fn get(&self, server: &str, var: &str) -> Option<SecretString>;

    /// Persists a value for later lookups.
    fn store(&self, server: &str, var: &str, value: SecretString) -> Result<(), EngineError>;
}

/// Keychain key of one server credential.
pub fn credential_key(server: &str, var: &str) -> String {
    format!("{}.{}", server, var)
}

/// Value offered when prompting for a URL-type credential.
pub fn default_value(var: &str) -> Option<&'static str> {
    match var {
        "SPOTIPY_REDIRECT_URI" => Some("http://127.0.0.1:8888/callback"),
        "TUYA_BASE_URL" => Some("https://openapi.tuyaeu.com"),
        _ => None,
    }
}

/// SecretManager handles storage and retrieval of secrets in the OS keychain.
///
/// Secrets are stored in:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
pub struct SecretManager {
    service_name: String,
}

/// Regex patterns for detecting common secret formats, paired with their
/// replacement. Compiled once.
static SECRET_PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn get_secret_patterns() -> &'static Vec<(Regex, &'static str)> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"sk-[a-zA-Z0-9\-_]{20,}").expect("Invalid OpenAI pattern"),
                "[REDACTED]",
            ),
            (
                Regex::new(r"AIza[0-9A-Za-z\-_]{35}").expect("Invalid Google pattern"),
                "[REDACTED]",
            ),
            (
                Regex::new(r"ghp_[a-zA-Z0-9]{36}").expect("Invalid GitHub pattern"),
                "[REDACTED]",
            ),
            (
                Regex::new(r"Bearer\s+[^\s]{20,}").expect("Invalid Bearer pattern"),
                "[REDACTED]",
            ),
            // key=value and "key": "value" forms printed by OAuth and IoT libraries
            (
                Regex::new(
                    r#"(?i)\b(client_secret|access_token|refresh_token|api_key|password)(["']?\s*[:=]\s*["']?)[^\s"',&]+"#,
                )
                .expect("Invalid assignment pattern"),
                "${1}${2}[REDACTED]",
            ),
        ]
    })
}

/// Replaces anything that looks like a credential with `[REDACTED]`.
///
/// Applied to tool server stderr before it reaches the log.
///
/// # Examples
/// ```
/// use parley_engine::secrets::scrub;
///
/// assert_eq!(scrub("client_secret=abc123"), "client_secret=[REDACTED]");
/// ```
pub fn scrub(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in get_secret_patterns() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

impl SecretManager {
    /// Creates a new SecretManager with the given service name.
    ///
    /// The service name is used to namespace secrets in the OS keychain.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, EngineError> {
        Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })
    }

    /// Retrieves a secret from the OS keychain; `Ok(None)` when absent.
    pub fn get_secret(&self, key: &str) -> Result<Option<String>, EngineError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => {
                tracing::debug!("Retrieved secret '{}' from keychain", key);
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(EngineError::KeyringError(format!(
                "Failed to retrieve secret '{}': {}",
                key, e
            ))),
        }
    }

    /// Stores a secret in the OS keychain.
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.entry(key)?.set_password(value).map_err(|e| {
            EngineError::KeyringError(format!("Failed to store secret '{}': {}", key, e))
        })?;

        tracing::info!("Stored secret '{}' in keychain", key);
        Ok(())
    }

    /// Deletes a secret from the OS keychain.
    pub fn delete_secret(&self, key: &str) -> Result<(), EngineError> {
        self.entry(key)?.delete_password().map_err(|e| {
            EngineError::KeyringError(format!("Failed to delete secret '{}': {}", key, e))
        })?;

        tracing::info!("Deleted secret '{}' from keychain", key);
        Ok(())
    }

    /// Reads a value from the terminal with echo off.
    pub fn prompt_hidden(label: &str) -> Result<SecretString, EngineError> {
        let input = rpassword::prompt_password_stderr(&format!("{}: ", label))?;
        Self::accept_answer(label, &input, None)
    }

    /// Turns a typed answer into a credential value.
    ///
    /// An empty answer accepts `default` (offered for URL-type values).
    pub fn accept_answer(
        label: &str,
        answer: &str,
        default: Option<&str>,
    ) -> Result<SecretString, EngineError> {
        let answer = answer.trim();
        let input = match default {
            Some(default) if answer.is_empty() => default,
            _ => answer,
        };

        if input.is_empty() {
            return Err(EngineError::KeyringError(format!(
                "{} cannot be empty",
                label
            )));
        }
        Ok(SecretString::new(input))
    }
}

/// Default credential source: process environment first, then the keychain.
///
/// Keychain hits are cached for the process lifetime so restarting a server
/// does not touch the keychain again.
pub struct KeyringCredentials {
    manager: SecretManager,
    cache: RwLock<HashMap<String, SecretString>>,
}

impl KeyringCredentials {
    pub fn new() -> Self {
        Self {
            manager: SecretManager::new(SERVICE_NAME),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &SecretManager {
        &self.manager
    }
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for KeyringCredentials {
    fn get(&self, server: &str, var: &str) -> Option<SecretString> {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Some(SecretString::new(value));
            }
        }

        let key = credential_key(server, var);
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(secret) = cache.get(&key) {
                return Some(secret.clone());
            }
        }

        match self.manager.get_secret(&key) {
            Ok(Some(value)) => {
                let secret = SecretString::new(value);
                self.cache
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key, secret.clone());
                Some(secret)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Keychain lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    fn store(&self, server: &str, var: &str, value: SecretString) -> Result<(), EngineError> {
        let key = credential_key(server, var);
        self.manager.set_secret(&key, value.unsecure())?;
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
        Ok(())
    }
}

/// Process-local credential source with no keychain behind it.
#[derive(Default)]
pub struct MemoryCredentials {
    values: RwLock<HashMap<String, SecretString>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, server: &str, var: &str, value: &str) -> Self {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(credential_key(server, var), SecretString::new(value));
        self
    }
}

impl CredentialSource for MemoryCredentials {
    fn get(&self, server: &str, var: &str) -> Option<SecretString> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&credential_key(server, var))
            .cloned()
    }

    fn store(&self, server: &str, var: &str, value: SecretString) -> Result<(), EngineError> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(credential_key(server, var), value);
        Ok(())
    }
}
