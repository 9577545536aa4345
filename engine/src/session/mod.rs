//! Session persistence
//!
//! Each saved session is one JSON file under the sessions directory, named
//! after its id. A separate `index.json` maps ids to titles, paths and
//! modification times so listing never parses full histories.
//!
//! Writes go through [`atomic::write_atomic`]: the body is published first
//! and the index is only rewritten after the body write succeeded, so the
//! index never points at a half-written file.

pub mod atomic;

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use atomic::write_atomic;

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;
const TITLE_MAX_CHARS: usize = 48;

/// A conversation plus its identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Assigned on first save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    /// Model the conversation was held with
    #[serde(default)]
    pub model: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "turns")]
    pub conversation: Conversation,

    /// Backing file, once saved or loaded
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            title: None,
            model: model.into(),
            created_at: now,
            updated_at: now,
            conversation: Conversation::new(),
            path: None,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }
}

/// One line of `list()` output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Index record for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub title: String,
    pub path: PathBuf,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, Value>,
}

/// Durable store for sessions rooted at one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Persists `session` and returns its id.
    ///
    /// A session without an id gets a fresh one; a session with an id is
    /// overwritten in place. `title` replaces the current title when given.
    pub fn save(&self, session: &mut Session, title: Option<&str>) -> Result<String, EngineError> {
        fs::create_dir_all(&self.root)?;
        let mut index = self.read_index();

        let id = match &session.id {
            Some(id) => id.clone(),
            None => self.fresh_id(&index),
        };

        let mut record = session.clone();
        record.id = Some(id.clone());
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            record.title = Some(title.to_string());
        }
        if record.title.is_none() {
            record.title = Some(default_title(&record.conversation));
        }
        record.updated_at = Utc::now();

        let path = self.session_path(&id);
        let body = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &body)?;

        index.insert(
            id.clone(),
            IndexEntry {
                title: record.title.clone().unwrap_or_default(),
                path: path.clone(),
                updated_at: record.updated_at,
            },
        );
        self.write_index(&index)?;

        record.path = Some(path);
        *session = record;

        info!(
            "Saved session {} ({} turns)",
            id,
            session.conversation.len()
        );
        Ok(id)
    }

    /// Saves under the existing id; does nothing for a never-saved session.
    pub fn auto_save(&self, session: &mut Session) -> Result<Option<String>, EngineError> {
        if !session.is_saved() {
            debug!("Auto-save skipped: session has no id yet");
            return Ok(None);
        }
        self.save(session, None).map(Some)
    }

    /// Loads a session by id, all or nothing.
    pub fn load(&self, id: &str) -> Result<Session, EngineError> {
        let index = self.read_index();
        let entry = index
            .get(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;

        let mut session = read_session(id, &entry.path)?;
        session.id = Some(id.to_string());
        info!("Loaded session {} ({} turns)", id, session.conversation.len());
        Ok(session)
    }

    /// Imports a session file from anywhere, bypassing the index.
    ///
    /// The result is unsaved: a later save gives it an id in this store.
    pub fn load_path(&self, path: &Path) -> Result<Session, EngineError> {
        let label = path.display().to_string();
        let mut session = read_session(&label, path)?;
        session.id = None;
        session.path = None;
        info!("Imported {} ({} turns)", label, session.conversation.len());
        Ok(session)
    }

    /// Saved sessions, most recently updated first.
    ///
    /// Entries whose backing file no longer exists are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let mut summaries: Vec<SessionSummary> = self
            .read_index()
            .into_iter()
            .filter(|(id, entry)| {
                let present = entry.path.is_file();
                if !present {
                    warn!("Skipping session {}: {} is missing", id, entry.path.display());
                }
                present
            })
            .map(|(id, entry)| SessionSummary {
                id,
                title: entry.title,
                updated_at: entry.updated_at,
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(summaries)
    }

    /// Deletes a session file and its index entry.
    pub fn remove(&self, id: &str) -> Result<(), EngineError> {
        let mut index = self.read_index();
        let entry = index
            .remove(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;

        match fs::remove_file(&entry.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.write_index(&index)?;
        info!("Removed session {}", id);
        Ok(())
    }

    /// Reads the index, skipping malformed entries.
    ///
    /// A missing or unreadable index is rebuilt in memory from the session
    /// files on disk; it is persisted by the next save.
    fn read_index(&self) -> BTreeMap<String, IndexEntry> {
        let raw = match fs::read_to_string(self.index_path()) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.rebuild_index(),
            Err(e) => {
                warn!("Cannot read session index: {}", e);
                return self.rebuild_index();
            }
        };

        let file: IndexFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("Session index is unreadable, rebuilding: {}", e);
                return self.rebuild_index();
            }
        };

        file.sessions
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value::<IndexEntry>(value) {
                Ok(entry) => Some((id, entry)),
                Err(e) => {
                    warn!("Skipping malformed index entry {}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    fn rebuild_index(&self) -> BTreeMap<String, IndexEntry> {
        let mut index = BTreeMap::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return index;
        };

        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let Some(id) = session_id_from_path(&path) else {
                continue;
            };
            match read_session(&id, &path) {
                Ok(session) => {
                    index.insert(
                        id,
                        IndexEntry {
                            title: session.title.unwrap_or_default(),
                            path,
                            updated_at: session.updated_at,
                        },
                    );
                }
                Err(e) => warn!("Not indexing {}: {}", path.display(), e),
            }
        }
        index
    }

    fn write_index(&self, index: &BTreeMap<String, IndexEntry>) -> Result<(), EngineError> {
        let sessions = index
            .iter()
            .map(|(id, entry)| Ok((id.clone(), serde_json::to_value(entry)?)))
            .collect::<Result<BTreeMap<_, _>, serde_json::Error>>()?;
        let file = IndexFile {
            version: INDEX_VERSION,
            sessions,
        };
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    fn fresh_id(&self, index: &BTreeMap<String, IndexEntry>) -> String {
        loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if !index.contains_key(&candidate) && !self.session_path(&candidate).exists() {
                return candidate;
            }
        }
    }
}

fn session_id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') || path.file_name()?.to_str()? == INDEX_FILE {
        return None;
    }
    Some(stem.to_string())
}

fn read_session(id: &str, path: &Path) -> Result<Session, EngineError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(EngineError::SessionNotFound(id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut session: Session =
        serde_json::from_str(&raw).map_err(|e| EngineError::SessionCorrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    session
        .conversation
        .validate()
        .map_err(|reason| EngineError::SessionCorrupt {
            id: id.to_string(),
            reason,
        })?;

    session.path = Some(path.to_path_buf());
    Ok(session)
}

/// First line of the first user message, shortened.
fn default_title(conversation: &Conversation) -> String {
    let first_line = conversation
        .first_user_message()
        .and_then(|m| m.lines().find(|l| !l.trim().is_empty()))
        .map(str::trim);

    match first_line {
        Some(line) if line.chars().count() > TITLE_MAX_CHARS => {
            let short: String = line.chars().take(TITLE_MAX_CHARS).collect();
            format!("{}...", short.trim_end())
        }
        Some(line) => line.to_string(),
        None => "untitled".to_string(),
    }
}
