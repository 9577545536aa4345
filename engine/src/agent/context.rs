//! Per-session state carried through the orchestrator
//!
//! Everything the shell and the turn loop share lives here instead of in
//! globals: the active session, the auto-save flag and the elements of the
//! last final answer.

use crate::extract::Extraction;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
    pub auto_save: bool,
    last_response: Option<String>,
    extraction: Extraction,
}

impl SessionContext {
    /// Fresh, unsaved session for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_session(Session::new(model))
    }

    pub fn from_session(session: Session) -> Self {
        Self {
            session,
            auto_save: false,
            last_response: None,
            extraction: Extraction::default(),
        }
    }

    /// Replaces the conversation wholesale, e.g. after `/load`.
    ///
    /// The last-response cache belongs to the old conversation and is reset.
    pub fn replace_session(&mut self, session: Session) {
        self.session = session;
        self.last_response = None;
        self.extraction = Extraction::default();
    }

    /// Records a new final answer and recomputes its elements.
    pub fn set_last_response(&mut self, text: &str) {
        self.extraction = Extraction::from_text(text);
        self.last_response = Some(text.to_string());
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    pub fn extraction(&self) -> &Extraction {
        &self.extraction
    }
}
