//! Concurrent session registry.
//!
//! The registry is the only structure touched from more than one task:
//! the request path registers, the binder path looks up, the lifecycle
//! path removes. Every method is a single critical section.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex},
};

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::terminal::TerminalSession;

/// Registry error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session id already in use: {0}")]
    IdInUse(String),
}

/// Process-wide table of live sessions, explicitly constructed and
/// shared as `Arc` rather than held as ambient global state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<TerminalSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh session id: 16 bytes of OS entropy rendered as
    /// a fixed-width lowercase hex string. Unguessable; the client must
    /// echo it back in the `bind` frame.
    #[must_use]
    pub fn allocate(&self) -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Register a session under its id.
    ///
    /// # Errors
    /// Fails if the id is already present; an existing session is never
    /// overwritten.
    pub fn register(&self, session: Arc<TerminalSession>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.entry(session.id().to_owned()) {
            Entry::Occupied(entry) => Err(RegistryError::IdInUse(entry.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Look up a session by id.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Remove a session, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.lock().unwrap().remove(id)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
