//! Versioned application state and schema migrations.
//!
//! The whole application state (sessions, selection index, config) is
//! persisted as a single versioned document. Older documents are upgraded
//! in place by [`PersistedState::migrate`] before use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;
use crate::session::ChatSession;
use crate::store::error::StorageResult;

/// Current schema version written by this build.
pub const SCHEMA_VERSION: u32 = 3;

/// Version that introduced the per-session `send_memory` flag.
const SEND_MEMORY_VERSION: u32 = 2;

/// Version that reset contextual prompts after a format change.
const CONTEXT_VERSION: u32 = 3;

/// Everything the application persists, as a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "oldest_version")]
    pub version: u32,

    #[serde(default)]
    pub sessions: Vec<ChatSession>,

    #[serde(default)]
    pub current_session_index: usize,

    #[serde(default)]
    pub config: ChatConfig,
}

fn oldest_version() -> u32 {
    1
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            sessions: vec![ChatSession::new()],
            current_session_index: 0,
            config: ChatConfig::default(),
        }
    }
}

impl PersistedState {
    /// Upgrade a loaded document to the current schema version.
    ///
    /// Each migration tier applies exactly once; re-running on an
    /// already-current document is a no-op. Always leaves the state with at
    /// least one session and a selection index that points at one.
    pub fn migrate(&mut self) {
        if self.version < SEND_MEMORY_VERSION {
            // Flag did not exist yet; preserve the old always-on behavior.
            for session in &mut self.sessions {
                session.send_memory = true;
            }
        }

        if self.version < CONTEXT_VERSION {
            // Contextual prompts changed format; stale ones are dropped
            // rather than misinterpreted.
            for session in &mut self.sessions {
                session.context.clear();
            }
        }

        self.version = SCHEMA_VERSION;

        if self.sessions.is_empty() {
            self.sessions.push(ChatSession::new());
        }
        if self.current_session_index >= self.sessions.len() {
            self.current_session_index = self.sessions.len() - 1;
        }
    }
}

/// Persistence backend for the application state document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted state, or `None` if nothing was saved yet.
    async fn load(&self) -> StorageResult<Option<PersistedState>>;

    /// Persist the full state document.
    async fn save(&self, state: &PersistedState) -> StorageResult<()>;
}
