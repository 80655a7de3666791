//! Session store: owns all chat state and drives replies.
//!
//! All state lives behind one mutex and every mutation is a synchronous
//! closure applied under it, so there is a single writer and the lock is
//! never held across an await. Persistence runs after each mutation through
//! a serialized save path that snapshots the state after acquiring the save
//! lock, so the last write always contains the newest state.

// std::sync::Mutex is correct here—lock is never held across .await points.
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::{
    ApiError, CompletionBackend, CompletionRequest, RequestOptions, StreamEvent,
    build_completion_request,
};
use crate::background::BackgroundTasks;
use crate::config::ChatConfig;
use crate::session::cancel::CancelRegistry;
use crate::session::message::{ChatSession, Message, Role, next_id_after};
use crate::session::prompts::{STREAM_ERROR, UNAUTHORIZED_ERROR};
use crate::store::{PersistedState, StateStore, StorageResult};

use futures::StreamExt;

/// Snapshot taken before a deletion, for undo.
#[derive(Debug, Clone)]
pub struct DeletedSession {
    sessions: Vec<ChatSession>,
    current_session_index: usize,
}

/// The chat store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatStore {
    state: Arc<Mutex<PersistedState>>,
    backend: Arc<dyn CompletionBackend>,
    persistence: Arc<dyn StateStore>,
    registry: CancelRegistry,
    background: BackgroundTasks,
    save_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ChatStore {
    /// Load persisted state (migrating old documents), or start fresh.
    pub async fn open(
        backend: Arc<dyn CompletionBackend>,
        persistence: Arc<dyn StateStore>,
    ) -> StorageResult<Self> {
        let mut state = persistence.load().await?.unwrap_or_default();
        state.migrate();

        let store = Self {
            state: Arc::new(Mutex::new(state)),
            backend,
            persistence,
            registry: CancelRegistry::new(),
            background: BackgroundTasks::new(),
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
        };

        // Persist the migrated document right away.
        store.save().await?;
        Ok(store)
    }

    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Background task tracker; tests await this for quiescence.
    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub(crate) fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    // ========================================================================
    // State access
    // ========================================================================

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, PersistedState> {
        self.state.lock().expect("mutex poisoned")
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.lock().sessions.clone()
    }

    pub fn current_session_index(&self) -> usize {
        self.lock().current_session_index
    }

    pub fn config(&self) -> ChatConfig {
        self.lock().config.clone()
    }

    /// The selected session. Heals an out-of-range index (possible after a
    /// document edited by hand) by clamping and scheduling a save.
    pub fn current_session(&self) -> ChatSession {
        let (session, healed) = {
            let mut state = self.lock();
            let healed = state.current_session_index >= state.sessions.len();
            if healed {
                state.current_session_index = state.sessions.len() - 1;
            }
            (state.sessions[state.current_session_index].clone(), healed)
        };
        if healed {
            self.schedule_save();
        }
        session
    }

    /// Apply a mutation under the lock, then persist.
    pub(crate) async fn commit<T>(
        &self,
        f: impl FnOnce(&mut PersistedState) -> T,
    ) -> StorageResult<T> {
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.save().await?;
        Ok(result)
    }

    async fn save(&self) -> StorageResult<()> {
        let _guard = self.save_lock.lock().await;
        // Snapshot after acquiring the lock: concurrent saves collapse into
        // writes of the newest state.
        let snapshot = self.lock().clone();
        self.persistence.save(&snapshot).await
    }

    fn schedule_save(&self) {
        let store = self.clone();
        self.background.spawn(async move {
            if let Err(e) = store.save().await {
                warn!(error = %e, "failed to persist state");
            }
        });
    }

    // ========================================================================
    // Session CRUD
    // ========================================================================

    /// Create a session, insert it at the front, and select it.
    pub async fn new_session(&self) -> StorageResult<ChatSession> {
        self.commit(|state| {
            let session = ChatSession::new();
            state.sessions.insert(0, session.clone());
            state.current_session_index = 0;
            session
        })
        .await
    }

    /// Select a session by index, clamping out-of-range values.
    pub async fn select_session(&self, index: usize) -> StorageResult<()> {
        self.commit(|state| {
            state.current_session_index = index.min(state.sessions.len() - 1);
        })
        .await
    }

    /// Reorder sessions, keeping the selection on the same session.
    pub async fn move_session(&self, from: usize, to: usize) -> StorageResult<()> {
        self.commit(|state| {
            let len = state.sessions.len();
            if from >= len || to >= len || from == to {
                return;
            }
            let session = state.sessions.remove(from);
            state.sessions.insert(to, session);

            let old = state.current_session_index;
            state.current_session_index = if old == from {
                to
            } else if old > from && old <= to {
                old - 1
            } else if old < from && old >= to {
                old + 1
            } else {
                old
            };
        })
        .await
    }

    /// Remove a session. Removing the last remaining session replaces it
    /// with a fresh one, so there is always at least one.
    pub async fn remove_session(&self, index: usize) -> StorageResult<()> {
        self.commit(|state| {
            if index >= state.sessions.len() {
                return;
            }
            if state.sessions.len() == 1 {
                state.sessions = vec![ChatSession::new()];
                state.current_session_index = 0;
                return;
            }
            state.sessions.remove(index);
            let current = state.current_session_index;
            state.current_session_index = if current > index {
                current - 1
            } else {
                current.min(state.sessions.len() - 1)
            };
        })
        .await
    }

    /// Remove a session, returning an undo snapshot. `None` if the index is
    /// out of range.
    pub async fn delete_session(&self, index: usize) -> StorageResult<Option<DeletedSession>> {
        self.commit(|state| {
            if index >= state.sessions.len() {
                return None;
            }
            let restore = DeletedSession {
                sessions: state.sessions.clone(),
                current_session_index: state.current_session_index,
            };

            if state.sessions.len() == 1 {
                state.sessions = vec![ChatSession::new()];
                state.current_session_index = 0;
            } else {
                state.sessions.remove(index);
                let current = state.current_session_index;
                state.current_session_index = if current > index {
                    current - 1
                } else {
                    current.min(state.sessions.len() - 1)
                };
            }
            Some(restore)
        })
        .await
    }

    /// Undo a deletion by restoring the snapshot it returned.
    pub async fn restore_session(&self, deleted: DeletedSession) -> StorageResult<()> {
        self.commit(move |state| {
            state.sessions = deleted.sessions;
            state.current_session_index = deleted.current_session_index;
        })
        .await
    }

    /// Drop every session and start over with a single fresh one.
    pub async fn clear_sessions(&self) -> StorageResult<()> {
        self.commit(|state| {
            state.sessions = vec![ChatSession::new()];
            state.current_session_index = 0;
        })
        .await
    }

    // ========================================================================
    // Targeted updates
    // ========================================================================

    pub async fn update_config(&self, f: impl FnOnce(&mut ChatConfig)) -> StorageResult<()> {
        self.commit(|state| f(&mut state.config)).await
    }

    pub async fn update_current_session<T>(
        &self,
        f: impl FnOnce(&mut ChatSession) -> T,
    ) -> StorageResult<T> {
        self.commit(|state| {
            let index = state.current_session_index;
            f(&mut state.sessions[index])
        })
        .await
    }

    /// Update one message by position. If either index is out of range the
    /// updater is not invoked and nothing is saved.
    pub async fn update_message(
        &self,
        session_index: usize,
        message_index: usize,
        f: impl FnOnce(&mut Message),
    ) -> StorageResult<()> {
        let changed = {
            let mut state = self.lock();
            match state
                .sessions
                .get_mut(session_index)
                .and_then(|s| s.messages.get_mut(message_index))
            {
                Some(message) => {
                    f(message);
                    true
                }
                None => false,
            }
        };
        if changed {
            self.save().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Chat flow
    // ========================================================================

    /// Messages sent with the next request: contextual prompts, the memory
    /// prompt when enabled, then the recent transcript window.
    pub fn messages_with_memory(&self) -> Vec<Message> {
        let state = self.lock();
        let session = &state.sessions[state.current_session_index];
        collect_messages_with_memory(session, &state.config)
    }

    /// Append the user's message plus a streaming assistant placeholder,
    /// then drive the reply in the background.
    pub async fn on_user_input(&self, content: impl Into<String>) -> StorageResult<()> {
        let content = content.into();

        let (session_id, assistant_id, request) = self
            .commit(|state| {
                let config = state.config.clone();
                let index = state.current_session_index;
                let session = &mut state.sessions[index];

                let user = Message::new(Role::User, content);
                let mut assistant = Message::new(Role::Assistant, "");
                // Keys stay adjacent no matter when the placeholder is built.
                assistant.id = next_id_after(user.id);
                assistant.streaming = true;

                let mut outgoing = collect_messages_with_memory(session, &config);
                outgoing.push(user.clone());

                let session_id = session.id;
                let assistant_id = assistant.id;
                session.messages.push(user);
                session.messages.push(assistant);

                let request = build_completion_request(
                    &outgoing,
                    &config.model_config,
                    RequestOptions {
                        filter_bot: false,
                        stream: true,
                    },
                );
                (session_id, assistant_id, request)
            })
            .await?;

        // Register before the request goes out so a stop issued immediately
        // after send still lands.
        let token = CancellationToken::new();
        self.registry.add(session_id, assistant_id, token.clone());

        let store = self.clone();
        self.background.spawn(async move {
            store
                .drive_reply(session_id, assistant_id, request, token)
                .await;
        });
        Ok(())
    }

    /// Cancel the in-flight reply for one message.
    pub fn stop_streaming(&self, session_id: i64, message_id: i64) {
        self.registry.cancel_one(session_id, message_id);
    }

    /// Cancel every in-flight reply.
    pub fn stop_all(&self) {
        self.registry.cancel_all();
    }

    async fn drive_reply(
        self,
        session_id: i64,
        assistant_id: i64,
        request: CompletionRequest,
        token: CancellationToken,
    ) {
        let mut stream = match self.backend.stream(request, token).await {
            Ok(stream) => stream,
            Err(e) => {
                self.finish_with_error(session_id, assistant_id, &e).await;
                return;
            }
        };

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Progress(text)) => {
                    let result = self
                        .commit(|state| {
                            if let Some(message) = find_message(state, session_id, assistant_id) {
                                message.content = text;
                            }
                        })
                        .await;
                    if let Err(e) = result {
                        warn!(session_id, error = %e, "failed to persist progress");
                    }
                }
                Ok(StreamEvent::Done(text)) => {
                    let chars = text.chars().count() as u64;
                    let result = self
                        .commit(|state| {
                            if let Some(message) = find_message(state, session_id, assistant_id) {
                                message.content = text;
                                message.streaming = false;
                                message.date = Utc::now();
                            }
                            if let Some(session) = session_by_id(state, session_id) {
                                session.last_update = Utc::now();
                                session.stat.char_count += chars;
                            }
                        })
                        .await;
                    if let Err(e) = result {
                        warn!(session_id, error = %e, "failed to persist reply");
                    }
                    self.registry.remove(session_id, assistant_id);
                    self.summarize_session(session_id).await;
                    return;
                }
                Err(e) => {
                    self.finish_with_error(session_id, assistant_id, &e).await;
                    return;
                }
            }
        }

        // Stream ended without a terminal event; treat as a clean finish.
        self.registry.remove(session_id, assistant_id);
    }

    async fn finish_with_error(&self, session_id: i64, assistant_id: i64, error: &ApiError) {
        warn!(session_id, error = %error, "chat request failed");

        let result = self
            .commit(|state| {
                let Some(session) = session_by_id(state, session_id) else {
                    return;
                };
                let Some(pos) = session.messages.iter().position(|m| m.id == assistant_id)
                else {
                    return;
                };

                {
                    let assistant = &mut session.messages[pos];
                    assistant.streaming = false;
                    assistant.is_error = true;
                    match error {
                        ApiError::Unauthorized { .. } => {
                            assistant.content = UNAUTHORIZED_ERROR.to_string();
                        }
                        // The user stopped it; whatever arrived stands as-is.
                        ApiError::Aborted => {}
                        _ => {
                            if !assistant.content.is_empty() {
                                assistant.content.push_str("\n\n");
                            }
                            assistant.content.push_str(STREAM_ERROR);
                        }
                    }
                }

                if pos > 0 && session.messages[pos - 1].role == Role::User {
                    session.messages[pos - 1].is_error = true;
                }
            })
            .await;
        if let Err(e) = result {
            warn!(session_id, error = %e, "failed to persist error state");
        }

        self.registry.remove(session_id, assistant_id);
    }
}

// ============================================================================
// Helpers shared with the memory compressor
// ============================================================================

pub(crate) fn session_by_id(state: &mut PersistedState, id: i64) -> Option<&mut ChatSession> {
    state.sessions.iter_mut().find(|s| s.id == id)
}

fn find_message<'a>(
    state: &'a mut PersistedState,
    session_id: i64,
    message_id: i64,
) -> Option<&'a mut Message> {
    session_by_id(state, session_id)?
        .messages
        .iter_mut()
        .find(|m| m.id == message_id)
}

pub(crate) fn collect_messages_with_memory(
    session: &ChatSession,
    config: &ChatConfig,
) -> Vec<Message> {
    let mut out = session.context.clone();
    if let Some(memory) = session.memory_message() {
        out.push(memory);
    }

    let clean: Vec<&Message> = session.messages.iter().filter(|m| !m.is_error).collect();
    let start = if config.history_message_count < 0 {
        0
    } else {
        clean
            .len()
            .saturating_sub(config.history_message_count as usize)
    };
    out.extend(clean[start..].iter().map(|&m| m.clone()));
    out
}
