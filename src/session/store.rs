//! In-memory session store.
//!
//! The store is the single point of truth for live dialogs. Membership is
//! guarded by a map-level `RwLock`; each session sits behind its own async
//! `Mutex` so appends, model changes, and eviction serialize per user even
//! under real parallelism.

use crate::chat::{ChatClient, ChatHandle};
use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Role of a dialog message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message written by the user.
    User,
    /// Message written by the AI assistant.
    Assistant,
}

impl Role {
    /// String form used in persisted records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a new message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Durable snapshot of a session taken at eviction time.
///
/// The chat handle is deliberately absent: it is not transferable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Timestamp of the most recent inbound message.
    #[serde(rename = "lastMessageAt", with = "crate::util::record_timestamp")]
    pub last_message_at: DateTime<Utc>,
    /// Dialog messages in append order.
    pub messages: Vec<ChatMessage>,
    /// Model the session was bound to.
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// The mutable conversational state for one user.
pub struct Session {
    last_message_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
    model_id: String,
    chat: Box<dyn ChatHandle>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("last_message_at", &self.last_message_at)
            .field("messages", &self.messages.len())
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(model_id: impl Into<String>, chat: Box<dyn ChatHandle>) -> Self {
        Self {
            last_message_at: Utc::now(),
            messages: Vec::new(),
            model_id: model_id.into(),
            chat,
        }
    }

    /// Append a message and return the new message count.
    ///
    /// `last_message_at` tracks inbound traffic only, so it is bumped for
    /// user messages and left alone for assistant ones.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> usize {
        self.messages.push(ChatMessage::new(role, content));
        if role == Role::User {
            self.last_message_at = Utc::now();
        }
        self.messages.len()
    }

    /// Dialog messages in append order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Timestamp of the most recent inbound message.
    #[must_use]
    pub const fn last_message_at(&self) -> DateTime<Utc> {
        self.last_message_at
    }

    /// Identifier of the model in use.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Mutable access to the chat handle for this dialog.
    pub fn chat_mut(&mut self) -> &mut dyn ChatHandle {
        self.chat.as_mut()
    }

    /// Replace the model and its conversation handle. The old handle is
    /// dropped, releasing the provider-side conversation.
    pub fn set_model(&mut self, model_id: impl Into<String>, chat: Box<dyn ChatHandle>) {
        self.model_id = model_id.into();
        self.chat = chat;
    }

    /// Snapshot the session into a persistence record.
    #[must_use]
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            last_message_at: self.last_message_at,
            messages: self.messages.clone(),
            model_id: self.model_id.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_message_at(&mut self, ts: DateTime<Utc>) {
        self.last_message_at = ts;
    }
}

/// Shared reference to one session.
pub type SessionRef = Arc<Mutex<Session>>;

/// Point-in-time view of one session, for the refresher scan.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Store key.
    pub user_id: String,
    /// Timestamp of the most recent inbound message.
    pub last_message_at: DateTime<Utc>,
    /// Number of messages in the dialog.
    pub message_count: usize,
}

/// Concurrent map from user key to live session.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionRef>>,
    client: Arc<dyn ChatClient>,
    default_model: String,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create an empty store. New sessions get a fresh chat handle from
    /// `client` bound to `default_model`.
    pub fn new(client: Arc<dyn ChatClient>, default_model: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            client,
            default_model: default_model.into(),
        }
    }

    /// Return the existing session for `user_id`, or atomically create a
    /// default one. The boolean is `true` when this call created the session;
    /// concurrent callers for the same absent key observe exactly one
    /// creation.
    pub async fn get_or_create(&self, user_id: &str) -> StorageResult<(SessionRef, bool)> {
        // Fast path: session already exists.
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(user_id) {
                return Ok((Arc::clone(session), false));
            }
        }

        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock; another task may have won the race.
        if let Some(session) = sessions.get(user_id) {
            return Ok((Arc::clone(session), false));
        }

        let chat = self
            .client
            .start_chat(&self.default_model)
            .map_err(|e| StorageError::Handle(e.to_string()))?;
        let session: SessionRef = Arc::new(Mutex::new(Session::new(&self.default_model, chat)));
        sessions.insert(user_id.to_string(), Arc::clone(&session));

        debug!(user_id = %user_id, model = %self.default_model, "session created");
        Ok((session, true))
    }

    /// Append a message to an existing session and return the new message
    /// count. Fails with [`StorageError::SessionNotFound`] when the session
    /// does not exist (e.g. was evicted concurrently).
    pub async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> StorageResult<usize> {
        let session = self.get(user_id).await?;
        let mut session = session.lock().await;
        Ok(session.add_message(role, content))
    }

    /// Replace the model (and chat handle) of an existing session.
    pub async fn set_model(&self, user_id: &str, model_id: &str) -> StorageResult<()> {
        let chat = self
            .client
            .start_chat(model_id)
            .map_err(|e| StorageError::Handle(e.to_string()))?;

        let session = self.get(user_id).await?;
        let mut session = session.lock().await;
        session.set_model(model_id, chat);
        debug!(user_id = %user_id, model = %model_id, "session model changed");
        Ok(())
    }

    /// Atomically remove the session and return its snapshot.
    ///
    /// Returns `None` when the session is absent; concurrent eviction
    /// attempts therefore degrade to a silent no-op.
    pub async fn evict(&self, user_id: &str) -> Option<SessionRecord> {
        let session = self.sessions.write().await.remove(user_id)?;
        let session = session.lock().await;
        Some(session.to_record())
    }

    /// A point-in-time scan view of all sessions.
    ///
    /// The map lock is held only long enough to clone the membership; the
    /// per-session fields are then read one session at a time. Callers must
    /// re-check via [`Self::evict`] before acting, since sessions may change
    /// or disappear after the scan.
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        let refs: Vec<(String, SessionRef)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        let mut summaries = Vec::with_capacity(refs.len());
        for (user_id, session) in refs {
            let session = session.lock().await;
            summaries.push(SessionSummary {
                user_id,
                last_message_at: session.last_message_at(),
                message_count: session.messages().len(),
            });
        }
        summaries
    }

    /// Evict every session, returning the snapshots in no particular order.
    /// Used for the final flush on shutdown.
    pub async fn drain(&self) -> Vec<(String, SessionRecord)> {
        let drained: Vec<(String, SessionRef)> =
            self.sessions.write().await.drain().collect();

        let mut records = Vec::with_capacity(drained.len());
        for (user_id, session) in drained {
            let session = session.lock().await;
            records.push((user_id, session.to_record()));
        }
        records
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn get(&self, user_id: &str) -> StorageResult<SessionRef> {
        let sessions = self.sessions.read().await;
        sessions
            .get(user_id)
            .cloned()
            .ok_or_else(|| StorageError::SessionNotFound(user_id.to_string()))
    }
}
