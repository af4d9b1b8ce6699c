//! Conversational AI client abstraction.
//!
//! A [`ChatClient`] opens live conversations; each conversation is an opaque
//! [`ChatHandle`] that carries the provider-side dialog state. A session owns
//! exactly one handle at a time and replaces it when its model changes.

mod gemini;

pub use gemini::GeminiClient;

use crate::error::ChatResult;
use async_trait::async_trait;

/// A live conversation with an AI model.
///
/// Handles are exclusively owned by a session and are not serializable; a
/// persisted session record never includes one.
#[async_trait]
pub trait ChatHandle: Send {
    /// Send one user message and return the model's text response.
    async fn send(&mut self, text: &str) -> ChatResult<String>;

    /// Identifier of the model this conversation is bound to.
    fn model_id(&self) -> &str;
}

/// Factory for live conversations.
pub trait ChatClient: Send + Sync {
    /// Start a fresh conversation with the given model.
    fn start_chat(&self, model_id: &str) -> ChatResult<Box<dyn ChatHandle>>;
}

/// Deterministic local chat client.
///
/// Answers every message without network access; useful for tests and for
/// running the bot without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoClient;

impl EchoClient {
    /// Create a new echo client.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ChatClient for EchoClient {
    fn start_chat(&self, model_id: &str) -> ChatResult<Box<dyn ChatHandle>> {
        Ok(Box::new(EchoChat {
            model_id: model_id.to_string(),
            turns: 0,
        }))
    }
}

/// Conversation state for [`EchoClient`].
#[derive(Debug)]
struct EchoChat {
    model_id: String,
    turns: usize,
}

#[async_trait]
impl ChatHandle for EchoChat {
    async fn send(&mut self, text: &str) -> ChatResult<String> {
        self.turns += 1;
        Ok(format!("[{} #{}] {text}", self.model_id, self.turns))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
