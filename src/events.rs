//! Events exchanged over the message bus.
//!
//! Two event types cover the whole transport seam: user text coming in,
//! and replies or typing indicators going out. The store key for a sender
//! is `"<channel>:<sender_id>"`, so the same person on two transports gets
//! two independent dialogs.

use crate::util::generate_message_id;

/// User text arriving from a channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Process-unique message ID.
    pub id: String,
    /// Name of the channel that received the message.
    pub channel: String,
    /// Sender's identifier within that channel.
    pub sender_id: String,
    /// Conversation identifier replies should target.
    pub chat_id: String,
    /// The text itself.
    pub content: String,
}

impl InboundMessage {
    /// Build an inbound message.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }

    /// Shorthand for a message typed at the local terminal.
    pub fn cli(content: impl Into<String>) -> Self {
        Self::new("cli", "user", "direct", content)
    }

    /// Session-store key for the sender.
    #[must_use]
    pub fn user_key(&self) -> String {
        format!("{}:{}", self.channel, self.sender_id)
    }
}

/// What an outbound event asks the channel to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutboundKind {
    /// Deliver the text content.
    #[default]
    Text,
    /// Show a typing indicator; `content` is empty.
    Typing,
}

/// A reply or typing indicator heading back to a channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Process-unique message ID.
    pub id: String,
    /// Name of the channel that should deliver this.
    pub channel: String,
    /// Conversation identifier to deliver into.
    pub chat_id: String,
    /// Delivery kind.
    pub kind: OutboundKind,
    /// Text to deliver; empty for typing indicators.
    pub content: String,
}

impl OutboundMessage {
    /// Build an outbound text message.
    pub fn text(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            kind: OutboundKind::Text,
            content: content.into(),
        }
    }

    /// Text reply into the conversation an inbound message came from.
    pub fn reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        Self::text(msg.channel.clone(), msg.chat_id.clone(), content)
    }

    /// Typing indicator for the conversation an inbound message came from.
    #[must_use]
    pub fn typing_for(msg: &InboundMessage) -> Self {
        Self {
            id: generate_message_id(),
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            kind: OutboundKind::Typing,
            content: String::new(),
        }
    }
}
