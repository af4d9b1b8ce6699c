//! Telegram channel built on teloxide.
//!
//! Inbound text messages are published to the bus keyed by the Telegram
//! user ID; outbound text is delivered with `send_message` and typing
//! indicators with `send_chat_action`.

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::{ChannelError, ChannelResult};
use crate::events::{InboundMessage, OutboundKind, OutboundMessage};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MediaKind, MessageKind};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info};

/// Telegram messages cannot exceed this many characters.
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram channel configuration.
#[derive(Debug, Clone)]
pub struct TelegramChannelConfig {
    /// Bot token from @BotFather.
    pub token: String,
    /// Allowed user IDs. Empty means allow all.
    pub allowed_users: Vec<i64>,
}

impl TelegramChannelConfig {
    /// Create a config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            allowed_users: Vec::new(),
        }
    }

    /// Add an allowed user ID.
    #[must_use]
    pub fn allow_user(mut self, user_id: i64) -> Self {
        self.allowed_users.push(user_id);
        self
    }

    /// Add multiple allowed user IDs.
    #[must_use]
    pub fn allow_users(mut self, user_ids: impl IntoIterator<Item = i64>) -> Self {
        self.allowed_users.extend(user_ids);
        self
    }

    /// Check if a user is allowed.
    #[must_use]
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }
}

/// Telegram channel.
pub struct TelegramChannel {
    base: ChannelBase,
    config: TelegramChannelConfig,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
    dispatcher_task: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    #[must_use]
    pub fn new(config: TelegramChannelConfig) -> Self {
        Self {
            base: ChannelBase::new("telegram"),
            config,
            shutdown_tx: RwLock::new(None),
            dispatcher_task: RwLock::new(None),
        }
    }

    /// Split a long message into chunks Telegram will accept. Splits at
    /// line breaks where possible, at char boundaries otherwise.
    fn split_message(text: &str, max_len: usize) -> Vec<String> {
        if text.len() <= max_len {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            if !current.is_empty() && current.len() + line.len() + 1 > max_len {
                chunks.push(std::mem::take(&mut current));
            }
            if line.len() > max_len {
                for ch in line.chars() {
                    if current.len() + ch.len_utf8() > max_len {
                        chunks.push(std::mem::take(&mut current));
                    }
                    current.push(ch);
                }
                continue;
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    async fn deliver(bot: &Bot, msg: &OutboundMessage) -> ChannelResult<()> {
        let id: i64 = msg
            .chat_id
            .parse()
            .map_err(|_| ChannelError::send(format!("invalid chat ID: {}", msg.chat_id)))?;
        let chat_id = ChatId(id);

        match msg.kind {
            OutboundKind::Typing => {
                bot.send_chat_action(chat_id, ChatAction::Typing)
                    .await
                    .map_err(|e| ChannelError::send(e.to_string()))?;
            }
            OutboundKind::Text => {
                for chunk in Self::split_message(&msg.content, MAX_MESSAGE_LENGTH) {
                    bot.send_message(chat_id, chunk)
                        .await
                        .map_err(|e| ChannelError::send(e.to_string()))?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        if self.config.token.is_empty() {
            return Err(ChannelError::Config("telegram token is empty".to_string()));
        }
        self.base.set_state(ChannelState::Starting).await;

        let bot = Bot::new(&self.config.token);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let allowed_users = self.config.allowed_users.clone();
        let inbound = bus.inbound_handle();

        // Output task: deliver replies and typing actions until shutdown.
        let mut outbound_rx = bus.subscribe_channel("telegram").await;
        let bot_for_output = bot.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => {
                        if let Err(e) = Self::deliver(&bot_for_output, &msg).await {
                            error!(chat_id = %msg.chat_id, error = %e, "telegram delivery failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("telegram output task shutting down");
                        break;
                    }
                }
            }
        });

        // Inbound dispatcher: text messages only, gated by the allowlist.
        let handler = Update::filter_message().endpoint(move |_bot: Bot, msg: Message| {
            let inbound = inbound.clone();
            let allowed_users = allowed_users.clone();

            async move {
                #[allow(clippy::cast_possible_wrap)] // user IDs fit in i64
                let user_id = msg.from.as_ref().map_or(0, |u| u.id.0 as i64);
                if !(allowed_users.is_empty() || allowed_users.contains(&user_id)) {
                    debug!(user_id, "message from unauthorized user ignored");
                    return Ok::<(), teloxide::RequestError>(());
                }

                let MessageKind::Common(common) = &msg.kind else {
                    return Ok(());
                };
                let MediaKind::Text(text) = &common.media_kind else {
                    debug!(user_id, "non-text message ignored");
                    return Ok(());
                };

                let event = InboundMessage::new(
                    "telegram",
                    user_id.to_string(),
                    msg.chat.id.0.to_string(),
                    text.text.clone(),
                );
                if let Err(e) = inbound.publish(event).await {
                    error!(error = %e, "failed to publish telegram message");
                }

                Ok(())
            }
        });

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let task = tokio::spawn(async move {
            dispatcher.dispatch().await;
        });
        *self.dispatcher_task.write().await = Some(task);

        self.base.set_state(ChannelState::Running).await;
        info!("telegram channel started");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;

        {
            let guard = self.shutdown_tx.write().await;
            if let Some(tx) = &*guard {
                let _ = tx.send(()).await;
            }
        }

        if let Some(task) = self.dispatcher_task.write().await.take() {
            task.abort();
        }

        self.base.set_state(ChannelState::Stopped).await;
        info!("telegram channel stopped");
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TelegramChannelConfig::new("token123")
            .allow_user(12345)
            .allow_users([67890]);

        assert_eq!(config.token, "token123");
        assert!(config.is_user_allowed(12345));
        assert!(config.is_user_allowed(67890));
        assert!(!config.is_user_allowed(99999));
    }

    #[test]
    fn test_empty_allowlist_allows_all() {
        let config = TelegramChannelConfig::new("token");
        assert!(config.is_user_allowed(12345));
    }

    #[test]
    fn test_split_message() {
        let short = "Hello, world!";
        let chunks = TelegramChannel::split_message(short, 100);
        assert_eq!(chunks.len(), 1);

        let long = "Line 1\nLine 2\nLine 3\nLine 4";
        let chunks = TelegramChannel::split_message(long, 15);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 15));
        assert_eq!(chunks.join("\n"), long);
    }

    #[test]
    fn test_split_preserves_multibyte_chars() {
        let line = "é".repeat(10);
        let chunks = TelegramChannel::split_message(&line, 7);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        assert!(chunks.iter().all(|c| !c.contains('\u{FFFD}')));
        assert_eq!(chunks.concat(), line);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_token() {
        let channel = TelegramChannel::new(TelegramChannelConfig::new(""));
        let bus = MessageBus::new();
        assert!(channel.start(&bus).await.is_err());
    }
}
