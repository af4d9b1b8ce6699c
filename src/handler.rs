//! The message handler loop.
//!
//! Consumes inbound messages from the bus, runs each one through the
//! sender's session and chat handle, and publishes the reply back to the
//! originating channel.

use crate::bus::MessageBus;
use crate::error::StorageError;
use crate::events::{InboundMessage, OutboundMessage};
use crate::session::{Role, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Acknowledgement sent before the AI call starts.
pub const WAIT_REPLY: &str = "Got your question, give me a moment to answer.";

/// Reply sent when the AI call fails.
pub const CHAT_ERROR_REPLY: &str =
    "Something went wrong while talking to the model. Please try again.";

/// Tunables for the handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Message count at which sessions are recycled.
    pub max_messages: usize,
    /// How close to the limit a dialog gets before users are warned.
    pub warn_margin: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_messages: 30,
            warn_margin: 5,
        }
    }
}

impl HandlerConfig {
    fn limit_warning(&self, count: usize) -> String {
        format!(
            "Heads up: this dialog has {count} of {} messages. \
             It will start over once the limit is reached.",
            self.max_messages
        )
    }
}

/// Drives inbound messages through sessions and the AI client.
#[derive(Clone)]
pub struct MessageHandler {
    bus: MessageBus,
    store: Arc<SessionStore>,
    config: HandlerConfig,
    running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MessageHandler {
    /// Create a new handler.
    #[must_use]
    pub fn new(bus: MessageBus, store: Arc<SessionStore>, config: HandlerConfig) -> Self {
        Self {
            bus,
            store,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the handler loop until [`Self::stop`] is called.
    ///
    /// Each message is processed on its own task so one user's slow model
    /// call never delays anyone else; the per-session lock keeps turns
    /// from a single user in order.
    pub async fn run(&self) {
        *self.running.write().await = true;
        info!("message handler started");

        while *self.running.read().await {
            let Some(msg) = self
                .bus
                .consume_inbound_timeout(Duration::from_secs(1))
                .await
            else {
                continue;
            };
            let handler = self.clone();
            tokio::spawn(async move {
                handler.handle_message(msg).await;
            });
        }

        info!("message handler stopped");
    }

    /// Stop the run loop.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Process one inbound message end to end.
    pub async fn handle_message(&self, msg: InboundMessage) {
        let user_id = msg.user_key();
        debug!(user_id = %user_id, chars = msg.content.len(), "handling inbound message");

        let (session, created) = match self.store.get_or_create(&user_id).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to open session");
                self.publish(OutboundMessage::reply_to(&msg, CHAT_ERROR_REPLY))
                    .await;
                return;
            }
        };
        if created {
            info!(user_id = %user_id, "new dialog started");
        }

        let count = match self
            .store
            .append_message(&user_id, Role::User, &msg.content)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to record message");
                return;
            }
        };

        if count >= self.config.max_messages.saturating_sub(self.config.warn_margin) {
            self.publish(OutboundMessage::reply_to(
                &msg,
                self.config.limit_warning(count),
            ))
            .await;
        }

        self.publish(OutboundMessage::reply_to(&msg, WAIT_REPLY)).await;
        self.publish(OutboundMessage::typing_for(&msg)).await;

        // Hold the session lock only for the AI call, so the refresher can
        // still evict other sessions and the store stays responsive.
        let reply = {
            let mut session = session.lock().await;
            session.chat_mut().send(&msg.content).await
        };

        match reply {
            Ok(text) => {
                match self
                    .store
                    .append_message(&user_id, Role::Assistant, &text)
                    .await
                {
                    Ok(_) => {}
                    Err(StorageError::SessionNotFound(_)) => {
                        // Evicted mid-call; the reply still goes out, the
                        // record just misses it.
                        warn!(user_id = %user_id, "session evicted during model call");
                    }
                    Err(e) => {
                        error!(user_id = %user_id, error = %e, "failed to record reply");
                    }
                }
                self.publish(OutboundMessage::reply_to(&msg, text)).await;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "model call failed");
                self.publish(OutboundMessage::reply_to(&msg, CHAT_ERROR_REPLY))
                    .await;
            }
        }
    }

    async fn publish(&self, msg: OutboundMessage) {
        self.bus.publish_outbound(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatClient, ChatHandle, EchoClient};
    use crate::error::{ChatError, ChatResult};
    use crate::events::OutboundKind;
    use async_trait::async_trait;

    struct FailingClient;

    impl ChatClient for FailingClient {
        fn start_chat(&self, model_id: &str) -> ChatResult<Box<dyn ChatHandle>> {
            Ok(Box::new(FailingChat {
                model_id: model_id.to_string(),
            }))
        }
    }

    struct FailingChat {
        model_id: String,
    }

    #[async_trait]
    impl ChatHandle for FailingChat {
        async fn send(&mut self, _text: &str) -> ChatResult<String> {
            Err(ChatError::api("backend down"))
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    fn handler_with(client: Arc<dyn ChatClient>, config: HandlerConfig) -> MessageHandler {
        let bus = MessageBus::new();
        let store = Arc::new(SessionStore::new(client, "test-model"));
        MessageHandler::new(bus, store, config)
    }

    async fn collect(
        rx: &mut tokio::sync::mpsc::Receiver<OutboundMessage>,
    ) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_happy_path_replies() {
        let handler = handler_with(Arc::new(EchoClient::new()), HandlerConfig::default());
        let mut rx = handler.bus.subscribe_channel("cli").await;

        handler.handle_message(InboundMessage::cli("hello")).await;
        let out = collect(&mut rx).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].content, WAIT_REPLY);
        assert_eq!(out[1].kind, OutboundKind::Typing);
        assert!(out[2].content.contains("hello"));

        // Both sides of the turn are in the session.
        let record = handler.store.evict("cli:user").await.unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0].role, Role::User);
        assert_eq!(record.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_chat_failure_reports_and_keeps_session() {
        let handler = handler_with(Arc::new(FailingClient), HandlerConfig::default());
        let mut rx = handler.bus.subscribe_channel("cli").await;

        handler.handle_message(InboundMessage::cli("hello")).await;
        let out = collect(&mut rx).await;

        assert_eq!(out.last().unwrap().content, CHAT_ERROR_REPLY);

        // The user message was recorded; no assistant message was.
        let record = handler.store.evict("cli:user").await.unwrap();
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_limit_warning_near_capacity() {
        let config = HandlerConfig {
            max_messages: 6,
            warn_margin: 2,
        };
        let handler = handler_with(Arc::new(EchoClient::new()), config);
        let mut rx = handler.bus.subscribe_channel("cli").await;

        // Turn 1: 2 messages after the reply, no warning yet.
        handler.handle_message(InboundMessage::cli("one")).await;
        let out = collect(&mut rx).await;
        assert!(!out.iter().any(|m| m.content.contains("Heads up")));

        // Turn 2: the user message is the 3rd message in the dialog.
        // Threshold is 6 - 2 = 4, still quiet.
        handler.handle_message(InboundMessage::cli("two")).await;
        let out = collect(&mut rx).await;
        assert!(!out.iter().any(|m| m.content.contains("Heads up")));

        // Turn 3: the user message is the 5th, past the threshold.
        handler.handle_message(InboundMessage::cli("three")).await;
        let out = collect(&mut rx).await;
        assert!(out.iter().any(|m| m.content.contains("Heads up")));
    }

    struct SleepyClient {
        delay: Duration,
    }

    impl ChatClient for SleepyClient {
        fn start_chat(&self, model_id: &str) -> ChatResult<Box<dyn ChatHandle>> {
            Ok(Box::new(SleepyChat {
                model_id: model_id.to_string(),
                delay: self.delay,
            }))
        }
    }

    struct SleepyChat {
        model_id: String,
        delay: Duration,
    }

    #[async_trait]
    impl ChatHandle for SleepyChat {
        async fn send(&mut self, text: &str) -> ChatResult<String> {
            if text.contains("slow") {
                tokio::time::sleep(self.delay).await;
            }
            Ok(format!("done: {text}"))
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    #[tokio::test]
    async fn test_slow_user_does_not_block_others() {
        let handler = Arc::new(handler_with(
            Arc::new(SleepyClient {
                delay: Duration::from_secs(2),
            }),
            HandlerConfig::default(),
        ));
        let mut rx = handler.bus.subscribe_channel("cli").await;

        let loop_handle = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.run().await })
        };

        handler
            .bus
            .publish_inbound(InboundMessage::new("cli", "alice", "a", "slow question"))
            .await
            .unwrap();
        handler
            .bus
            .publish_inbound(InboundMessage::new("cli", "bob", "b", "quick question"))
            .await
            .unwrap();

        // Bob's answer must land while alice's model call is still asleep.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut bob_answered = false;
        while tokio::time::Instant::now() < deadline {
            let Ok(Some(msg)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            else {
                continue;
            };
            if msg.kind == OutboundKind::Text && msg.chat_id == "b" && msg.content.contains("done")
            {
                bob_answered = true;
                break;
            }
        }
        assert!(bob_answered, "bob's reply was held up behind alice's");

        handler.stop().await;
        tokio::time::timeout(Duration::from_secs(3), loop_handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_stops() {
        let handler = Arc::new(handler_with(
            Arc::new(EchoClient::new()),
            HandlerConfig::default(),
        ));

        let loop_handle = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.run().await })
        };

        // Give the loop time to start, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handler.stop().await;

        tokio::time::timeout(Duration::from_secs(3), loop_handle)
            .await
            .unwrap()
            .unwrap();
    }
}
