//! Command-line channel.
//!
//! Reads lines from stdin, publishes them as inbound messages, and prints
//! replies to stdout. Mainly used for local runs and debugging without any
//! messenger credentials.

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::ChannelResult;
use crate::events::{InboundMessage, OutboundKind, OutboundMessage};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// Command-line channel.
#[derive(Debug)]
pub struct CliChannel {
    base: ChannelBase,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl CliChannel {
    /// Create a new CLI channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: ChannelBase::new("cli"),
            shutdown_tx: RwLock::new(None),
        }
    }

    #[allow(clippy::print_stdout)] // CLI channel intentionally prints to stdout
    fn print_message(msg: &OutboundMessage) {
        match msg.kind {
            OutboundKind::Text => println!("\n{}\n", msg.content),
            // A terminal has no typing indicator worth rendering.
            OutboundKind::Typing => debug!("model is thinking"),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Starting).await;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let mut outbound_rx = bus.subscribe_channel("cli").await;
        let inbound = bus.inbound_handle();

        // Output task: render replies until shutdown.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => {
                        Self::print_message(&msg);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("cli output task shutting down");
                        break;
                    }
                }
            }
        });

        // Input task: forward stdin lines to the bus. The task ends on EOF
        // or when the bus closes; no shutdown signal is needed because
        // reading stdin holds no resources worth reclaiming early.
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if inbound.publish(InboundMessage::cli(trimmed)).await.is_err() {
                    break;
                }
            }
            debug!("cli input task finished");
        });

        self.base.set_state(ChannelState::Running).await;
        info!("cli channel started");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;

        let guard = self.shutdown_tx.write().await;
        if let Some(tx) = &*guard {
            let _ = tx.send(()).await;
        }
        drop(guard);

        self.base.set_state(ChannelState::Stopped).await;
        info!("cli channel stopped");
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cli_channel_lifecycle() {
        let channel = CliChannel::new();
        let bus = MessageBus::new();

        channel.start(&bus).await.unwrap();
        assert!(channel.is_running().await);

        channel.stop().await.unwrap();
        let status = channel.status().await;
        assert_eq!(status.state, ChannelState::Stopped);
    }
}
