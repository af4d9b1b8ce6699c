//! Gateway service for running the complete bot.
//!
//! The gateway wires together the message bus, channels, session store,
//! dialog refresher, persistence writer, and message handler, and owns the
//! shutdown sequence that flushes every live dialog to disk.

use crate::bus::MessageBus;
use crate::channel::ChannelManager;
use crate::channels::CliChannel;
use crate::chat::ChatClient;
use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::handler::{HandlerConfig, MessageHandler};
use crate::persist::{PersistWriter, RotatingFileSink, WriterConfig, persist_queue};
use crate::session::{DialogRefresher, RefresherConfig, SessionStore};

#[cfg(feature = "telegram")]
use crate::channels::{TelegramChannel, telegram::TelegramChannelConfig};

use std::sync::Arc;
use tracing::{error, info};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bot configuration.
    pub bot: BotConfig,
    /// Whether to enable the CLI channel.
    pub enable_cli: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            enable_cli: true,
        }
    }
}

/// Gateway service that runs the complete bot.
pub struct Gateway {
    config: GatewayConfig,
    bus: MessageBus,
    channels: ChannelManager,
    store: Arc<SessionStore>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway with the given AI client and configuration.
    #[must_use]
    pub fn with_config(client: Arc<dyn ChatClient>, config: GatewayConfig) -> Self {
        let bus = MessageBus::new();
        let store = Arc::new(SessionStore::new(
            client,
            config.bot.chat.default_model.clone(),
        ));

        Self {
            channels: ChannelManager::new(bus.clone()),
            bus,
            store,
            config,
        }
    }

    /// Get a reference to the message bus.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Get a reference to the session store.
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Register channels based on configuration.
    async fn setup_channels(&self) -> Result<()> {
        if self.config.enable_cli {
            self.channels.register(CliChannel::new()).await;
            info!("cli channel enabled");
        }

        #[cfg(feature = "telegram")]
        if self.config.bot.channels.telegram.enabled {
            if let Some(token) = self.config.bot.channels.telegram.resolve_token() {
                let mut tg_config = TelegramChannelConfig::new(token);
                for user_id in &self.config.bot.channels.telegram.allow_from {
                    if let Ok(user_id) = user_id.parse::<i64>() {
                        tg_config = tg_config.allow_user(user_id);
                    }
                }
                self.channels.register(TelegramChannel::new(tg_config)).await;
                info!("telegram channel enabled");
            } else {
                return Err(BotError::config("telegram enabled but no token configured"));
            }
        }

        Ok(())
    }

    /// Run the gateway until Ctrl+C.
    ///
    /// On shutdown the handler stops first, then channels, then the
    /// refresher flushes every live session to the persistence queue and
    /// the writer drains that queue before the call returns.
    pub async fn run(&self) -> Result<()> {
        info!("gateway starting");

        self.setup_channels().await?;
        for result in self.channels.start_all().await {
            if let Err(e) = result {
                error!(error = %e, "failed to start channel");
            }
        }

        let session_limits = &self.config.bot.session;
        let persistence = &self.config.bot.persistence;

        let (queue, queue_rx) = persist_queue();
        let sink = RotatingFileSink::new(persistence.data_dir(), persistence.max_file_bytes());
        let writer = PersistWriter::new(
            queue_rx,
            sink,
            WriterConfig {
                cadence: persistence.cadence(),
                error_backoff: persistence.error_backoff(),
                max_retries: persistence.max_write_retries,
            },
        )
        .start();

        let refresher = DialogRefresher::new(
            Arc::clone(&self.store),
            queue,
            RefresherConfig {
                tick: session_limits.refresh_tick(),
                session_timeout: session_limits.timeout(),
                max_messages: session_limits.max_messages,
            },
        )
        .start();

        let handler = MessageHandler::new(
            self.bus.clone(),
            Arc::clone(&self.store),
            HandlerConfig {
                max_messages: session_limits.max_messages,
                ..HandlerConfig::default()
            },
        );

        info!("gateway started, press Ctrl+C to stop");

        tokio::select! {
            () = handler.run() => {
                info!("handler loop ended");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received");
                handler.stop().await;
            }
        }

        info!("gateway stopping");
        self.channels.stop_all().await;
        // Flush live sessions into the queue, then drain the queue to disk.
        refresher.stop().await;
        writer.stop().await;

        info!("gateway stopped");
        Ok(())
    }

    /// Current gateway status.
    pub async fn status(&self) -> GatewayStatus {
        let bus_stats = self.bus.stats();
        GatewayStatus {
            active_sessions: self.store.len().await,
            channels: self
                .channels
                .status_all()
                .await
                .into_iter()
                .map(|s| ChannelStatusInfo {
                    name: s.name,
                    state: format!("{:?}", s.state),
                })
                .collect(),
            total_inbound: bus_stats.inbound_count,
            total_outbound: bus_stats.outbound_count,
        }
    }
}

/// Gateway status information.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStatus {
    /// Number of live sessions.
    pub active_sessions: usize,
    /// Channel statuses.
    pub channels: Vec<ChannelStatusInfo>,
    /// Total inbound messages processed.
    pub total_inbound: u64,
    /// Total outbound messages processed.
    pub total_outbound: u64,
}

/// Channel status info for gateway status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelStatusInfo {
    /// Channel name.
    pub name: String,
    /// Channel state.
    pub state: String,
}

/// Builder for creating a [`Gateway`].
pub struct GatewayBuilder {
    client: Option<Arc<dyn ChatClient>>,
    config: GatewayConfig,
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            config: GatewayConfig::default(),
        }
    }

    /// Set the AI client.
    #[must_use]
    pub fn client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the bot configuration.
    #[must_use]
    pub fn bot_config(mut self, config: BotConfig) -> Self {
        self.config.bot = config;
        self
    }

    /// Enable or disable the CLI channel.
    #[must_use]
    pub const fn enable_cli(mut self, enable: bool) -> Self {
        self.config.enable_cli = enable;
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<Gateway> {
        let client = self
            .client
            .ok_or_else(|| BotError::config("gateway needs an AI client"))?;
        Ok(Gateway::with_config(client, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::EchoClient;

    #[tokio::test]
    async fn test_builder_requires_client() {
        assert!(GatewayBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_status_starts_empty() {
        let gateway = GatewayBuilder::new()
            .client(Arc::new(EchoClient::new()))
            .enable_cli(false)
            .build()
            .unwrap();

        let status = gateway.status().await;
        assert_eq!(status.active_sessions, 0);
        assert!(status.channels.is_empty());
        assert_eq!(status.total_inbound, 0);
    }
}
