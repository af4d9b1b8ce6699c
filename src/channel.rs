//! The transport seam.
//!
//! A channel owns its platform connection and two jobs: publish inbound
//! user text onto the bus, and deliver outbound replies and typing
//! indicators from its bus subscription. Everything else (who answers, how
//! sessions work) is invisible to it.

use crate::bus::MessageBus;
use crate::error::ChannelResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Not started.
    #[default]
    Stopped,
    /// Connecting to the platform.
    Starting,
    /// Connected and forwarding traffic.
    Running,
    /// Shutting down.
    Stopping,
}

/// A channel's name and lifecycle state.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: String,
    /// Current lifecycle state.
    pub state: ChannelState,
}

/// A message transport.
///
/// `start` connects to the platform, subscribes to
/// `bus.subscribe_channel(self.name())`, and spawns whatever input/output
/// tasks the platform needs; `stop` tears them down.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name, also the routing key for outbound messages.
    fn name(&self) -> &str;

    /// Connect and begin forwarding traffic.
    async fn start(&self, bus: &MessageBus) -> ChannelResult<()>;

    /// Disconnect and stop background tasks.
    async fn stop(&self) -> ChannelResult<()>;

    /// Current status.
    async fn status(&self) -> ChannelStatus;

    /// Whether the channel is currently forwarding traffic.
    async fn is_running(&self) -> bool {
        self.status().await.state == ChannelState::Running
    }
}

/// Starts and stops a set of channels as a group.
pub struct ChannelManager {
    channels: RwLock<Vec<Arc<dyn Channel>>>,
    bus: MessageBus,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager").finish_non_exhaustive()
    }
}

impl ChannelManager {
    /// Create a manager over the given bus.
    #[must_use]
    pub fn new(bus: MessageBus) -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Add a channel to the group.
    pub async fn register(&self, channel: impl Channel + 'static) {
        let channel: Arc<dyn Channel> = Arc::new(channel);
        info!(channel = %channel.name(), "channel registered");
        self.channels.write().await.push(channel);
    }

    /// Start every registered channel, collecting per-channel results.
    pub async fn start_all(&self) -> Vec<ChannelResult<()>> {
        let channels = self.channels.read().await;
        let mut results = Vec::with_capacity(channels.len());

        for channel in channels.iter() {
            let result = channel.start(&self.bus).await;
            match &result {
                Ok(()) => info!(channel = %channel.name(), "channel started"),
                Err(e) => error!(channel = %channel.name(), error = %e, "channel failed to start"),
            }
            results.push(result);
        }
        results
    }

    /// Stop every registered channel.
    pub async fn stop_all(&self) -> Vec<ChannelResult<()>> {
        let channels = self.channels.read().await;
        let mut results = Vec::with_capacity(channels.len());

        for channel in channels.iter() {
            let result = channel.stop().await;
            if let Err(e) = &result {
                error!(channel = %channel.name(), error = %e, "channel failed to stop");
            }
            results.push(result);
        }
        results
    }

    /// Status of every registered channel.
    pub async fn status_all(&self) -> Vec<ChannelStatus> {
        let channels = self.channels.read().await;
        let mut statuses = Vec::with_capacity(channels.len());
        for channel in channels.iter() {
            statuses.push(channel.status().await);
        }
        statuses
    }

    /// The bus channels are wired to.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }
}

/// Name and state bookkeeping shared by channel implementations.
#[derive(Debug)]
pub struct ChannelBase {
    name: String,
    state: RwLock<ChannelState>,
}

impl ChannelBase {
    /// Create bookkeeping for a channel called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ChannelState::default()),
        }
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Move to a new lifecycle state.
    pub async fn set_state(&self, state: ChannelState) {
        debug!(channel = %self.name, ?state, "channel state change");
        *self.state.write().await = state;
    }

    /// Status snapshot for the [`Channel::status`] implementation.
    pub async fn status(&self) -> ChannelStatus {
        ChannelStatus {
            name: self.name.clone(),
            state: *self.state.read().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_base_tracks_state() {
        let base = ChannelBase::new("test");
        assert_eq!(base.name(), "test");
        assert_eq!(base.state().await, ChannelState::Stopped);

        base.set_state(ChannelState::Running).await;
        let status = base.status().await;
        assert_eq!(status.name, "test");
        assert_eq!(status.state, ChannelState::Running);
    }

    struct NullChannel {
        base: ChannelBase,
    }

    #[async_trait]
    impl Channel for NullChannel {
        fn name(&self) -> &str {
            self.base.name()
        }

        async fn start(&self, _bus: &MessageBus) -> ChannelResult<()> {
            self.base.set_state(ChannelState::Running).await;
            Ok(())
        }

        async fn stop(&self) -> ChannelResult<()> {
            self.base.set_state(ChannelState::Stopped).await;
            Ok(())
        }

        async fn status(&self) -> ChannelStatus {
            self.base.status().await
        }
    }

    #[tokio::test]
    async fn test_manager_runs_group_lifecycle() {
        let manager = ChannelManager::new(MessageBus::new());
        manager
            .register(NullChannel {
                base: ChannelBase::new("null"),
            })
            .await;

        let results = manager.start_all().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(manager.status_all().await[0].state, ChannelState::Running);

        manager.stop_all().await;
        assert_eq!(manager.status_all().await[0].state, ChannelState::Stopped);
    }
}
