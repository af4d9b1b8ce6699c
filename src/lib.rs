//! Dialog Bot - a per-user conversational session manager.
//!
//! This crate sits between message transports and an AI chat backend. Each
//! user gets an isolated dialog session that is recycled when it goes idle
//! or grows too long; recycled dialogs are persisted to size-rotated JSON
//! files by a background writer.
//!
//! # Architecture
//!
//! - **Message Bus** ([`bus`]) - async pub-sub between channels and the handler
//! - **Channels** ([`channels`]) - transports (CLI, Telegram)
//! - **Handler** ([`handler`]) - drives messages through sessions and the model
//! - **Session** ([`session`]) - per-user dialog state and the refresher task
//! - **Persist** ([`persist`]) - queue, writer, and rotating data files
//! - **Gateway** ([`gateway`]) - wires everything together
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dialog_bot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Arc::new(GeminiClient::from_env()?);
//!     let gateway = GatewayBuilder::new().client(client).build()?;
//!     gateway.run().await
//! }
//! ```
//!
//! # Features
//!
//! - `telegram` - Telegram transport via teloxide (enabled by default)

pub mod bus;
pub mod channel;
pub mod channels;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handler;
pub mod persist;
pub mod session;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        BotError, BusError, BusResult, ChannelError, ChannelResult, ChatError, ChatResult,
        ConfigError, ConfigResult, Result, StorageError, StorageResult,
    };

    pub use crate::bus::{BusStats, InboundHandle, MessageBus};

    pub use crate::channel::{Channel, ChannelBase, ChannelManager, ChannelState, ChannelStatus};
    pub use crate::channels::CliChannel;
    #[cfg(feature = "telegram")]
    pub use crate::channels::{TelegramChannel, telegram::TelegramChannelConfig};

    pub use crate::chat::{ChatClient, ChatHandle, EchoClient, GeminiClient};

    pub use crate::config::{
        BotConfig, ChatConfig, PersistenceConfig, SessionLimits, TelegramConfig, config_path,
        init_config, load_config, save_config,
    };

    pub use crate::events::{InboundMessage, OutboundKind, OutboundMessage};

    pub use crate::gateway::{Gateway, GatewayBuilder, GatewayConfig, GatewayStatus};

    pub use crate::handler::{HandlerConfig, MessageHandler};

    pub use crate::persist::{
        PersistQueue, PersistWriter, RotatingFileSink, WriterConfig, persist_queue,
    };

    pub use crate::session::{
        ChatMessage, DialogRefresher, EvictReason, RefresherConfig, Role, SessionRecord,
        SessionStore,
    };

    pub use crate::util::{config_dir, data_dir, generate_message_id, home_dir};
}
