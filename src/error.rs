//! Unified error types for dialog-bot.
//!
//! Each module has its own error enum; all of them convert into the main
//! [`BotError`] type used at the application boundary.

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for dialog-bot operations.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Message bus error.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Channel error.
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// Chat client error.
    #[error("chat: {0}")]
    Chat(#[from] ChatError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Session/storage error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

/// Result type alias for dialog-bot operations.
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// Message Bus Errors
// ============================================================================

/// Error type for message bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Failed to send inbound message.
    #[error("inbound channel closed")]
    InboundClosed,
}

/// Result type for message bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

// ============================================================================
// Channel Errors
// ============================================================================

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to deliver a message to the platform.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Configuration error.
    #[error("config: {0}")]
    Config(String),
}

impl ChannelError {
    /// Create a send failed error.
    #[inline]
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

// ============================================================================
// Chat Client Errors
// ============================================================================

/// Error type for conversational AI client operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The API rejected the request or returned an error body.
    #[error("api error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api {
        /// HTTP status code, if the failure came with one.
        status: Option<u16>,
        /// Error message from the API.
        message: String,
    },

    /// Transport-level HTTP failure.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered without any usable content.
    #[error("empty response from model {0}")]
    EmptyResponse(String),

    /// Client is missing credentials.
    #[error("missing API key: {0}")]
    MissingKey(String),
}

impl ChatError {
    /// Create an API error without a status code.
    #[inline]
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: msg.into(),
        }
    }
}

/// Result type for chat client operations.
pub type ChatResult<T> = std::result::Result<T, ChatError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Missing required field.
    #[error("missing: {0}")]
    Missing(String),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for session store and persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// No session exists for the given user key.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Creating a chat handle for a new or re-modeled session failed.
    #[error("chat handle: {0}")]
    Handle(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let bus_err = BusError::InboundClosed;
        let bot_err: BotError = bus_err.into();
        assert!(matches!(bot_err, BotError::Bus(_)));

        let storage_err = StorageError::SessionNotFound("telegram:1".into());
        let bot_err: BotError = storage_err.into();
        assert!(matches!(bot_err, BotError::Storage(_)));
    }

    #[test]
    fn test_error_helpers() {
        let err = BotError::config("invalid value");
        assert!(matches!(err, BotError::Config(_)));

        let err = ChannelError::send("socket closed");
        assert!(matches!(err, ChannelError::SendFailed(_)));
    }

    #[test]
    fn test_api_error_display() {
        let err = ChatError::Api {
            status: Some(429),
            message: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "api error (429): rate limited");

        let err = ChatError::api("bad request");
        assert_eq!(err.to_string(), "api error: bad request");
    }
}
