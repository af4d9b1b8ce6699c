//! Configuration loading and validation.
//!
//! Config lives at `~/.dialog-bot/config.json`. Every field has a default
//! so a partial file works; the Telegram token can also come from the
//! `TELEGRAM_BOT_TOKEN` environment variable.

use crate::error::{ConfigError, ConfigResult};
use crate::util;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Channel transports.
    pub channels: ChannelsConfig,
    /// AI client settings.
    pub chat: ChatConfig,
    /// Session lifecycle limits.
    pub session: SessionLimits,
    /// Dialog persistence settings.
    pub persistence: PersistenceConfig,
}

/// Per-channel transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Telegram settings.
    pub telegram: TelegramConfig,
}

/// Telegram channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Whether the Telegram channel starts with the bot.
    pub enabled: bool,
    /// Bot API token. Falls back to `TELEGRAM_BOT_TOKEN`.
    pub token: Option<String>,
    /// User IDs allowed to talk to the bot. Empty means everyone.
    pub allow_from: Vec<String>,
}

impl TelegramConfig {
    /// Resolve the bot token from config or environment.
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|t| !t.is_empty()))
    }
}

/// AI client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Model new sessions start with.
    pub default_model: String,
    /// Models users may switch to.
    pub models: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: "gemini-1.5-flash".to_string(),
            models: vec![
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
        }
    }
}

/// Session lifecycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Minutes of inactivity before a session is recycled.
    pub timeout_minutes: u64,
    /// Message count above which a session is recycled.
    pub max_messages: usize,
    /// Seconds between maintenance scans.
    pub refresh_tick_seconds: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            timeout_minutes: 15,
            max_messages: 30,
            refresh_tick_seconds: 30,
        }
    }
}

impl SessionLimits {
    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Scan interval as a [`Duration`].
    #[must_use]
    pub const fn refresh_tick(&self) -> Duration {
        Duration::from_secs(self.refresh_tick_seconds)
    }
}

/// Dialog persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory for data files. Defaults to `~/.dialog-bot/messages`.
    pub data_dir: Option<PathBuf>,
    /// Seconds between writes while records are queued.
    pub writer_cadence_seconds: u64,
    /// Seconds to back off after a failed write.
    pub error_backoff_seconds: u64,
    /// Write attempts per record before it is dropped.
    pub max_write_retries: u32,
    /// Data file size limit in megabytes before rotation.
    pub max_file_size_mb: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            writer_cadence_seconds: 60,
            error_backoff_seconds: 60,
            max_write_retries: 3,
            max_file_size_mb: 15,
        }
    }
}

impl PersistenceConfig {
    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(util::data_dir)
    }

    /// Write cadence as a [`Duration`].
    #[must_use]
    pub const fn cadence(&self) -> Duration {
        Duration::from_secs(self.writer_cadence_seconds)
    }

    /// Error backoff as a [`Duration`].
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    /// Rotation limit in bytes.
    #[must_use]
    pub const fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl BotConfig {
    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chat.default_model.is_empty() {
            return Err(ConfigError::Missing("chat.default_model".to_string()));
        }
        if !self.chat.models.is_empty() && !self.chat.models.contains(&self.chat.default_model) {
            return Err(ConfigError::Invalid(format!(
                "chat.default_model {:?} is not in chat.models",
                self.chat.default_model
            )));
        }
        if self.session.max_messages == 0 {
            return Err(ConfigError::Invalid(
                "session.max_messages must be at least 1".to_string(),
            ));
        }
        if self.session.refresh_tick_seconds == 0 {
            return Err(ConfigError::Invalid(
                "session.refresh_tick_seconds must be at least 1".to_string(),
            ));
        }
        if self.persistence.max_file_size_mb == 0 {
            return Err(ConfigError::Invalid(
                "persistence.max_file_size_mb must be at least 1".to_string(),
            ));
        }
        if self.channels.telegram.enabled && self.channels.telegram.resolve_token().is_none() {
            return Err(ConfigError::Missing(
                "channels.telegram.token (or TELEGRAM_BOT_TOKEN)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config file path (`~/.dialog-bot/config.json`).
#[must_use]
pub fn config_path() -> PathBuf {
    util::config_dir().join("config.json")
}

/// Load configuration from `path`, or defaults when the file is absent.
pub async fn load_config(path: &std::path::Path) -> ConfigResult<BotConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let config: BotConfig = serde_json::from_str(&raw)?;
            debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(BotConfig::default())
        }
        Err(e) => Err(ConfigError::Io(e)),
    }
}

/// Write configuration to `path`, creating parent directories.
pub async fn save_config(path: &std::path::Path, config: &BotConfig) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, json).await?;
    info!(path = %path.display(), "configuration saved");
    Ok(())
}

/// Create a default config file. Refuses to overwrite unless `force` is set.
pub async fn init_config(path: &std::path::Path, force: bool) -> ConfigResult<()> {
    if path.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    save_config(path, &BotConfig::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = BotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.session.timeout(), Duration::from_secs(900));
        assert_eq!(config.persistence.max_file_bytes(), 15 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let raw = r#"{"session": {"max_messages": 50}}"#;
        let config: BotConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.session.max_messages, 50);
        assert_eq!(config.session.timeout_minutes, 15);
        assert_eq!(config.chat.default_model, "gemini-1.5-flash");
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = BotConfig::default();
        config.session.max_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unlisted_default_model() {
        let mut config = BotConfig::default();
        config.chat.default_model = "gemini-9000".to_string();
        assert!(config.validate().is_err());

        // An empty model list places no restriction on the default.
        config.chat.models.clear();
        config.validate().unwrap();
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("config.json")).await.unwrap();
        assert_eq!(config.session.max_messages, 30);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = BotConfig::default();
        config.chat.default_model = "gemini-1.5-pro".to_string();
        save_config(&path, &config).await.unwrap();

        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded.chat.default_model, "gemini-1.5-pro");
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        init_config(&path, false).await.unwrap();
        assert!(init_config(&path, false).await.is_err());
        init_config(&path, true).await.unwrap();
    }
}
