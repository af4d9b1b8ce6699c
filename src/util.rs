//! Shared utilities: timestamps, identifiers, and well-known directories.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Timestamp layout used in persisted records: UTC with microseconds and no
/// timezone suffix (`2024-01-31 14:05:09.123456`).
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Serde adapter for [`RECORD_TIMESTAMP_FORMAT`] timestamps.
pub mod record_timestamp {
    use super::RECORD_TIMESTAMP_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a UTC timestamp as a formatted string.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(RECORD_TIMESTAMP_FORMAT).to_string())
    }

    /// Deserialize a UTC timestamp from a formatted string.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, RECORD_TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// File name for a fresh data file, derived from the given instant
/// (`messages_2024-01-31_14-05-09.json`).
#[must_use]
pub fn data_file_name(ts: &DateTime<Utc>) -> String {
    format!("messages_{}.json", ts.format("%Y-%m-%d_%H-%M-%S"))
}

/// Generate a process-unique message ID.
#[must_use]
pub fn generate_message_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{seq}", Utc::now().timestamp_millis())
}

/// The user's home directory, falling back to the current directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// The bot's configuration directory (`~/.dialog-bot`).
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(".dialog-bot")
}

/// Default directory for persisted dialog data (`~/.dialog-bot/messages`).
#[must_use]
pub fn data_dir() -> PathBuf {
    config_dir().join("messages")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Stamp {
        #[serde(with = "record_timestamp")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_record_timestamp_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 31, 14, 5, 9).unwrap()
            + chrono::Duration::microseconds(123_456);

        let json = serde_json::to_string(&Stamp { at: ts }).unwrap();
        assert_eq!(json, r#"{"at":"2024-01-31 14:05:09.123456"}"#);

        let parsed: Stamp = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.at, ts);
    }

    #[test]
    fn test_record_timestamp_rejects_garbage() {
        let err = serde_json::from_str::<Stamp>(r#"{"at":"yesterday"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_data_file_name() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 31, 14, 5, 9).unwrap();
        assert_eq!(data_file_name(&ts), "messages_2024-01-31_14-05-09.json");
    }

    #[test]
    fn test_message_id_uniqueness() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
    }
}
