//! Engine configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is a valid
//! configuration.

use crate::logging::{default_log_level, is_supported_level};
use crate::sync::channel::TopicLayout;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONSUMER_GROUP: &str = "custsync";
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read config: {err}"),
            Self::Parse(err) => write!(f, "cannot parse config: {err}"),
            Self::Invalid(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Consumer group shared by the dispatcher and reconciliation.
    pub consumer_group: String,
    pub topics: TopicLayout,
    pub poll_timeout_ms: u64,
    pub reconcile_interval_secs: u64,
    pub publish_timeout_ms: u64,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            topics: TopicLayout::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            log_level: default_log_level().to_string(),
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_group.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "consumer_group must not be empty".to_string(),
            ));
        }
        self.topics.validate().map_err(ConfigError::Invalid)?;

        for (name, value) in [
            ("poll_timeout_ms", self.poll_timeout_ms),
            ("reconcile_interval_secs", self.reconcile_interval_secs),
            ("publish_timeout_ms", self.publish_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        if !is_supported_level(&self.log_level) {
            return Err(ConfigError::Invalid(format!(
                "unsupported log_level `{}`",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SyncConfig};
    use crate::sync::channel::TopicLayout;
    use std::time::Duration;

    #[test]
    fn empty_object_yields_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config.consumer_group, "custsync");
        assert_eq!(config.topics, TopicLayout::default());
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(10));
        assert_eq!(config.publish_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn single_topic_layout_parses() {
        let config = SyncConfig::from_json_str(
            r#"{"topics": {"layout": "single", "topic": "customers"}, "log_level": "warn"}"#,
        )
        .unwrap();
        assert_eq!(
            config.topics,
            TopicLayout::Single {
                topic: "customers".to_string()
            }
        );
    }

    #[test]
    fn identical_per_direction_topics_are_rejected() {
        let err = SyncConfig::from_json_str(
            r#"{"topics": {"layout": "per_direction", "to_remote": "sync", "to_local": "sync"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let err = SyncConfig::from_json_str(r#"{"poll_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref reason) if reason.contains("poll_timeout_ms")));
    }

    #[test]
    fn unparseable_json_is_a_parse_error() {
        let err = SyncConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_consumer_group_is_rejected() {
        let err = SyncConfig::from_json_str(r#"{"consumer_group": "  "}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
