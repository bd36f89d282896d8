//! Replication configuration.

use std::path::Path;
use std::time::Duration;

use netsync_component::AssetId;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default listen address on the loopback transport.
pub const DEFAULT_LISTEN_ADDRESS: &str = "loopback://netsync";

/// Settings shared by the server and its clients.
///
/// Durations are written as milliseconds in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Target ticks per second of the driving loop.
    pub tick_rate: f64,
    /// Default minimum time between two delta sends of a component.
    #[serde(with = "millis")]
    pub send_interval: Duration,
    /// Upper bound on transport events handled in one tick.
    pub max_events_per_tick: usize,
    /// Listener connection limit.
    pub max_connections: usize,
    /// How often clients measure round-trip time.
    #[serde(with = "millis")]
    pub ping_interval: Duration,
    /// Destroy a connection's player object when it disconnects.
    pub destroy_player_on_disconnect: bool,
    /// Template spawned for `AddPlayer`.
    pub player_asset: Option<AssetId>,
    pub listen_address: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30.0,
            send_interval: Duration::from_millis(100),
            max_events_per_tick: 1024,
            max_connections: 64,
            ping_interval: Duration::from_secs(2),
            destroy_player_on_disconnect: true,
            player_asset: None,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}

impl ReplicationConfig {
    /// Parse a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O, parse or validation error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be positive, got {}",
                self.tick_rate
            )));
        }
        if self.max_events_per_tick == 0 {
            return Err(ConfigError::Invalid("max_events_per_tick must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }
        Ok(())
    }

    /// Duration of one tick.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate)
    }

    #[must_use]
    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_player_asset(mut self, asset: AssetId) -> Self {
        self.player_asset = Some(asset);
        self
    }

    #[must_use]
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    #[must_use]
    pub fn with_destroy_player_on_disconnect(mut self, destroy: bool) -> Self {
        self.destroy_player_on_disconnect = destroy;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.send_interval, Duration::from_millis(100));
        assert!(config.destroy_player_on_disconnect);
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ReplicationConfig::from_json(
            r#"{ "send_interval": 50, "max_connections": 8,
                 "player_asset": "6f0c4a8e-1d2b-4c3a-9e5f-7a8b9c0d1e2f" }"#,
        )
        .unwrap();
        assert_eq!(config.send_interval, Duration::from_millis(50));
        assert_eq!(config.max_connections, 8);
        assert!(config.player_asset.is_some());
        assert_eq!(config.ping_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ReplicationConfig::default().with_listen_address("loopback://test");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"send_interval\":100"));
        assert_eq!(ReplicationConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            ReplicationConfig::from_json(r#"{ "tick_rate": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ReplicationConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
