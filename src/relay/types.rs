//! Relay types and configuration

use crate::block::{Cid, PeerId};
use crate::network::NetworkError;
use crate::session::{SessionError, SessionOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay-specific errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay coordinator is shut down")]
    ShutDown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Upstream session error: {0}")]
    Session(#[from] SessionError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for a relay coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Identifier of this relay node
    pub node_id: String,

    /// Hop budget for relayed wants. The upstream session is created with
    /// one hop less.
    pub ttl: u8,

    /// Retries after a failed forward before the peer's interest is retired
    pub max_forward_retries: u32,

    /// First delay before retrying a failed forward
    pub retry_initial_interval: Duration,

    /// Upper bound for the retry delay
    pub retry_max_interval: Duration,

    /// How often the background maintenance task runs
    pub maintenance_interval: Duration,

    /// Tear the upstream session down after this long without interest
    /// (None keeps it for the coordinator's lifetime)
    pub idle_timeout: Option<Duration>,

    /// Capacity of the channel carrying upstream blocks to the arrival task
    pub block_channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            ttl: 1,
            max_forward_retries: 5,
            retry_initial_interval: Duration::from_millis(100),
            retry_max_interval: Duration::from_secs(5),
            maintenance_interval: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(30)),
            block_channel_capacity: 256,
        }
    }
}

impl RelayConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json_str(json: &str) -> RelayResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RelayResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.ttl == 0 {
            return Err(RelayError::InvalidConfig(
                "ttl must be at least 1 to relay wants".into(),
            ));
        }
        if self.block_channel_capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "block_channel_capacity must be non-zero".into(),
            ));
        }
        if self.retry_initial_interval > self.retry_max_interval {
            return Err(RelayError::InvalidConfig(format!(
                "retry_initial_interval {:?} exceeds retry_max_interval {:?}",
                self.retry_initial_interval, self.retry_max_interval
            )));
        }
        Ok(())
    }

    /// Options for the upstream session this relay drives
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ttl: self.ttl.saturating_sub(1),
            relay: true,
        }
    }
}

/// Lifecycle of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    /// No upstream session yet
    Uninitialized,
    /// Upstream session running
    Active { session_id: u64 },
    /// Terminal
    ShutDown,
}

impl RelayState {
    pub fn is_active(&self) -> bool {
        matches!(self, RelayState::Active { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayState::ShutDown)
    }
}

/// Events emitted by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Upstream session created
    SessionStarted { session_id: u64 },

    /// Upstream session released
    SessionClosed { session_id: u64 },

    /// New wants from a peer were registered
    WantsRelayed { peer: PeerId, cids: Vec<Cid> },

    /// Block delivered to a peer
    BlockForwarded { cid: Cid, peer: PeerId },

    /// Delivery failed, interest kept for retry
    ForwardFailed {
        cid: Cid,
        peer: PeerId,
        attempts: u32,
        error: String,
    },

    /// Interest retired after exhausting retries
    InterestDropped { cid: Cid, peer: PeerId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ttl, 1);
        assert!(config.idle_timeout.is_some());
    }

    #[test]
    fn test_session_options_spend_one_hop() {
        let config = RelayConfig {
            ttl: 3,
            ..Default::default()
        };
        let options = config.session_options();
        assert_eq!(options.ttl, 2);
        assert!(options.relay);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = RelayConfig {
            ttl: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RelayConfig::from_json_str(r#"{"node_id":"relay-1","ttl":4}"#).unwrap();
        assert_eq!(config.node_id, "relay-1");
        assert_eq!(config.ttl, 4);
        assert_eq!(config.max_forward_retries, 5);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"node_id":"relay-2","idle_timeout":null,"block_channel_capacity":8}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "relay-2");
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.block_channel_capacity, 8);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            RelayConfig::from_json_str("{not json"),
            Err(RelayError::Json(_))
        ));
    }

    #[test]
    fn test_state_helpers() {
        assert!(RelayState::Active { session_id: 1 }.is_active());
        assert!(RelayState::ShutDown.is_terminal());
        assert!(!RelayState::Uninitialized.is_active());
    }
}
