//! Centralized Configuration Management
//!
//! All timing knobs of the finder and peer location sessions, plus the actor
//! buffer sizes, in one serde-loadable structure.

use core::time::Duration;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PeerlinkError, Result};

/// Serialize durations as whole seconds
mod secs {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// ----------------------------------------------------------------------------
// Finder Session Configuration
// ----------------------------------------------------------------------------

/// Timing for the finder (rendezvous) session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    #[serde(with = "secs")]
    pub session_create_timeout: Duration,
    #[serde(with = "secs")]
    pub keep_alive_timeout: Duration,
    #[serde(with = "secs")]
    pub session_delete_timeout: Duration,
    /// Floor applied to the server supplied expiry before scheduling a keep-alive
    #[serde(with = "secs")]
    pub min_keep_alive_deadline: Duration,
    /// How long before expiry the keep-alive fires
    #[serde(with = "secs")]
    pub keep_alive_margin: Duration,
    #[serde(with = "secs")]
    pub location_find_timeout: Duration,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            session_create_timeout: Duration::from_secs(60),
            keep_alive_timeout: Duration::from_secs(60),
            session_delete_timeout: Duration::from_secs(10),
            min_keep_alive_deadline: Duration::from_secs(120),
            keep_alive_margin: Duration::from_secs(60),
            location_find_timeout: Duration::from_secs(60),
        }
    }
}

// ----------------------------------------------------------------------------
// Location Session Configuration
// ----------------------------------------------------------------------------

/// Timing for peer location sessions and their transport channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    #[serde(with = "secs")]
    pub identify_timeout: Duration,
    #[serde(with = "secs")]
    pub keep_alive_timeout: Duration,
    #[serde(with = "secs")]
    pub send_indication_interval: Duration,
    #[serde(with = "secs")]
    pub expect_data_interval: Duration,
    #[serde(with = "secs")]
    pub backgrounding_timeout: Duration,
    /// An incoming session that has not authenticated by then is cancelled
    #[serde(with = "secs")]
    pub incoming_identify_deadline: Duration,
    /// Protocol tag used when opening the messaging channel
    pub messaging_protocol: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            identify_timeout: Duration::from_secs(60),
            keep_alive_timeout: Duration::from_secs(30),
            send_indication_interval: Duration::from_secs(15),
            expect_data_interval: Duration::from_secs(30),
            backgrounding_timeout: Duration::from_secs(30),
            incoming_identify_deadline: Duration::from_secs(90),
            messaging_protocol: "peer-to-peer".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the account actor channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for events flowing into the account actor
    pub event_buffer_size: usize,
    /// Buffer size for notices flowing up to the application
    pub notice_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 128, // transport callbacks can be bursty
            notice_buffer_size: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Stack Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one account's session stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub domain: String,
    pub finder: FinderConfig,
    pub location: LocationConfig,
    pub channel: ChannelConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            finder: FinderConfig::default(),
            location: LocationConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl StackConfig {
    pub fn new<D: Into<String>>(domain: D) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Short timeouts for tests
    pub fn testing() -> Self {
        Self {
            domain: "test.local".to_string(),
            finder: FinderConfig {
                session_create_timeout: Duration::from_secs(5),
                keep_alive_timeout: Duration::from_secs(60),
                session_delete_timeout: Duration::from_secs(2),
                ..FinderConfig::default()
            },
            location: LocationConfig {
                identify_timeout: Duration::from_secs(5),
                keep_alive_timeout: Duration::from_secs(5),
                incoming_identify_deadline: Duration::from_secs(10),
                ..LocationConfig::default()
            },
            channel: ChannelConfig {
                event_buffer_size: 100,
                notice_buffer_size: 100,
            },
        }
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: StackConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            PeerlinkError::config_error(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(PeerlinkError::config_error("domain must not be empty"));
        }
        if self.finder.keep_alive_margin >= self.finder.min_keep_alive_deadline {
            return Err(PeerlinkError::config_error(
                "finder keep_alive_margin must be smaller than min_keep_alive_deadline",
            ));
        }
        if self.location.messaging_protocol.is_empty() {
            return Err(PeerlinkError::config_error("messaging_protocol must not be empty"));
        }
        if self.channel.event_buffer_size == 0 || self.channel.notice_buffer_size == 0 {
            return Err(PeerlinkError::config_error("channel buffers must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
