//! Modem engine configuration.
//!
//! Every field has a default, so a JSON document only needs to name what
//! it changes:
//!
//! ```
//! use isi_client::ModemConfig;
//!
//! let config = ModemConfig::from_json(r#"{ "ss_timeout_ms": 20000 }"#).unwrap();
//! assert_eq!(config.ss_timeout().as_secs(), 20);
//! assert_eq!(config.info_timeout().as_secs(), 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IsiError, Result};
use crate::protocol::{
    PhonetAddress, DEFAULT_MAX_FRAME_PAYLOAD, PN_DEV_HOST, PN_DEV_MODEM, PN_MEDIA_DEFAULT,
};
use crate::transport::StreamConfig;

/// Default maximum in-flight requests per resource.
pub const DEFAULT_MAX_PENDING_PER_RESOURCE: usize = 32;

/// Highest number of in-flight requests a resource can carry (one-byte ids, 0 unused).
pub const MAX_TRANSACTION_IDS: usize = 255;

/// Default reachability check timeout.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Default supplementary services request timeout.
pub const DEFAULT_SS_TIMEOUT: Duration = crate::drivers::SS_TIMEOUT;

/// Default phone info request timeout.
pub const DEFAULT_INFO_TIMEOUT: Duration = crate::drivers::INFO_TIMEOUT;

/// Milliseconds for a timeout field, rounding a partial millisecond up
/// and saturating at `u64::MAX`.
pub(crate) fn duration_to_millis(timeout: Duration) -> u64 {
    let partial = u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(timeout.as_millis() + partial).unwrap_or(u64::MAX)
}

/// Default outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default inbound event queue capacity.
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// Configuration for an [`IsiModem`](crate::IsiModem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Frames queued for the stream writer before sends are refused.
    pub outbound_capacity: usize,
    /// Transport events queued for the dispatcher.
    pub inbound_capacity: usize,
    /// In-flight requests allowed per resource (1..=255).
    pub max_pending_per_resource: usize,
    pub verify_timeout_ms: u64,
    pub ss_timeout_ms: u64,
    pub info_timeout_ms: u64,
    /// PhoNet media byte.
    pub media: u8,
    /// Host device id.
    pub local_dev: u8,
    /// Modem device id.
    pub remote_dev: u8,
    /// Host object id.
    pub local_obj: u8,
    /// Largest ISI payload in a PhoNet frame.
    pub max_frame_payload: u16,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            max_pending_per_resource: DEFAULT_MAX_PENDING_PER_RESOURCE,
            verify_timeout_ms: duration_to_millis(DEFAULT_VERIFY_TIMEOUT),
            ss_timeout_ms: duration_to_millis(DEFAULT_SS_TIMEOUT),
            info_timeout_ms: duration_to_millis(DEFAULT_INFO_TIMEOUT),
            media: PN_MEDIA_DEFAULT,
            local_dev: PN_DEV_HOST,
            remote_dev: PN_DEV_MODEM,
            local_obj: 0x00,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
        }
    }
}

impl ModemConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending_per_resource == 0 || self.max_pending_per_resource > MAX_TRANSACTION_IDS
        {
            return Err(IsiError::InvalidConfig(format!(
                "max_pending_per_resource must be in 1..={}, got {}",
                MAX_TRANSACTION_IDS, self.max_pending_per_resource
            )));
        }
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(IsiError::InvalidConfig(
                "queue capacities must be non-zero".to_string(),
            ));
        }
        for (name, ms) in [
            ("verify_timeout_ms", self.verify_timeout_ms),
            ("ss_timeout_ms", self.ss_timeout_ms),
            ("info_timeout_ms", self.info_timeout_ms),
        ] {
            if ms == 0 {
                return Err(IsiError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        if self.max_frame_payload < 2 {
            return Err(IsiError::InvalidConfig(format!(
                "max_frame_payload {} cannot hold a request",
                self.max_frame_payload
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    #[inline]
    pub fn ss_timeout(&self) -> Duration {
        Duration::from_millis(self.ss_timeout_ms)
    }

    #[inline]
    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }

    /// Addressing for outgoing PhoNet frames.
    pub fn addressing(&self) -> PhonetAddress {
        PhonetAddress {
            media: self.media,
            local_dev: self.local_dev,
            remote_dev: self.remote_dev,
            local_obj: self.local_obj,
            remote_obj: 0x00,
        }
    }

    /// Stream transport settings derived from this configuration.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            addressing: self.addressing(),
            outbound_capacity: self.outbound_capacity,
            inbound_capacity: self.inbound_capacity,
            max_frame_payload: self.max_frame_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ModemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ss_timeout(), DEFAULT_SS_TIMEOUT);
        assert_eq!(config.info_timeout(), DEFAULT_INFO_TIMEOUT);
    }

    #[test]
    fn test_duration_to_millis() {
        assert_eq!(duration_to_millis(Duration::from_secs(15)), 15_000);
        assert_eq!(duration_to_millis(Duration::from_micros(1)), 1);
        assert_eq!(duration_to_millis(Duration::from_micros(1_500)), 2);
        assert_eq!(duration_to_millis(Duration::ZERO), 0);
        assert_eq!(duration_to_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ModemConfig::from_json(r#"{"max_pending_per_resource": 4, "media": 5}"#)
            .unwrap();
        assert_eq!(config.max_pending_per_resource, 4);
        assert_eq!(config.media, 5);
        assert_eq!(config.verify_timeout(), DEFAULT_VERIFY_TIMEOUT);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        let result = ModemConfig::from_json(r#"{"max_pending_per_resource": 0}"#);
        assert!(matches!(result, Err(IsiError::InvalidConfig(_))));

        let result = ModemConfig::from_json(r#"{"max_pending_per_resource": 256}"#);
        assert!(matches!(result, Err(IsiError::InvalidConfig(_))));

        let result = ModemConfig::from_json(r#"{"ss_timeout_ms": 0}"#);
        assert!(matches!(result, Err(IsiError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_json_syntax_error() {
        assert!(matches!(
            ModemConfig::from_json("{ not json"),
            Err(IsiError::Json(_))
        ));
    }

    #[test]
    fn test_stream_config_follows_addressing() {
        let config = ModemConfig {
            local_dev: 0x6C,
            local_obj: 0x3F,
            ..ModemConfig::default()
        };
        let stream = config.stream_config();
        assert_eq!(stream.addressing.local_dev, 0x6C);
        assert_eq!(stream.addressing.local_obj, 0x3F);
        assert_eq!(stream.addressing.remote_dev, PN_DEV_MODEM);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ModemConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ModemConfig::from_json(&json).unwrap(), config);
    }
}
