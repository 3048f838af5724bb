//! Tuning knobs for discovery, resolution and dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Timing and retry configuration of a [`crate::Service`].
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use lux_relay::Config;
///
/// let config = Config::from_json(r#"{"discovery_attempts": 8}"#).unwrap();
/// assert_eq!(config.discovery_attempts, 8);
/// assert_eq!(config.listen_window_ms, 2500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lookup passes made before the final pass.
    pub discovery_attempts: u32,
    /// Delay between passes when resolving a single name.
    pub lookup_delay_ms: u64,
    /// Delay between passes when resolving several names, and between
    /// checks while waiting for any gateway at all.
    pub batch_lookup_delay_ms: u64,
    /// How long a discovery window stays open.
    pub listen_window_ms: u64,
    /// Default pulse hold.
    pub pulse_hold_ms: u64,
    /// Refresh rounds in a refresh cycle.
    pub refresh_cycles: u32,
    pub refresh_interval_ms: u64,
    /// Upper bound on any single device call.
    pub device_timeout_ms: u64,
    /// Commands kept in the diagnostics history.
    pub history_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discovery_attempts: 5,
            lookup_delay_ms: 250,
            batch_lookup_delay_ms: 100,
            listen_window_ms: 2500,
            pulse_hold_ms: 1500,
            refresh_cycles: 5,
            refresh_interval_ms: 200,
            device_timeout_ms: 3000,
            history_size: 100,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::JsonLoad)
    }

    pub fn lookup_delay(&self) -> Duration {
        Duration::from_millis(self.lookup_delay_ms)
    }

    pub fn batch_lookup_delay(&self) -> Duration {
        Duration::from_millis(self.batch_lookup_delay_ms)
    }

    pub fn listen_window(&self) -> Duration {
        Duration::from_millis(self.listen_window_ms)
    }

    pub fn pulse_hold(&self) -> Duration {
        Duration::from_millis(self.pulse_hold_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    /// Short timings for tests.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Config {
            discovery_attempts: 5,
            lookup_delay_ms: 60,
            batch_lookup_delay_ms: 60,
            listen_window_ms: 300,
            pulse_hold_ms: 50,
            refresh_cycles: 3,
            refresh_interval_ms: 10,
            device_timeout_ms: 200,
            history_size: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(
            Config::from_json(r#"{"discovery_attempts": "many"}"#),
            Err(Error::JsonLoad(_))
        ));
    }
}
