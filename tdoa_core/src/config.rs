//! Construction-time configuration of the TDoA engine.

use serde::{Deserialize, Serialize};

use crate::clock_correction::ClockCorrectionConfig;
use crate::constants::LOCODECK_TS_FREQ;
use crate::error::ConfigError;
use crate::matching::MatchingAlgorithm;

/// Default measurement noise (m)
pub const MEASUREMENT_NOISE_STD: f64 = 0.15;

/// Measurement noise used by long range installations (m)
pub const MEASUREMENT_NOISE_STD_LONG_RANGE: f64 = 0.30;

/// How long each kind of cached value stays usable. All values in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindows {
    /// Anchor position
    pub position_ms: u32,

    /// Remote rx time and sequence number. Matches the anchor broadcast cadence.
    pub remote_rx_ms: u32,

    /// Remote time of flight between two anchors
    pub remote_tof_ms: u32,

    /// An anchor counts as active while updated within this window
    pub active_ms: u32,
}

impl Default for ValidityWindows {
    fn default() -> Self {
        Self {
            position_ms: 2_000,
            remote_rx_ms: 30,
            remote_tof_ms: 2_000,
            active_ms: 2_000,
        }
    }
}

/// Configuration for a [`TdoaEngine`](crate::TdoaEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of anchor slots
    pub anchor_capacity: usize,

    /// Remote rx entries per anchor slot
    pub remote_capacity: usize,

    /// Remote time-of-flight entries per anchor slot
    pub tof_capacity: usize,

    /// Freshness windows
    pub validity: ValidityWindows,

    /// Clock filter constants
    pub clock: ClockCorrectionConfig,

    /// Rate counter window (ms)
    pub stats_interval_ms: u32,

    /// Standard deviation attached to each measurement (m)
    pub measurement_std_dev: f64,

    /// Frequency of the tag timestamp counter (Hz)
    pub tick_frequency_hz: f64,

    /// Strategy for picking the second anchor of a pair
    pub matching: MatchingAlgorithm,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anchor_capacity: 16,
            remote_capacity: 16,
            tof_capacity: 16,
            validity: ValidityWindows::default(),
            clock: ClockCorrectionConfig::default(),
            stats_interval_ms: 500,
            measurement_std_dev: MEASUREMENT_NOISE_STD,
            tick_frequency_hz: LOCODECK_TS_FREQ,
            matching: MatchingAlgorithm::Youngest,
        }
    }
}

impl EngineConfig {
    /// Defaults for a long range installation (larger measurement noise).
    pub fn long_range() -> Self {
        Self {
            measurement_std_dev: MEASUREMENT_NOISE_STD_LONG_RANGE,
            ..Default::default()
        }
    }

    /// Sets the tag tick frequency.
    pub fn with_tick_frequency(mut self, hz: f64) -> Self {
        self.tick_frequency_hz = hz;
        self
    }

    /// Sets the matching strategy.
    pub fn with_matching(mut self, matching: MatchingAlgorithm) -> Self {
        self.matching = matching;
        self
    }

    /// Sets the number of anchor slots.
    pub fn with_anchor_capacity(mut self, capacity: usize) -> Self {
        self.anchor_capacity = capacity;
        self
    }

    /// Sets the per-anchor remote rx and tof capacity.
    pub fn with_remote_capacity(mut self, capacity: usize) -> Self {
        self.remote_capacity = capacity;
        self.tof_capacity = capacity;
        self
    }

    /// Parses a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anchor_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("anchor_capacity"));
        }
        if self.remote_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("remote_capacity"));
        }
        if self.tof_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("tof_capacity"));
        }
        if !(self.tick_frequency_hz.is_finite() && self.tick_frequency_hz > 0.0) {
            return Err(ConfigError::InvalidTickFrequency(self.tick_frequency_hz));
        }
        if !(self.measurement_std_dev.is_finite() && self.measurement_std_dev >= 0.0) {
            return Err(ConfigError::InvalidStdDev(self.measurement_std_dev));
        }
        if self.stats_interval_ms == 0 {
            return Err(ConfigError::ZeroStatsInterval);
        }
        self.clock.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.validity.position_ms, 2_000);
        assert_eq!(config.validity.remote_rx_ms, 30);
        assert_eq!(config.validity.remote_tof_ms, 2_000);
        assert_eq!(config.validity.active_ms, 2_000);
        assert_eq!(config.stats_interval_ms, 500);
        assert_eq!(config.measurement_std_dev, 0.15);
        assert_eq!(config.clock.bucket_max, 4);
    }

    #[test]
    fn test_long_range_std_dev() {
        assert_eq!(EngineConfig::long_range().measurement_std_dev, 0.30);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig::default().with_anchor_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity("anchor_capacity"))
        ));
    }

    #[test]
    fn test_bad_tick_frequency_rejected() {
        let config = EngineConfig::default().with_tick_frequency(0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTickFrequency(_))
        ));
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{ "anchor_capacity": 8, "matching": "random", "validity": { "position_ms": 5000, "remote_rx_ms": 30, "remote_tof_ms": 2000, "active_ms": 2000 } }"#,
        )
        .unwrap();

        assert_eq!(config.anchor_capacity, 8);
        assert_eq!(config.matching, MatchingAlgorithm::Random);
        assert_eq!(config.validity.position_ms, 5_000);
        assert_eq!(config.remote_capacity, 16);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(EngineConfig::from_json(r#"{ "stats_interval_ms": 0 }"#).is_err());
    }
}
