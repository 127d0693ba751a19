//! Error types for engine construction.
//!
//! The per-packet pipeline never fails loudly: a packet that cannot be used
//! is simply dropped. Only building an engine from a bad configuration
//! produces an error.

use thiserror::Error;

/// Errors raised while validating or loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A fixed-capacity table was configured with zero entries
    #[error("Capacity must be non-zero: {0}")]
    ZeroCapacity(&'static str),

    /// Tick frequency must be a positive, finite number of Hz
    #[error("Invalid tick frequency: {0} Hz")]
    InvalidTickFrequency(f64),

    /// Measurement standard deviation must be finite and non-negative
    #[error("Invalid measurement standard deviation: {0} m")]
    InvalidStdDev(f64),

    /// One of the clock filter constants is out of range
    #[error("Invalid clock correction parameter: {0}")]
    InvalidClockCorrection(String),

    /// Stats interval must be non-zero
    #[error("Stats interval must be non-zero")]
    ZeroStatsInterval,

    /// Config document could not be parsed
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a clock correction error.
    pub fn clock(msg: impl Into<String>) -> Self {
        Self::InvalidClockCorrection(msg.into())
    }
}
