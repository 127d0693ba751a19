//! Error types for the simulation harness.

use thiserror::Error;

/// Errors that can occur while setting up or exporting a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The engine rejected its configuration
    #[error("Engine configuration error: {0}")]
    Config(#[from] tdoa_core::ConfigError),

    /// A simulation parameter is out of range
    #[error("Invalid simulation parameter: {0}")]
    InvalidParameter(String),

    /// Scenario name not recognized
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Reading a config file or writing an export failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Creates an invalid parameter error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
