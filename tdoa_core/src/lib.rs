//! TDoA Core - Onboard Time-Difference-of-Arrival Estimation for UWB Tags
//!
//! This library turns raw anchor broadcasts into range-difference measurements:
//! 1. **Clock drift**: every anchor runs its own oscillator; a leaky-bucket gated
//!    filter tracks the tick-rate ratio between each anchor and the tag
//! 2. **Unbounded anchor population**: a fixed-capacity anchor table with lazy
//!    expiry and least-recently-updated recycling
//! 3. **Timer overflow**: all timestamp deltas are taken modulo the 40-bit
//!    anchor timestamp width
//!
//! The engine performs no I/O and never reads a clock; time and raw ticks are
//! passed in by the caller.

pub mod clock_correction;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod matching;
pub mod measurement;
pub mod packet;
pub mod stats;
pub mod storage;
pub mod types;

// Re-export key types for convenience
pub use clock_correction::{ClockCorrectionConfig, ClockCorrectionEngine, ClockCorrectionState};
pub use config::{EngineConfig, ValidityWindows};
pub use engine::TdoaEngine;
pub use error::ConfigError;
pub use matching::MatchingAlgorithm;
pub use measurement::{MeasurementSink, TdoaMeasurement};
pub use packet::{RangePacket, RemoteReport};
pub use stats::{RateCounter, StatsSnapshot, TdoaStats};
pub use storage::{AnchorCtx, AnchorStorage, RemoteSeqNr};
pub use types::{AnchorId, AnchorPosition};
