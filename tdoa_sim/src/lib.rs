//! TDoA Simulation Harness
//!
//! A deterministic radio-level simulation of a UWB anchor constellation used
//! to exercise `tdoa_core` against ground truth.
//!
//! # Core Principle: Everything Derives From One Seed
//!
//! - **Clocks**: every anchor and the tag run a drifting 40-bit counter
//! - **Radio**: round-robin broadcasts, timestamp jitter, tag-side loss
//! - **Physics**: a tag moving at constant speed inside the anchor volume
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      SimWorld                       │
//! │  ┌──────────┐  packets   ┌──────────────────────┐   │
//! │  │ Anchors  │───────────►│ TdoaEngine (tag)     │   │
//! │  │ SimClock │            └──────────┬───────────┘   │
//! │  └────▲─────┘                       │ measurements  │
//! │       │                  ┌──────────▼───────────┐   │
//! │  ┌────┴─────────────┐    │ MeasurementRecord    │   │
//! │  │ Oracle           │───►│ (measured vs truth)  │   │
//! │  │ (ground truth)   │    └──────────────────────┘   │
//! │  └──────────────────┘                               │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tdoa_sim::{SimConfig, SimWorld};
//!
//! let config = SimConfig {
//!     seed: 42,
//!     num_anchors: 6,
//!     ..Default::default()
//! };
//!
//! let mut world = SimWorld::new(config).unwrap();
//! world.run_until(2.0);
//! println!("{} measurements", world.records().len());
//! ```

mod clock;
mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
mod world;

pub use clock::SimClock;
pub use error::SimError;
pub use exporter::{AnchorInfo, SimExport};
pub use oracle::Oracle;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{MeasurementRecord, SimAnchor, SimConfig, SimWorld};
