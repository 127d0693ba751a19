//! JSON exporter for offline analysis.
//!
//! Exports every emitted measurement next to its ground truth so error
//! distributions can be plotted outside the simulator.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tdoa_core::{AnchorId, StatsSnapshot};

use crate::error::SimError;
use crate::world::{MeasurementRecord, SimWorld};

/// Anchor description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorInfo {
    pub id: AnchorId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub drift_ppm: f64,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Anchors at the end of the run
    pub anchors: Vec<AnchorInfo>,

    /// Drift of the tag oscillator (ppm)
    pub tag_drift_ppm: f64,

    /// Every measurement the engine emitted
    pub measurements: Vec<MeasurementRecord>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rms_error: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsSnapshot>,
}

impl SimExport {
    /// Captures the state of a finished world.
    pub fn from_world(scenario: &str, world: &SimWorld) -> Self {
        let anchors = world
            .anchors()
            .iter()
            .zip(world.oracle.anchors())
            .map(|(anchor, position)| AnchorInfo {
                id: anchor.id,
                x: position.x,
                y: position.y,
                z: position.z,
                drift_ppm: anchor.clock.drift_ppm(),
            })
            .collect();

        Self {
            scenario: scenario.to_string(),
            seed: world.config.seed,
            duration_sec: world.oracle.time(),
            anchors,
            tag_drift_ppm: world.tag_clock().drift_ppm(),
            measurements: world.records().to_vec(),
            passed: false,
            rms_error: None,
            stats: Some(world.engine().stats().snapshot()),
        }
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, rms_error: Option<f64>) {
        self.passed = passed;
        self.rms_error = rms_error;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimConfig;

    #[test]
    fn test_export_contains_measurements() {
        let mut world = SimWorld::new(SimConfig {
            num_anchors: 4,
            ..Default::default()
        })
        .unwrap();
        world.run_until(0.2);

        let mut export = SimExport::from_world("nominal", &world);
        export.finalize(true, Some(0.01));

        assert_eq!(export.anchors.len(), 4);
        assert_eq!(export.measurements.len(), world.records().len());

        let json = serde_json::to_string(&export).unwrap();
        let back: SimExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.measurements.len(), export.measurements.len());
        assert_eq!(back.anchors[3].id, AnchorId(3));
        assert!(back.passed);
    }
}
