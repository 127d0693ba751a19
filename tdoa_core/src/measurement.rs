//! The measurement handed to the position estimator.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::types::AnchorId;

/// A range difference between the tag and two anchors.
///
/// `distance_diff` is the distance to `anchor_ids[1]` minus the distance to
/// `anchor_ids[0]`. Positions are given in the same order as the ids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TdoaMeasurement {
    pub anchor_ids: [AnchorId; 2],
    pub anchor_positions: [Point3<f64>; 2],

    /// Range difference (m)
    pub distance_diff: f64,

    /// Standard deviation of `distance_diff` (m)
    pub std_dev: f64,
}

impl TdoaMeasurement {
    /// The same measurement with the pair order swapped.
    pub fn reversed(&self) -> Self {
        Self {
            anchor_ids: [self.anchor_ids[1], self.anchor_ids[0]],
            anchor_positions: [self.anchor_positions[1], self.anchor_positions[0]],
            distance_diff: -self.distance_diff,
            std_dev: self.std_dev,
        }
    }

    /// Range difference a tag at `point` would measure for this pair.
    pub fn expected_distance_diff(&self, point: &Point3<f64>) -> f64 {
        nalgebra::distance(point, &self.anchor_positions[1])
            - nalgebra::distance(point, &self.anchor_positions[0])
    }
}

/// Receiver of emitted measurements, usually the position estimator.
pub trait MeasurementSink {
    fn send(&mut self, measurement: &TdoaMeasurement);
}

impl<F> MeasurementSink for F
where
    F: FnMut(&TdoaMeasurement),
{
    fn send(&mut self, measurement: &TdoaMeasurement) {
        self(measurement)
    }
}

impl MeasurementSink for Vec<TdoaMeasurement> {
    fn send(&mut self, measurement: &TdoaMeasurement) {
        self.push(*measurement);
    }
}
