//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated installation:
//! - True positions of all anchors
//! - Tag kinematics (constant velocity, bouncing inside the anchor volume)
//! - True distances and distance differences

use nalgebra::{Point3, Vector3};
use tdoa_core::constants::SPEED_OF_LIGHT;
use tdoa_core::TdoaMeasurement;

/// Keeps the tag this far inside the anchor bounding box (m).
const BOUNDARY_MARGIN: f64 = 0.3;

/// The Oracle - maintains ground truth positions.
#[derive(Debug, Clone)]
pub struct Oracle {
    anchors: Vec<Point3<f64>>,

    tag: Point3<f64>,
    tag_velocity: Vector3<f64>,

    bounds_min: Point3<f64>,
    bounds_max: Point3<f64>,

    /// Current simulation time (seconds)
    current_time: f64,
}

impl Oracle {
    /// Creates an oracle with fixed anchors and a tag starting at the center
    /// of their bounding box.
    pub fn new(anchors: Vec<Point3<f64>>, tag_velocity: Vector3<f64>) -> Self {
        let mut bounds_min = Point3::new(f64::MAX, f64::MAX, f64::MAX);
        let mut bounds_max = Point3::new(f64::MIN, f64::MIN, f64::MIN);
        for anchor in &anchors {
            bounds_min = bounds_min.inf(anchor);
            bounds_max = bounds_max.sup(anchor);
        }
        let margin = Vector3::repeat(BOUNDARY_MARGIN);
        let bounds_min = bounds_min + margin;
        let bounds_max = bounds_max - margin;

        Self {
            tag: nalgebra::center(&bounds_min, &bounds_max),
            anchors,
            tag_velocity,
            bounds_min,
            bounds_max,
            current_time: 0.0,
        }
    }

    /// Places `count` anchors evenly on a circle, alternating between floor
    /// and ceiling height.
    pub fn anchor_ring(count: usize, radius: f64, height: f64) -> Vec<Point3<f64>> {
        (0..count)
            .map(|i| {
                let angle = std::f64::consts::TAU * i as f64 / count as f64;
                let z = if i % 2 == 0 { 0.2 } else { height };
                Point3::new(radius * angle.cos(), radius * angle.sin(), z)
            })
            .collect()
    }

    /// Advances the tag by `dt` seconds, reflecting it off the volume walls.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        self.tag += self.tag_velocity * dt;

        for axis in 0..3 {
            if self.tag[axis] < self.bounds_min[axis] {
                self.tag[axis] = 2.0 * self.bounds_min[axis] - self.tag[axis];
                self.tag_velocity[axis] = self.tag_velocity[axis].abs();
            } else if self.tag[axis] > self.bounds_max[axis] {
                self.tag[axis] = 2.0 * self.bounds_max[axis] - self.tag[axis];
                self.tag_velocity[axis] = -self.tag_velocity[axis].abs();
            }
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn tag_position(&self) -> Point3<f64> {
        self.tag
    }

    pub fn anchors(&self) -> &[Point3<f64>] {
        &self.anchors
    }

    pub fn anchor_position(&self, index: usize) -> Point3<f64> {
        self.anchors[index]
    }

    /// Distance from the tag to an anchor (m).
    pub fn tag_distance(&self, index: usize) -> f64 {
        nalgebra::distance(&self.tag, &self.anchors[index])
    }

    /// Distance between two anchors (m).
    pub fn anchor_distance(&self, a: usize, b: usize) -> f64 {
        nalgebra::distance(&self.anchors[a], &self.anchors[b])
    }

    /// Propagation time from the tag to an anchor (s).
    pub fn tag_flight_time(&self, index: usize) -> f64 {
        self.tag_distance(index) / SPEED_OF_LIGHT
    }

    /// Propagation time between two anchors (s).
    pub fn anchor_flight_time(&self, a: usize, b: usize) -> f64 {
        self.anchor_distance(a, b) / SPEED_OF_LIGHT
    }

    /// The distance difference a perfect measurement would carry right now.
    pub fn true_distance_diff(&self, measurement: &TdoaMeasurement) -> f64 {
        measurement.expected_distance_diff(&self.tag)
    }
}
