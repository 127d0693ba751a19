//! Common types used across the TDoA core.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an anchor as carried in its range packets.
///
/// Ids are reused freely across a large installation; two anchors may share
/// an id as long as they are never visible from the same place.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AnchorId(pub u8);

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

impl From<u8> for AnchorId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// A cached anchor position and the time (ms) it was written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPosition {
    /// Position in the local frame (meters)
    pub point: Point3<f64>,

    /// Time the position was stored (ms)
    pub timestamp_ms: u32,
}

impl AnchorPosition {
    /// Creates a position record.
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: u32) -> Self {
        Self {
            point: Point3::new(x, y, z),
            timestamp_ms,
        }
    }
}

/// Returns true if a value written at `written_ms` is still inside a
/// validity window of `window_ms` at time `now_ms`.
#[inline]
pub(crate) fn is_fresh(written_ms: u32, window_ms: u32, now_ms: u32) -> bool {
    age_ms(written_ms, now_ms) < window_ms
}

/// Milliseconds elapsed since `written_ms`, across a wrap of the clock.
#[inline]
pub(crate) fn age_ms(written_ms: u32, now_ms: u32) -> u32 {
    now_ms.wrapping_sub(written_ms)
}
