//! Simulated radio oscillators.
//!
//! A clock maps true time to a 40-bit tick counter running at a slightly
//! wrong rate. Timestamps wrap exactly like the radio's counter does.

use tdoa_core::constants::ANCHOR_TS_MASK;

/// A free-running timestamp counter with constant drift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    frequency_hz: f64,
    drift_ppm: f64,
    offset_ticks: f64,
}

impl SimClock {
    /// Creates a clock running `drift_ppm` fast (negative for slow), reading
    /// `offset_ticks` at true time zero.
    pub fn new(frequency_hz: f64, drift_ppm: f64, offset_ticks: u64) -> Self {
        Self {
            frequency_hz,
            drift_ppm,
            offset_ticks: (offset_ticks & ANCHOR_TS_MASK) as f64,
        }
    }

    /// A perfect clock starting at zero.
    pub fn ideal(frequency_hz: f64) -> Self {
        Self::new(frequency_hz, 0.0, 0)
    }

    pub fn drift_ppm(&self) -> f64 {
        self.drift_ppm
    }

    /// Actual ticks per nominal tick.
    pub fn rate(&self) -> f64 {
        1.0 + self.drift_ppm * 1e-6
    }

    /// Ticks counted over `dt_s` seconds of true time.
    pub fn interval_ticks(&self, dt_s: f64) -> f64 {
        dt_s * self.frequency_hz * self.rate()
    }

    /// Counter value at true time `t_s`, before wrapping.
    pub fn ticks(&self, t_s: f64) -> f64 {
        self.offset_ticks + self.interval_ticks(t_s)
    }

    /// Wrapped timestamp at true time `t_s`.
    pub fn timestamp(&self, t_s: f64) -> i64 {
        wrap(self.ticks(t_s))
    }

    /// Wrapped timestamp with `noise_ticks` of timestamping error added.
    pub fn timestamp_with_noise(&self, t_s: f64, noise_ticks: f64) -> i64 {
        wrap(self.ticks(t_s) + noise_ticks)
    }

    /// True time (s) at which the counter first wraps.
    pub fn first_wrap_s(&self) -> f64 {
        ((ANCHOR_TS_MASK + 1) as f64 - self.offset_ticks) / (self.frequency_hz * self.rate())
    }
}

fn wrap(ticks: f64) -> i64 {
    // Negative values only occur from noise at t = 0 and saturate to zero
    ((ticks.round() as u64) & ANCHOR_TS_MASK) as i64
}
