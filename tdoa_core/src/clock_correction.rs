//! Clock correction between the tag oscillator and an anchor oscillator.
//!
//! Every anchor runs its own free-running timer. To compare an interval
//! measured by an anchor with one measured by the tag, the anchor interval is
//! multiplied by a clock correction ratio:
//!
//! ```text
//! ratio = ticks elapsed in the reference (tag) clock / ticks elapsed in clock x
//! ```
//!
//! The raw ratio from one pair of packets is noisy. [`ClockCorrectionEngine::update`]
//! low-pass filters accepted samples and uses a leaky bucket to decide when a
//! run of out-of-band samples is allowed to replace the reference value.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Returned by [`ClockCorrectionEngine::calculate`] when no ratio can be formed.
pub const INVALID_RATIO: f64 = -1.0;

/// Tuning constants of the clock correction filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockCorrectionConfig {
    /// Maximum deviation of a single oscillator from nominal (10 ppm).
    /// Two oscillators together may disagree by twice this.
    pub max_clock_deviation: f64,

    /// A candidate closer than this to the current ratio is accepted as noise
    pub accepted_noise: f64,

    /// Weight of the previous ratio in the low-pass filter.
    /// The candidate gets the remaining `1 - filter_weight`.
    pub filter_weight: f64,

    /// Depth of the leaky bucket
    pub bucket_max: u32,
}

impl Default for ClockCorrectionConfig {
    fn default() -> Self {
        Self {
            max_clock_deviation: 10e-6,
            accepted_noise: 0.03e-6,
            filter_weight: 0.1,
            bucket_max: 4,
        }
    }
}

impl ClockCorrectionConfig {
    /// Lower physical bound for a ratio.
    pub fn spec_min(&self) -> f64 {
        1.0 - self.max_clock_deviation * 2.0
    }

    /// Upper physical bound for a ratio.
    pub fn spec_max(&self) -> f64 {
        1.0 + self.max_clock_deviation * 2.0
    }

    /// Checks that the constants describe a usable filter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_clock_deviation > 0.0 && self.max_clock_deviation < 0.5) {
            return Err(ConfigError::clock(format!(
                "max_clock_deviation {} outside (0, 0.5)",
                self.max_clock_deviation
            )));
        }
        if !(self.accepted_noise > 0.0) {
            return Err(ConfigError::clock(format!(
                "accepted_noise {} must be positive",
                self.accepted_noise
            )));
        }
        if !(0.0..1.0).contains(&self.filter_weight) {
            return Err(ConfigError::clock(format!(
                "filter_weight {} outside [0, 1)",
                self.filter_weight
            )));
        }
        if self.bucket_max == 0 {
            return Err(ConfigError::clock("bucket_max must be non-zero"));
        }
        Ok(())
    }
}

/// Per-anchor clock correction state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockCorrectionState {
    ratio: f64,
    bucket: u32,
}

impl ClockCorrectionState {
    /// Current ratio. 0.0 until the first reference has been taken.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Current leaky bucket level.
    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    /// True once a reference ratio exists.
    pub fn is_calibrated(&self) -> bool {
        self.ratio > 0.0
    }
}

/// Stateless clock correction filter; the state lives in each anchor slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockCorrectionEngine {
    config: ClockCorrectionConfig,
}

impl ClockCorrectionEngine {
    /// Creates an engine with the given constants.
    pub fn new(config: ClockCorrectionConfig) -> Self {
        Self { config }
    }

    /// Returns the filter constants.
    pub fn config(&self) -> &ClockCorrectionConfig {
        &self.config
    }

    /// Computes the ratio between two clocks from two events seen by both.
    ///
    /// Elapsed ticks are computed as `(new - old) & mask` in unsigned
    /// arithmetic, so a counter overflow between the events is harmless.
    /// Returns [`INVALID_RATIO`] when no ticks elapsed in clock x.
    ///
    /// Example: `t_in_reference = ratio * t_in_x`
    pub fn calculate(new_ref: u64, old_ref: u64, new_x: u64, old_x: u64, mask: u64) -> f64 {
        let ticks_in_ref = new_ref.wrapping_sub(old_ref) & mask;
        let ticks_in_x = new_x.wrapping_sub(old_x) & mask;

        if ticks_in_x == 0 {
            return INVALID_RATIO;
        }

        ticks_in_ref as f64 / ticks_in_x as f64
    }

    /// Feeds a candidate ratio into the filter.
    ///
    /// Returns true if the sample is reliable, i.e. it agreed with the
    /// current ratio to within the accepted noise and was filtered in.
    ///
    /// A candidate outside the noise band drains the bucket by one. Once the
    /// bucket is empty, an out-of-band candidate within the oscillator tolerance
    /// replaces the ratio as a new reference. That sample is not reliable
    /// and does not refill the bucket, since nothing has confirmed it yet.
    pub fn update(&self, state: &mut ClockCorrectionState, candidate: f64) -> bool {
        let current = state.ratio;
        let difference = candidate - current;

        if -self.config.accepted_noise < difference && difference < self.config.accepted_noise {
            // NOTE: filter_weight is the weight of the old value, so the candidate gets 90%
            state.ratio =
                current * self.config.filter_weight + candidate * (1.0 - self.config.filter_weight);
            self.fill_bucket(state);
            return true;
        }

        if self.drain_bucket(state)
            && self.config.spec_min() < candidate
            && candidate < self.config.spec_max()
        {
            debug!(
                previous = self.scaled_for_logging(current),
                reference = self.scaled_for_logging(candidate),
                "Clock correction took new reference"
            );
            state.ratio = candidate;
        }

        false
    }

    /// Expresses a ratio as thousandths of the max clock deviation, which
    /// keeps ppm-scale values readable in logs.
    pub fn scaled_for_logging(&self, ratio: f64) -> f64 {
        (ratio - 1.0) * (1.0 / self.config.max_clock_deviation) * 1000.0
    }

    fn fill_bucket(&self, state: &mut ClockCorrectionState) {
        if state.bucket < self.config.bucket_max {
            state.bucket += 1;
        }
    }

    /// Returns true if the bucket was already empty.
    fn drain_bucket(&self, state: &mut ClockCorrectionState) -> bool {
        if state.bucket > 0 {
            state.bucket -= 1;
            return false;
        }
        true
    }
}
