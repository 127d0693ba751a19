//! Rolling diagnostics for the TDoA engine.
//!
//! Nothing in here feeds back into the engine. Rates are recomputed from the
//! injected time once per interval, and a selectable anchor pair is watched
//! for fine-grained debug values.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::AnchorId;

/// Counts events and turns them into a rate once per interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCounter {
    count: u32,
    rate: f32,
    interval_ms: u32,
    latest_update_ms: u32,
}

impl RateCounter {
    pub fn new(interval_ms: u32, now_ms: u32) -> Self {
        Self {
            count: 0,
            rate: 0.0,
            interval_ms,
            latest_update_ms: now_ms,
        }
    }

    /// Records one event.
    #[inline]
    pub fn event(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Recomputes the rate if a full interval has passed. Returns true if it did.
    pub fn update(&mut self, now_ms: u32) -> bool {
        let elapsed_ms = now_ms.wrapping_sub(self.latest_update_ms);
        if elapsed_ms < self.interval_ms {
            return false;
        }

        self.rate = self.count as f32 * 1000.0 / elapsed_ms as f32;
        self.count = 0;
        self.latest_update_ms = now_ms;
        true
    }

    /// Events per second over the last completed interval.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Events since the last completed interval.
    pub fn pending(&self) -> u32 {
        self.count
    }
}

/// Debug values for the watched anchor pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchedPair {
    pub anchor: AnchorId,
    pub remote: AnchorId,

    /// Latest reliable clock correction of `anchor`
    pub clock_correction: f64,

    /// Latest time of flight between the pair (anchor ticks)
    pub tof: i64,

    /// Latest distance difference for the pair: distance to `remote` minus
    /// distance to `anchor`
    pub tdoa: f64,
}

/// Engine counters.
#[derive(Debug, Clone)]
pub struct TdoaStats {
    pub packets_received: RateCounter,
    pub packets_to_estimator: RateCounter,
    pub clock_correction_count: RateCounter,
    pub context_hit_count: RateCounter,
    pub context_miss_count: RateCounter,
    pub time_is_good: RateCounter,
    pub suitable_data_found: RateCounter,

    watched: WatchedPair,
    new_anchor: AnchorId,
    new_remote: AnchorId,

    interval_ms: u32,
    next_update_ms: u32,
}

impl TdoaStats {
    pub fn new(interval_ms: u32, now_ms: u32) -> Self {
        let counter = RateCounter::new(interval_ms, now_ms);

        Self {
            packets_received: counter,
            packets_to_estimator: counter,
            clock_correction_count: counter,
            context_hit_count: counter,
            context_miss_count: counter,
            time_is_good: counter,
            suitable_data_found: counter,
            watched: WatchedPair {
                anchor: AnchorId(0),
                remote: AnchorId(1),
                clock_correction: 0.0,
                tof: 0,
                tdoa: 0.0,
            },
            new_anchor: AnchorId(0),
            new_remote: AnchorId(1),
            interval_ms,
            next_update_ms: now_ms.wrapping_add(interval_ms),
        }
    }

    /// Selects a new pair to watch. Takes effect at the next interval boundary.
    pub fn watch(&mut self, anchor: AnchorId, remote: AnchorId) {
        self.new_anchor = anchor;
        self.new_remote = remote;
    }

    /// Currently watched pair and its debug values.
    pub fn watched(&self) -> &WatchedPair {
        &self.watched
    }

    /// Advances the stats to `now_ms`.
    ///
    /// At each interval boundary a pending watch selection is latched, which
    /// clears the debug values that belonged to the old pair, and all rates
    /// are refreshed.
    pub fn update(&mut self, now_ms: u32) {
        // Signed distance so the latch survives a clock wrap
        if now_ms.wrapping_sub(self.next_update_ms) as i32 <= 0 {
            return;
        }

        if self.watched.anchor != self.new_anchor {
            self.watched.anchor = self.new_anchor;
            self.watched.clock_correction = 0.0;
            self.watched.tof = 0;
            self.watched.tdoa = 0.0;
        }
        if self.watched.remote != self.new_remote {
            self.watched.remote = self.new_remote;
            self.watched.tof = 0;
            self.watched.tdoa = 0.0;
        }

        for counter in self.counters_mut() {
            counter.update(now_ms);
        }
        self.next_update_ms = now_ms.wrapping_add(self.interval_ms);

        debug!(
            packets = self.packets_received.rate(),
            to_estimator = self.packets_to_estimator.rate(),
            hit = self.context_hit_count.rate(),
            miss = self.context_miss_count.rate(),
            time_good = self.time_is_good.rate(),
            suitable = self.suitable_data_found.rate(),
            "TDoA rates"
        );
    }

    /// Records a reliable clock sample for `anchor`.
    pub(crate) fn record_clock_correction(&mut self, anchor: AnchorId, ratio: f64) {
        if anchor == self.watched.anchor {
            self.watched.clock_correction = ratio;
            self.clock_correction_count.event();
        }
    }

    /// Records a time of flight reported by `anchor` to `remote`.
    pub(crate) fn record_tof(&mut self, anchor: AnchorId, remote: AnchorId, tof: i64) {
        if anchor == self.watched.anchor && remote == self.watched.remote {
            self.watched.tof = tof;
        }
    }

    /// Records an emitted measurement for the pair `(a, b)`.
    pub(crate) fn record_tdoa(&mut self, a: AnchorId, b: AnchorId, distance_diff: f64) {
        if a == self.watched.anchor && b == self.watched.remote {
            self.watched.tdoa = distance_diff;
        }
        if b == self.watched.anchor && a == self.watched.remote {
            self.watched.tdoa = -distance_diff;
        }
    }

    fn counters_mut(&mut self) -> [&mut RateCounter; 7] {
        [
            &mut self.packets_received,
            &mut self.packets_to_estimator,
            &mut self.clock_correction_count,
            &mut self.context_hit_count,
            &mut self.context_miss_count,
            &mut self.time_is_good,
            &mut self.suitable_data_found,
        ]
    }

    /// Serializable copy of the current rates and watched values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.rate(),
            packets_to_estimator: self.packets_to_estimator.rate(),
            clock_correction_count: self.clock_correction_count.rate(),
            context_hit_count: self.context_hit_count.rate(),
            context_miss_count: self.context_miss_count.rate(),
            time_is_good: self.time_is_good.rate(),
            suitable_data_found: self.suitable_data_found.rate(),
            watched: self.watched,
        }
    }
}

/// Rates (events per second) at the last interval boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub packets_received: f32,
    pub packets_to_estimator: f32,
    pub clock_correction_count: f32,
    pub context_hit_count: f32,
    pub context_miss_count: f32,
    pub time_is_good: f32,
    pub suitable_data_found: f32,
    pub watched: WatchedPair,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rate_counter() {
        let mut counter = RateCounter::new(500, 1_000);
        for _ in 0..50 {
            counter.event();
        }

        assert!(!counter.update(1_499));
        assert_eq!(counter.pending(), 50);

        assert!(counter.update(1_500));
        assert_relative_eq!(counter.rate(), 100.0);
        assert_eq!(counter.pending(), 0);
    }

    #[test]
    fn test_watch_latched_at_interval() {
        let mut stats = TdoaStats::new(500, 0);
        stats.watch(AnchorId(3), AnchorId(4));

        stats.record_tdoa(AnchorId(4), AnchorId(3), 1.25);
        assert_eq!(stats.watched().tdoa, 0.0);

        stats.update(400);
        assert_eq!(stats.watched().anchor, AnchorId(0));

        stats.update(501);
        assert_eq!(stats.watched().anchor, AnchorId(3));
        assert_eq!(stats.watched().remote, AnchorId(4));
    }

    #[test]
    fn test_watch_latched_across_clock_wrap() {
        let mut stats = TdoaStats::new(500, u32::MAX - 100);
        stats.watch(AnchorId(3), AnchorId(4));

        // Deadline wrapped to 399
        stats.update(u32::MAX - 50);
        stats.update(300);
        assert_eq!(stats.watched().anchor, AnchorId(0));

        stats.update(400);
        assert_eq!(stats.watched().anchor, AnchorId(3));
    }

    #[test]
    fn test_watched_values_reset_on_change() {
        let mut stats = TdoaStats::new(500, 0);
        stats.watch(AnchorId(3), AnchorId(4));
        stats.update(501);

        stats.record_clock_correction(AnchorId(3), 1.000_001);
        stats.record_tof(AnchorId(3), AnchorId(4), 42);
        stats.record_tdoa(AnchorId(4), AnchorId(3), 1.25);
        assert_eq!(stats.watched().clock_correction, 1.000_001);
        assert_eq!(stats.watched().tof, 42);

        stats.watch(AnchorId(3), AnchorId(5));
        stats.update(1_002);

        assert_eq!(stats.watched().clock_correction, 1.000_001);
        assert_eq!(stats.watched().tof, 0);
        assert_eq!(stats.watched().tdoa, 0.0);
    }

    #[test]
    fn test_watched_tdoa_sign() {
        let mut stats = TdoaStats::new(500, 0);
        stats.watch(AnchorId(1), AnchorId(2));
        stats.update(501);

        stats.record_tdoa(AnchorId(1), AnchorId(2), 0.5);
        assert_eq!(stats.watched().tdoa, 0.5);

        stats.record_tdoa(AnchorId(2), AnchorId(1), 0.5);
        assert_eq!(stats.watched().tdoa, -0.5);

        stats.record_tdoa(AnchorId(1), AnchorId(7), 9.0);
        assert_eq!(stats.watched().tdoa, -0.5);
    }

    #[test]
    fn test_clock_count_only_for_watched_anchor() {
        let mut stats = TdoaStats::new(500, 0);
        stats.record_clock_correction(AnchorId(0), 1.0);
        stats.record_clock_correction(AnchorId(9), 1.0);
        assert_eq!(stats.clock_correction_count.pending(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut stats = TdoaStats::new(500, 0);
        stats.packets_received.event();
        stats.update(1_000);

        let snapshot = stats.snapshot();
        assert_relative_eq!(snapshot.packets_received, 1.0);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("packets_received"));
    }
}
