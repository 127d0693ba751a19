//! The per-packet TDoA pipeline.
//!
//! The tag moves through a large system of anchors, of which 5 to 20 are in
//! range at any point. Each anchor broadcasts its tx time and the rx times of
//! the packets it heard from its neighbours. For every packet from anchor A
//! the engine:
//!
//! 1. updates the clock correction between A and the tag,
//! 2. if the clock sample is reliable, picks an anchor B that A heard and
//!    the tag heard too,
//! 3. computes the time difference of arrival between B and A in tag ticks,
//! 4. hands the distance difference to the measurement sink if both anchor
//!    positions are known.
//!
//! Every failure along the way drops the packet silently; the next packet is
//! an independent attempt.

use tracing::debug;

use crate::clock_correction::ClockCorrectionEngine;
use crate::config::EngineConfig;
use crate::constants::{truncate_to_anchor_ts, ANCHOR_TS_MASK, SPEED_OF_LIGHT};
use crate::error::ConfigError;
use crate::matching::{Matcher, MatchingAlgorithm};
use crate::measurement::{MeasurementSink, TdoaMeasurement};
use crate::stats::TdoaStats;
use crate::storage::{AnchorCtx, AnchorStorage};
use crate::types::{AnchorId, AnchorPosition};

/// TDoA engine owning its anchor storage, clock filters and stats.
pub struct TdoaEngine<S: MeasurementSink> {
    pub(crate) storage: AnchorStorage,
    pub(crate) stats: TdoaStats,
    clock: ClockCorrectionEngine,
    matcher: Matcher,
    sink: S,
    tick_frequency_hz: f64,
    measurement_std_dev: f64,
}

impl<S: MeasurementSink> TdoaEngine<S> {
    /// Creates an engine. Measurements are passed to `sink`.
    pub fn new(now_ms: u32, sink: S, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        debug!(
            anchors = config.anchor_capacity,
            remotes = config.remote_capacity,
            matching = %config.matching,
            tick_frequency_hz = config.tick_frequency_hz,
            "TDoA engine initialized"
        );

        Ok(Self {
            storage: AnchorStorage::from_config(&config)?,
            stats: TdoaStats::new(config.stats_interval_ms, now_ms),
            clock: ClockCorrectionEngine::new(config.clock),
            matcher: Matcher::new(config.matching, config.remote_capacity),
            sink,
            tick_frequency_hz: config.tick_frequency_hz,
            measurement_std_dev: config.measurement_std_dev,
        })
    }

    /// Looks up or creates the context for a packet from `anchor`.
    pub fn anchor_ctx_for_packet(&mut self, anchor: AnchorId, now_ms: u32) -> AnchorCtx {
        self.stats.update(now_ms);

        let (ctx, found) = self.storage.get_or_create(anchor, now_ms);
        if found {
            self.stats.context_hit_count.event();
        } else {
            self.stats.context_miss_count.event();
        }
        ctx
    }

    /// Processes a packet from the anchor behind `ctx`.
    ///
    /// `tx_time` is the anchor's tx timestamp in its own clock and `rx_time`
    /// the tag's rx timestamp. Returns true if the clock sample was reliable.
    pub fn process_packet(&mut self, ctx: &AnchorCtx, tx_time: i64, rx_time: i64) -> bool {
        self.process_packet_filtered(ctx, tx_time, rx_time, None)
    }

    /// Like [`process_packet`](Self::process_packet), but never pairs with `exclude`.
    pub fn process_packet_filtered(
        &mut self,
        ctx: &AnchorCtx,
        tx_time: i64,
        rx_time: i64,
        exclude: Option<AnchorId>,
    ) -> bool {
        let time_is_good = self.update_clock_correction(ctx, tx_time, rx_time);
        if !time_is_good {
            return false;
        }
        self.stats.time_is_good.event();

        if let Some(other) = self.find_suitable_anchor(ctx, exclude) {
            self.stats.suitable_data_found.event();
            if let Some(distance_diff) = self.calc_distance_diff(&other, ctx, tx_time, rx_time) {
                self.enqueue_tdoa(&other, ctx, distance_diff);
            }
        }

        true
    }

    fn update_clock_correction(&mut self, ctx: &AnchorCtx, tx_time: i64, rx_time: i64) -> bool {
        let (Some(latest_rx), Some(latest_tx)) =
            (self.storage.rx_time(ctx), self.storage.tx_time(ctx))
        else {
            return false;
        };

        let candidate = ClockCorrectionEngine::calculate(
            rx_time as u64,
            latest_rx as u64,
            tx_time as u64,
            latest_tx as u64,
            ANCHOR_TS_MASK,
        );
        let reliable = self
            .clock
            .update(self.storage.clock_correction_state_mut(ctx), candidate);

        if reliable {
            let ratio = self.storage.clock_correction(ctx);
            self.stats.record_clock_correction(ctx.id(), ratio);
        }
        reliable
    }

    fn find_suitable_anchor(
        &mut self,
        ctx: &AnchorCtx,
        exclude: Option<AnchorId>,
    ) -> Option<AnchorCtx> {
        if self.storage.clock_correction(ctx) <= 0.0 {
            return None;
        }
        self.matcher.find(&self.storage, ctx, exclude)
    }

    /// TDoA between `other` (B) and `ctx` (A) in tag ticks.
    fn calc_tdoa(
        &self,
        other: &AnchorCtx,
        ctx: &AnchorCtx,
        tx_an: i64,
        rx_an_by_t: i64,
    ) -> Option<f64> {
        let tof_ar_to_an = self.storage.remote_tof(ctx, other.id())?;
        let rx_ar_by_an = self.storage.remote_rx_time(ctx, other.id())?;
        let rx_ar_by_t = self.storage.rx_time(other)?;
        let clock_correction = self.storage.clock_correction(ctx);

        // Time between B's and A's transmissions, in A's clock
        let delta_tx_ar_to_tx_an =
            tof_ar_to_an + truncate_to_anchor_ts(tx_an.wrapping_sub(rx_ar_by_an));
        let rx_diff = truncate_to_anchor_ts(rx_an_by_t.wrapping_sub(rx_ar_by_t));
        let time_diff_of_arrival = rx_diff as f64 - delta_tx_ar_to_tx_an as f64 * clock_correction;

        Some(time_diff_of_arrival)
    }

    fn calc_distance_diff(
        &self,
        other: &AnchorCtx,
        ctx: &AnchorCtx,
        tx_an: i64,
        rx_an_by_t: i64,
    ) -> Option<f64> {
        let tdoa = self.calc_tdoa(other, ctx, tx_an, rx_an_by_t)?;
        Some(SPEED_OF_LIGHT * tdoa / self.tick_frequency_hz)
    }

    fn enqueue_tdoa(&mut self, a: &AnchorCtx, b: &AnchorCtx, distance_diff: f64) {
        let (Some(position_a), Some(position_b)) =
            (self.storage.anchor_position(a), self.storage.anchor_position(b))
        else {
            return;
        };

        self.stats.packets_to_estimator.event();
        self.stats.record_tdoa(a.id(), b.id(), distance_diff);

        let measurement = TdoaMeasurement {
            anchor_ids: [a.id(), b.id()],
            anchor_positions: [position_a.point, position_b.point],
            distance_diff,
            std_dev: self.measurement_std_dev,
        };
        self.sink.send(&measurement);
    }

    /// Standard deviation attached to later measurements.
    pub fn set_measurement_std_dev(&mut self, std_dev: f64) {
        self.measurement_std_dev = std_dev;
    }

    pub fn measurement_std_dev(&self) -> f64 {
        self.measurement_std_dev
    }

    pub fn matching_algorithm(&self) -> MatchingAlgorithm {
        self.matcher.algorithm()
    }

    pub fn tick_frequency_hz(&self) -> f64 {
        self.tick_frequency_hz
    }

    /// Selects the anchor pair to collect debug values for.
    pub fn watch(&mut self, anchor: AnchorId, remote: AnchorId) {
        self.stats.watch(anchor, remote);
    }

    /// Fresh position of `anchor`, if it is stored.
    pub fn anchor_position(&self, anchor: AnchorId, now_ms: u32) -> Option<AnchorPosition> {
        let ctx = self.storage.get(anchor, now_ms)?;
        self.storage.anchor_position(&ctx)
    }

    pub fn set_anchor_position(&mut self, ctx: &AnchorCtx, x: f64, y: f64, z: f64) {
        self.storage.set_anchor_position(ctx, x, y, z);
    }

    /// Writes the stored anchor ids into `out`; returns how many were written.
    pub fn anchor_id_list(&self, out: &mut [AnchorId]) -> usize {
        self.storage.anchor_id_list(out)
    }

    /// Writes the active anchor ids into `out`; returns how many were written.
    pub fn active_anchor_id_list(&self, out: &mut [AnchorId], now_ms: u32) -> usize {
        self.storage.active_anchor_id_list(out, now_ms)
    }

    pub fn storage(&self) -> &AnchorStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut AnchorStorage {
        &mut self.storage
    }

    pub fn stats(&self) -> &TdoaStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // One tick is one millimetre of light travel
    const TICK_FREQUENCY: f64 = SPEED_OF_LIGHT * 1000.0;
    const TICKS_PER_MS: i64 = 299_792_458;

    const A: AnchorId = AnchorId(1);
    const B: AnchorId = AnchorId(2);

    fn engine() -> TdoaEngine<Vec<TdoaMeasurement>> {
        let config = EngineConfig::default().with_tick_frequency(TICK_FREQUENCY);
        TdoaEngine::new(0, Vec::new(), config).unwrap()
    }

    /// Tag on the negative x axis, B at the origin, A at x = 3.
    /// Tag is 1 m from B and 4 m from A; A is 3 m from B. All clocks agree.
    struct Scene {
        engine: TdoaEngine<Vec<TdoaMeasurement>>,
        b_seq: u8,
        a_seq: u8,
        b_tx: i64,
        exclude: Option<AnchorId>,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                engine: engine(),
                b_seq: 0,
                a_seq: 0,
                b_tx: 0,
                exclude: None,
            }
        }

        fn packet_from_b(&mut self, now_ms: u32) -> bool {
            let tx = i64::from(now_ms) * TICKS_PER_MS;
            let rx = tx + 1_000;

            let ctx = self.engine.anchor_ctx_for_packet(B, now_ms);
            let reliable = self.engine.process_packet(&ctx, tx, rx);
            self.engine.storage_mut().set_rx_tx_data(&ctx, rx, tx, self.b_seq);
            self.engine.set_anchor_position(&ctx, 0.0, 0.0, 0.0);

            self.b_tx = tx;
            self.b_seq = self.b_seq.wrapping_add(1) & 0x7f;
            reliable
        }

        fn packet_from_a(&mut self, now_ms: u32, with_position: bool) -> bool {
            let tx = i64::from(now_ms) * TICKS_PER_MS;
            let rx = tx + 4_000;
            let last_b_seq = self.b_seq.wrapping_sub(1) & 0x7f;

            let ctx = self.engine.anchor_ctx_for_packet(A, now_ms);
            let storage = self.engine.storage_mut();
            storage.set_remote_rx_time(&ctx, B, self.b_tx + 3_000, last_b_seq);
            storage.set_remote_tof(&ctx, B, 3_000);

            let reliable = self
                .engine
                .process_packet_filtered(&ctx, tx, rx, self.exclude);
            self.engine.storage_mut().set_rx_tx_data(&ctx, rx, tx, self.a_seq);
            if with_position {
                self.engine.set_anchor_position(&ctx, 3.0, 0.0, 0.0);
            }

            self.a_seq = self.a_seq.wrapping_add(1) & 0x7f;
            reliable
        }

        /// B and A alternate every 5 ms. Returns the result of A's last packet.
        fn run(&mut self, rounds: u32, a_position: bool) -> bool {
            let mut reliable = false;
            for round in 0..rounds {
                self.packet_from_b(round * 10);
                reliable = self.packet_from_a(round * 10 + 5, a_position);
            }
            reliable
        }

        fn run_round(&mut self, round: u32) -> bool {
            self.packet_from_b(round * 10);
            self.packet_from_a(round * 10 + 5, true)
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig::default().with_anchor_capacity(0);
        assert!(TdoaEngine::new(0, Vec::new(), config).is_err());
    }

    #[test]
    fn test_unknown_anchor_without_history_is_dropped() {
        let mut engine = engine();
        let ctx = engine.anchor_ctx_for_packet(AnchorId(42), 100);

        assert!(!engine.process_packet(&ctx, 1_000, 2_000));
        assert!(engine.sink().is_empty());
        assert_eq!(engine.stats().context_miss_count.pending(), 1);
    }

    #[test]
    fn test_two_anchor_distance_difference() {
        let mut scene = Scene::new();

        // First A packet has no history, second only sets the clock reference
        assert!(!scene.run(2, true));
        assert!(scene.engine.sink().is_empty());

        assert!(scene.run_round(2));
        let measurements = scene.engine.sink();
        assert_eq!(measurements.len(), 1);

        let m = &measurements[0];
        assert_eq!(m.anchor_ids, [B, A]);
        assert_relative_eq!(m.distance_diff, 3.0, epsilon = 1e-3);
        assert_relative_eq!(m.std_dev, 0.15);
        assert_eq!(m.anchor_positions[0].x, 0.0);
        assert_eq!(m.anchor_positions[1].x, 3.0);
    }

    #[test]
    fn test_excluded_partner_is_not_used() {
        let mut scene = Scene::new();
        scene.exclude = Some(B);

        assert!(scene.run(4, true));
        assert!(scene.engine.sink().is_empty());
        assert_eq!(scene.engine.stats().suitable_data_found.pending(), 0);
    }

    #[test]
    fn test_missing_position_drops_measurement() {
        let mut scene = Scene::new();

        assert!(scene.run(4, false));
        assert!(scene.engine.sink().is_empty());
        assert_eq!(scene.engine.stats().suitable_data_found.pending(), 2);
    }

    #[test]
    fn test_std_dev_is_runtime_adjustable() {
        let mut scene = Scene::new();
        scene.run(2, true);
        scene.engine.set_measurement_std_dev(0.3);
        scene.run_round(2);

        assert_eq!(scene.engine.sink()[0].std_dev, 0.3);
    }

    #[test]
    fn test_watched_pair_records_tdoa() {
        let mut scene = Scene::new();
        scene.engine.watch(B, A);
        // Crossing the first stats interval latches the watch
        scene.engine.anchor_ctx_for_packet(B, 501);

        for round in 0..3 {
            let now = 600 + round * 10;
            scene.packet_from_b(now);
            scene.packet_from_a(now + 5, true);
        }

        let watched = scene.engine.stats().watched();
        assert_eq!(watched.anchor, B);
        assert_relative_eq!(watched.tdoa, 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_anchor_position_lookup() {
        let mut engine = engine();
        let ctx = engine.anchor_ctx_for_packet(A, 1_000);
        assert!(engine.anchor_position(A, 1_000).is_none());

        engine.set_anchor_position(&ctx, 1.0, 2.0, 3.0);
        assert_eq!(engine.anchor_position(A, 1_500).unwrap().point.z, 3.0);
        assert!(engine.anchor_position(A, 3_000).is_none());
        assert!(engine.anchor_position(B, 1_500).is_none());

        let mut ids = [AnchorId(0); 4];
        assert_eq!(engine.anchor_id_list(&mut ids), 1);
        assert_eq!(ids[0], A);
    }
}
