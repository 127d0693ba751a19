//! SimWorld - The simulation harness container.
//!
//! Anchors transmit round-robin, one per slot. Every anchor hears every other
//! anchor and reports, in each of its packets, when it heard its neighbours'
//! latest packets together with the neighbours' times of flight. The tag
//! receives each packet with some probability and feeds it to the engine.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tdoa_core::constants::{ANCHOR_TS_MASK, SEQ_NR_MASK};
use tdoa_core::{
    AnchorId, EngineConfig, RangePacket, RemoteReport, TdoaEngine, TdoaMeasurement,
};
use tracing::debug;

use crate::clock::SimClock;
use crate::error::SimError;
use crate::oracle::Oracle;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of anchors in the constellation
    pub num_anchors: usize,

    /// Time between two consecutive anchor transmissions (s)
    pub slot_period_s: f64,

    /// Probability that the tag misses a packet
    pub tag_packet_loss: f64,

    /// Standard deviation of rx timestamping error (ticks)
    pub timestamp_jitter_ticks: f64,

    /// Clock drifts are drawn uniformly from +-this value (ppm)
    pub clock_drift_ppm: f64,

    /// How often each anchor includes its position in a packet (s)
    pub position_period_s: f64,

    /// Id of the first anchor
    pub anchor_id_offset: u8,

    /// If set, every clock wraps between this many and one more seconds in
    pub wrap_after_s: Option<f64>,

    /// Tag speed (m/s)
    pub tag_speed: f64,

    /// Radius of the anchor ring (m)
    pub anchor_radius: f64,

    /// Height of the upper anchors (m)
    pub anchor_height: f64,

    /// Engine under test
    pub engine: EngineConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_anchors: 8,
            slot_period_s: 0.002,
            tag_packet_loss: 0.0,
            timestamp_jitter_ticks: 2.0,
            clock_drift_ppm: 2.0,
            position_period_s: 0.25,
            anchor_id_offset: 0,
            wrap_after_s: None,
            tag_speed: 0.5,
            anchor_radius: 4.0,
            anchor_height: 2.5,
            engine: EngineConfig::default(),
        }
    }
}

impl SimConfig {
    /// Checks parameters the engine does not validate itself.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_anchors < 2 || self.num_anchors > 128 {
            return Err(SimError::invalid(format!(
                "num_anchors {} outside [2, 128]",
                self.num_anchors
            )));
        }
        // A constellation larger than the table evicts every anchor before it calibrates
        if self.num_anchors > self.engine.anchor_capacity {
            return Err(SimError::invalid(format!(
                "num_anchors {} exceeds engine anchor_capacity {}",
                self.num_anchors, self.engine.anchor_capacity
            )));
        }
        if !(self.slot_period_s > 0.0) {
            return Err(SimError::invalid("slot_period_s must be positive"));
        }
        if !(0.0..1.0).contains(&self.tag_packet_loss) {
            return Err(SimError::invalid(format!(
                "tag_packet_loss {} outside [0, 1)",
                self.tag_packet_loss
            )));
        }
        if !(self.clock_drift_ppm >= 0.0 && self.clock_drift_ppm < 10.0) {
            return Err(SimError::invalid(format!(
                "clock_drift_ppm {} outside [0, 10)",
                self.clock_drift_ppm
            )));
        }
        Ok(())
    }
}

/// When an anchor last heard one of its neighbours.
#[derive(Debug, Clone, Copy)]
struct Heard {
    rx_time: i64,
    seq_nr: u8,
}

/// A simulated anchor.
#[derive(Debug, Clone)]
pub struct SimAnchor {
    pub id: AnchorId,
    pub clock: SimClock,
    seq_nr: u8,
    heard: Vec<Option<Heard>>,
    last_position_s: Option<f64>,
}

/// An emitted measurement next to the truth at the time it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub time_s: f64,
    pub anchor_ids: [AnchorId; 2],
    pub distance_diff: f64,
    pub true_distance_diff: f64,
    pub error: f64,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Ground truth oracle
    pub oracle: Oracle,

    engine: TdoaEngine<Vec<TdoaMeasurement>>,
    tag_clock: SimClock,
    anchors: Vec<SimAnchor>,

    /// RNG for radio effects (loss, jitter, clocks)
    radio_rng: ChaCha8Rng,
    jitter: Normal<f64>,

    slot: u64,
    records: Vec<MeasurementRecord>,
    packets_sent: u64,
    packets_received: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;

        // Derive separate seeds so the trajectory does not depend on radio noise
        let radio_seed = config.seed;
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let mut physics_rng = ChaCha8Rng::seed_from_u64(physics_seed);
        let heading = physics_rng.gen_range(0.0..std::f64::consts::TAU);
        let climb = physics_rng.gen_range(-0.2..0.2);
        let velocity = Vector3::new(heading.cos(), heading.sin(), climb).normalize() * config.tag_speed;

        let positions =
            Oracle::anchor_ring(config.num_anchors, config.anchor_radius, config.anchor_height);
        let oracle = Oracle::new(positions, velocity);

        let jitter = Normal::new(0.0, config.timestamp_jitter_ticks)
            .map_err(|e| SimError::invalid(format!("timestamp_jitter_ticks: {e}")))?;

        let engine = TdoaEngine::new(0, Vec::new(), config.engine.clone())?;

        let mut radio_rng = ChaCha8Rng::seed_from_u64(radio_seed);
        let tag_clock = random_clock(&mut radio_rng, &config);
        let anchors = (0..config.num_anchors)
            .map(|i| SimAnchor {
                id: AnchorId(config.anchor_id_offset.wrapping_add(i as u8)),
                clock: random_clock(&mut radio_rng, &config),
                seq_nr: 0,
                heard: vec![None; config.num_anchors],
                last_position_s: None,
            })
            .collect();

        debug!(
            seed = config.seed,
            anchors = config.num_anchors,
            tag_drift_ppm = tag_clock.drift_ppm(),
            "Simulation world created"
        );

        Ok(Self {
            config,
            oracle,
            engine,
            tag_clock,
            anchors,
            radio_rng,
            jitter,
            slot: 0,
            records: Vec::new(),
            packets_sent: 0,
            packets_received: 0,
        })
    }

    /// Simulates the next anchor transmission. Returns the number of
    /// measurements the engine produced for it.
    pub fn step(&mut self) -> usize {
        let t = self.time_s();
        self.oracle.step(t - self.oracle.time());

        let n = self.anchors.len();
        let k = (self.slot % n as u64) as usize;
        self.slot += 1;

        let reports: Vec<RemoteReport> = (0..n)
            .filter(|&j| j != k)
            .filter_map(|j| {
                let heard = self.anchors[k].heard[j]?;
                let tof = self.anchors[k]
                    .clock
                    .interval_ticks(self.oracle.anchor_flight_time(j, k));
                Some(RemoteReport {
                    anchor: self.anchors[j].id,
                    rx_time: heard.rx_time,
                    seq_nr: heard.seq_nr,
                    tof: tof.round() as i64,
                })
            })
            .collect();

        let sender = &self.anchors[k];
        let id = sender.id;
        let seq_nr = sender.seq_nr;
        let tx_time = sender.clock.timestamp(t);
        let position_due = sender
            .last_position_s
            .map_or(true, |last| t - last >= self.config.position_period_s);
        let position = position_due.then(|| self.oracle.anchor_position(k));
        if position_due {
            self.anchors[k].last_position_s = Some(t);
        }

        for j in (0..n).filter(|&j| j != k) {
            let arrival = t + self.oracle.anchor_flight_time(k, j);
            let noise = self.jitter.sample(&mut self.radio_rng);
            let rx_time = self.anchors[j].clock.timestamp_with_noise(arrival, noise);
            self.anchors[j].heard[k] = Some(Heard { rx_time, seq_nr });
        }
        self.anchors[k].seq_nr = seq_nr.wrapping_add(1) & SEQ_NR_MASK;
        self.packets_sent += 1;

        if self.radio_rng.gen::<f64>() < self.config.tag_packet_loss {
            return 0;
        }
        self.packets_received += 1;

        let arrival = t + self.oracle.tag_flight_time(k);
        let noise = self.jitter.sample(&mut self.radio_rng);
        let tag_rx_time = self.tag_clock.timestamp_with_noise(arrival, noise);

        let packet = RangePacket {
            source: id,
            tx_time,
            seq_nr,
            remote: &reports,
            position,
        };
        self.engine.handle_packet(&packet, tag_rx_time, (t * 1000.0) as u32);

        self.collect_measurements(t)
    }

    fn collect_measurements(&mut self, t: f64) -> usize {
        let emitted = std::mem::take(self.engine.sink_mut());
        for measurement in &emitted {
            let truth = self.oracle.true_distance_diff(measurement);
            self.records.push(MeasurementRecord {
                time_s: t,
                anchor_ids: measurement.anchor_ids,
                distance_diff: measurement.distance_diff,
                true_distance_diff: truth,
                error: measurement.distance_diff - truth,
            });
        }
        emitted.len()
    }

    /// Runs until the simulated time reaches `end_s`.
    pub fn run_until(&mut self, end_s: f64) {
        while self.time_s() < end_s {
            self.step();
        }
    }

    /// Swaps every anchor for new hardware with fresh ids and clocks, as if
    /// the tag had moved into a different part of the installation.
    pub fn replace_anchors(&mut self) {
        let n = self.anchors.len();
        for i in 0..n {
            let clock = random_clock(&mut self.radio_rng, &self.config);
            let anchor = &mut self.anchors[i];
            anchor.id = AnchorId(anchor.id.0.wrapping_add(n as u8));
            anchor.clock = clock;
            anchor.seq_nr = 0;
            anchor.heard.iter_mut().for_each(|h| *h = None);
            anchor.last_position_s = None;
        }
        debug!(first = %self.anchors[0].id, "Replaced anchor constellation");
    }

    /// True time of the next slot (s).
    pub fn time_s(&self) -> f64 {
        self.slot as f64 * self.config.slot_period_s
    }

    pub fn engine(&self) -> &TdoaEngine<Vec<TdoaMeasurement>> {
        &self.engine
    }

    pub fn anchors(&self) -> &[SimAnchor] {
        &self.anchors
    }

    pub fn anchor_ids(&self) -> Vec<AnchorId> {
        self.anchors.iter().map(|a| a.id).collect()
    }

    pub fn tag_clock(&self) -> &SimClock {
        &self.tag_clock
    }

    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }
}

fn random_clock(rng: &mut ChaCha8Rng, config: &SimConfig) -> SimClock {
    let frequency = config.engine.tick_frequency_hz;
    let drift_ppm = if config.clock_drift_ppm > 0.0 {
        rng.gen_range(-config.clock_drift_ppm..config.clock_drift_ppm)
    } else {
        0.0
    };

    let offset = match config.wrap_after_s {
        Some(wrap_s) => {
            let before_wrap = (wrap_s + rng.gen::<f64>()) * frequency * (1.0 + drift_ppm * 1e-6);
            ((ANCHOR_TS_MASK + 1) as f64 - before_wrap).max(0.0) as u64
        }
        None => rng.gen_range(0..=ANCHOR_TS_MASK),
    };

    SimClock::new(frequency, drift_ppm, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimConfig {
        SimConfig {
            num_anchors: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_round_robin_and_sequence_numbers() {
        let mut world = SimWorld::new(config()).unwrap();
        for _ in 0..8 {
            world.step();
        }

        assert_eq!(world.packets_sent(), 8);
        assert_eq!(world.packets_received(), 8);
        assert!(world.anchors().iter().all(|a| a.seq_nr == 2));
    }

    #[test]
    fn test_world_produces_accurate_measurements() {
        let mut world = SimWorld::new(config()).unwrap();
        world.run_until(1.0);

        let records = world.records();
        assert!(records.len() > 100);
        assert!(records.iter().all(|r| r.error.abs() < 0.3));
        assert_eq!(world.engine().storage().len(), 4);
    }

    #[test]
    fn test_same_seed_same_records() {
        let mut a = SimWorld::new(config()).unwrap();
        let mut b = SimWorld::new(config()).unwrap();
        a.run_until(0.5);
        b.run_until(0.5);

        assert_eq!(a.records(), b.records());
    }

    #[test]
    fn test_wrap_offsets() {
        let config = SimConfig {
            wrap_after_s: Some(1.0),
            ..config()
        };
        let world = SimWorld::new(config).unwrap();

        for anchor in world.anchors() {
            let wrap = anchor.clock.first_wrap_s();
            assert!((1.0..2.0).contains(&wrap), "wraps at {wrap}");
        }
    }

    #[test]
    fn test_replace_anchors() {
        let mut world = SimWorld::new(config()).unwrap();
        world.run_until(0.1);
        world.replace_anchors();

        assert_eq!(
            world.anchor_ids(),
            vec![AnchorId(4), AnchorId(5), AnchorId(6), AnchorId(7)]
        );
    }

    #[test]
    fn test_invalid_config() {
        let config = SimConfig {
            num_anchors: 1,
            ..Default::default()
        };
        assert!(matches!(
            SimWorld::new(config),
            Err(SimError::InvalidParameter(_))
        ));

        let config = SimConfig {
            num_anchors: 20,
            ..Default::default()
        };
        assert!(matches!(
            SimWorld::new(config),
            Err(SimError::InvalidParameter(_))
        ));
    }
}
