//! Scenario runner - executes TDoA stress scenarios against ground truth.

use std::collections::BTreeSet;

use tdoa_core::{AnchorId, EngineConfig, MatchingAlgorithm, StatsSnapshot};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::exporter::SimExport;
use crate::scenarios::ScenarioId;
use crate::world::{MeasurementRecord, SimConfig, SimWorld};

/// RMS error every scenario must stay below (m)
const MAX_RMS_ERROR: f64 = 0.1;

/// No single measurement may be off by more than this (m)
const MAX_ABS_ERROR: f64 = 0.5;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Packets transmitted by all anchors
    pub packets_sent: u64,

    /// Packets the tag received
    pub packets_received: u64,

    /// Measurements emitted by the engine
    pub measurements: u64,

    /// RMS of measured minus true distance difference (m)
    pub rms_error: f64,

    /// Largest absolute error (m)
    pub max_error: f64,

    /// Number of distinct unordered anchor pairs measured
    pub distinct_pairs: usize,

    /// Engine rates at the end of the run
    pub stats: Option<StatsSnapshot>,
}

impl ScenarioMetrics {
    fn from_world(world: &SimWorld) -> Self {
        let records = world.records();
        let (sum_sq, max_error) = records.iter().fold((0.0, 0.0_f64), |(sum, max), r| {
            (sum + r.error * r.error, max.max(r.error.abs()))
        });
        let rms_error = if records.is_empty() {
            0.0
        } else {
            (sum_sq / records.len() as f64).sqrt()
        };

        Self {
            packets_sent: world.packets_sent(),
            packets_received: world.packets_received(),
            measurements: records.len() as u64,
            rms_error,
            max_error,
            distinct_pairs: distinct_pairs(records),
            stats: Some(world.engine().stats().snapshot()),
        }
    }

    /// Measurements per received packet.
    pub fn yield_ratio(&self) -> f64 {
        if self.packets_received == 0 {
            0.0
        } else {
            self.measurements as f64 / self.packets_received as f64
        }
    }
}

fn distinct_pairs(records: &[MeasurementRecord]) -> usize {
    records
        .iter()
        .map(|r| {
            let [a, b] = r.anchor_ids;
            (a.min(b), a.max(b))
        })
        .collect::<BTreeSet<(AnchorId, AnchorId)>>()
        .len()
}

/// Runs TDoA scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of anchors
    num_anchors: usize,

    /// Simulated duration in seconds
    max_duration_secs: f64,

    /// Matching override for scenarios that do not force one
    matching: Option<MatchingAlgorithm>,

    /// Engine configuration the scenarios start from
    engine: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_anchors: usize) -> Self {
        Self {
            seed,
            num_anchors,
            max_duration_secs: 5.0,
            matching: None,
            engine: EngineConfig::default(),
        }
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Overrides the matching algorithm.
    pub fn with_matching(mut self, matching: MatchingAlgorithm) -> Self {
        self.matching = Some(matching);
        self
    }

    /// Sets the base engine configuration.
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Builds the world configuration for a scenario.
    pub fn sim_config(&self, scenario: ScenarioId) -> SimConfig {
        let mut engine = self.engine.clone();
        if let Some(matching) = self.matching {
            engine.matching = matching;
        }

        let base = SimConfig {
            seed: self.seed,
            num_anchors: self.num_anchors,
            ..Default::default()
        };

        match scenario {
            ScenarioId::Nominal => SimConfig { engine, ..base },
            ScenarioId::ClockDrift => SimConfig {
                clock_drift_ppm: 8.0,
                engine,
                ..base
            },
            ScenarioId::PacketLoss => SimConfig {
                tag_packet_loss: 0.33,
                engine,
                ..base
            },
            ScenarioId::TimerWrap => SimConfig {
                wrap_after_s: Some(1.0),
                engine,
                ..base
            },
            ScenarioId::AnchorChurn => SimConfig {
                engine: engine.with_anchor_capacity(self.num_anchors + 2),
                ..base
            },
            ScenarioId::RandomMatching => SimConfig {
                engine: engine.with_matching(MatchingAlgorithm::Random),
                ..base
            },
        }
    }

    fn duration(&self, scenario: ScenarioId) -> f64 {
        match scenario {
            // Every counter wraps between 1 and 2 s in
            ScenarioId::TimerWrap => self.max_duration_secs.max(3.0),
            _ => self.max_duration_secs,
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        self.execute(scenario).map(|(_, result)| result)
    }

    /// Runs a scenario and also captures every measurement for export.
    pub fn run_with_export(
        &self,
        scenario: ScenarioId,
    ) -> Result<(ScenarioResult, SimExport), SimError> {
        let (world, result) = self.execute(scenario)?;
        let mut export = SimExport::from_world(scenario.name(), &world);
        export.finalize(result.passed, Some(result.metrics.rms_error));
        Ok((result, export))
    }

    fn execute(&self, scenario: ScenarioId) -> Result<(SimWorld, ScenarioResult), SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let config = self.sim_config(scenario);
        let duration = self.duration(scenario);
        let mut world = SimWorld::new(config)?;

        let failure = match scenario {
            ScenarioId::AnchorChurn => self.run_anchor_churn(&mut world, duration),
            _ => {
                world.run_until(duration);
                let metrics = ScenarioMetrics::from_world(&world);
                match scenario {
                    ScenarioId::TimerWrap => check_after(&world, 2.0, "all counters wrapped"),
                    ScenarioId::RandomMatching => self.check_pair_coverage(&metrics),
                    _ => None,
                }
            }
        };

        let metrics = ScenarioMetrics::from_world(&world);
        let failure = check_accuracy(scenario, &metrics).or(failure);
        let passed = failure.is_none();

        if passed {
            info!(
                "✓ {} complete: {} measurements, RMS error: {:.4}m, max: {:.4}m",
                scenario.name(),
                metrics.measurements,
                metrics.rms_error,
                metrics.max_error
            );
        } else if let Some(reason) = &failure {
            warn!("✗ {} failed: {}", scenario.name(), reason);
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            final_time_secs: world.oracle.time(),
            failure_reason: failure,
            metrics,
        };
        Ok((world, result))
    }

    /// TDOA-005: the constellation is swapped halfway through with an anchor
    /// table barely larger than one constellation. The engine must recycle
    /// the old slots and resume producing measurements for the new ids.
    fn run_anchor_churn(&self, world: &mut SimWorld, duration: f64) -> Option<String> {
        let half = duration / 2.0;
        world.run_until(half);
        world.replace_anchors();
        let swapped_at = world.time_s();
        let new_ids: BTreeSet<AnchorId> = world.anchor_ids().into_iter().collect();
        debug!("  t={:.2}s | anchors replaced", swapped_at);

        world.run_until(duration);

        let storage = world.engine().storage();
        let stale = storage.anchor_ids().filter(|id| !new_ids.contains(id)).count();
        if storage.len() - stale < new_ids.len() {
            return Some(format!(
                "only {} of {} new anchors stored",
                storage.len() - stale,
                new_ids.len()
            ));
        }

        check_after(world, swapped_at, "anchors replaced")
    }

    fn check_pair_coverage(&self, metrics: &ScenarioMetrics) -> Option<String> {
        let n = self.num_anchors;
        let required = (2 * n).min(n * (n - 1) / 2);
        if metrics.distinct_pairs < required {
            Some(format!(
                "random matching covered {} pairs, expected at least {}",
                metrics.distinct_pairs, required
            ))
        } else {
            None
        }
    }
}

/// Fails unless measurements were produced after `time_s`.
fn check_after(world: &SimWorld, time_s: f64, event: &str) -> Option<String> {
    let after = world.records().iter().filter(|r| r.time_s > time_s).count();
    if after == 0 {
        Some(format!("no measurements after {} at {:.2}s", event, time_s))
    } else {
        None
    }
}

fn check_accuracy(scenario: ScenarioId, metrics: &ScenarioMetrics) -> Option<String> {
    let min_yield = match scenario {
        ScenarioId::AnchorChurn => 0.2,
        _ => 0.25,
    };

    if metrics.measurements == 0 {
        Some("no measurements produced".to_string())
    } else if metrics.rms_error >= MAX_RMS_ERROR {
        Some(format!(
            "RMS error {:.3}m exceeds threshold {:.2}m",
            metrics.rms_error, MAX_RMS_ERROR
        ))
    } else if metrics.max_error >= MAX_ABS_ERROR {
        Some(format!(
            "max error {:.3}m exceeds threshold {:.2}m",
            metrics.max_error, MAX_ABS_ERROR
        ))
    } else if metrics.yield_ratio() < min_yield {
        Some(format!(
            "{} measurements from {} packets, expected at least {:.0}%",
            metrics.measurements,
            metrics.packets_received,
            min_yield * 100.0
        ))
    } else {
        None
    }
}
