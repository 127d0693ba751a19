//! TDoA Simulator CLI
//!
//! Run deterministic simulations of a UWB anchor constellation against the
//! onboard TDoA engine.

use std::path::PathBuf;

use clap::Parser;
use tdoa_core::{EngineConfig, MatchingAlgorithm};
use tdoa_sim::scenarios::ScenarioId;
use tdoa_sim::{ScenarioResult, ScenarioRunner, SimError};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// TDoA Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "tdoa-sim")]
#[command(about = "Run deterministic TDoA simulations against ground truth", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of anchors
    #[arg(short, long, default_value = "8")]
    anchors: usize,

    /// Scenario to run (nominal, clock_drift, packet_loss, timer_wrap, anchor_churn, random_matching, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "5")]
    duration: f64,

    /// Matching algorithm (random, youngest)
    #[arg(short, long)]
    matching: Option<MatchingAlgorithm>,

    /// Engine configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export every measurement of a single scenario to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_engine_config(path: Option<&PathBuf>) -> Result<EngineConfig, SimError> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(EngineConfig::from_json(&json)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn build_runner(args: &Args, seed: u64, engine: &EngineConfig) -> ScenarioRunner {
    let runner = ScenarioRunner::new(seed, args.anchors)
        .with_duration(args.duration)
        .with_engine_config(engine.clone());
    match args.matching {
        Some(matching) => runner.with_matching(matching),
        None => runner,
    }
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        return;
    }
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | {} measurements, RMS {:.4}m",
            result.scenario.name(),
            result.seed,
            result.metrics.measurements,
            result.metrics.rms_error
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn run(args: &Args) -> Result<bool, SimError> {
    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args
            .scenario
            .parse()
            .map_err(|_| SimError::UnknownScenario(args.scenario.clone()))?]
    };

    let engine = load_engine_config(args.config.as_ref())?;

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            return Err(SimError::invalid(
                "--export only supports a single scenario, not 'all'",
            ));
        }

        let runner = build_runner(args, base_seed, &engine);
        let (result, export) = runner.run_with_export(scenarios[0])?;
        export.write_to_file(export_path)?;
        info!(
            "Exported {} measurements to {}",
            export.measurements.len(),
            export_path.display()
        );
        report(&result, args.json);
        return Ok(result.passed);
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = build_runner(args, seed, &engine);

        for scenario in &scenarios {
            let result = runner.run(*scenario)?;
            report(&result, args.json);
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "time_secs": r.final_time_secs,
                    "packets_sent": r.metrics.packets_sent,
                    "packets_received": r.metrics.packets_received,
                    "measurements": r.metrics.measurements,
                    "rms_error": r.metrics.rms_error,
                    "max_error": r.metrics.max_error,
                    "distinct_pairs": r.metrics.distinct_pairs,
                    "stats": r.metrics.stats,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(failed_count == 0)
}

fn main() {
    let args = Args::parse();

    // Initialize logging, RUST_LOG overrides --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("TDoA Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e, SimError::UnknownScenario(_)) {
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
            }
            std::process::exit(1);
        }
    }
}
