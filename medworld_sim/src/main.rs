//! MedWorld Replay CLI
//!
//! Run scripted clinical episodes and score them against ground truth.

use clap::Parser;
use medworld_core::{CaseCatalog, NoiseProfile};
use medworld_sim::{
    builtin_suite, generate_batch, EpisodeId, EvalError, JsonReportWriter, ReplayConfig, ReplayEpisode,
    ReplayExport, ReplayRunner, ReportWriter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// MedWorld replay evaluation CLI
#[derive(Parser, Debug)]
#[command(name = "medworld-replay")]
#[command(about = "Replay scripted clinical episodes and score them", long_about = None)]
struct Args {
    /// Master seed (overrides the config file)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Generate this many pathway episodes instead of the built-in suite
    #[arg(short, long)]
    episodes: Option<usize>,

    /// Run the built-in named suite (default)
    #[arg(long, conflicts_with_all = ["episodes", "episode"])]
    suite: bool,

    /// Run a single built-in episode (st_elevation, pneumonia, appendicitis, cystitis, stroke)
    #[arg(short = 'E', long)]
    episode: Option<String>,

    /// Default-layer corruption probability
    #[arg(short, long)]
    noise: Option<f64>,

    /// Six-layer noise profile JSON file
    #[arg(long)]
    noise_profile: Option<PathBuf>,

    /// Directory of case JSON documents replacing the built-in catalog
    #[arg(long)]
    cases: Option<PathBuf>,

    /// Replay config JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Episodes kept in flight at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Apply quality thresholds and exit non-zero on failure
    #[arg(long)]
    gate: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Write the full report to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn read(path: &Path) -> Result<String, EvalError> {
    std::fs::read_to_string(path).map_err(|e| EvalError::report(format!("{}: {}", path.display(), e)))
}

fn load_config(args: &Args) -> Result<ReplayConfig, EvalError> {
    let mut config = match &args.config {
        Some(path) => ReplayConfig::from_json(&read(path)?)?,
        None => ReplayConfig::default(),
    };
    if let Some(path) = &args.noise_profile {
        config.noise = NoiseProfile::from_json(&read(path)?)?;
    }
    if let Some(p) = args.noise {
        config.noise = config.noise.with_default(p);
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.validate()?;
    Ok(config)
}

fn select_episodes(args: &Args, catalog: &CaseCatalog, config: &ReplayConfig) -> Result<(String, Vec<ReplayEpisode>), EvalError> {
    if args.suite {
        return Ok(("suite".to_string(), builtin_suite(config.seed, &config.noise)));
    }
    if let Some(name) = &args.episode {
        let id: EpisodeId = name.parse().map_err(EvalError::report)?;
        return Ok((id.name().to_string(), vec![id.episode(config.seed, config.noise.clone())]));
    }
    if let Some(count) = args.episodes {
        return Ok(("batch".to_string(), generate_batch(catalog, config.seed, count, &config.noise)));
    }
    Ok(("suite".to_string(), builtin_suite(config.seed, &config.noise)))
}

async fn run(args: Args) -> Result<bool, EvalError> {
    let config = load_config(&args)?;
    let catalog = match &args.cases {
        Some(dir) => CaseCatalog::from_dir(dir)?,
        None => CaseCatalog::builtin()?,
    };
    let (source, episodes) = select_episodes(&args, &catalog, &config)?;

    if !args.json {
        info!("MedWorld Replay v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(cases = catalog.len(), episodes = episodes.len(), seed = config.seed, %source, "Starting replay");
    }

    let runner = ReplayRunner::new(Arc::new(catalog))
        .with_config(config.orchestrator.clone())
        .with_concurrency(config.concurrency);
    let report = runner.run_concurrent(episodes).await;

    if !args.json {
        for record in &report.episodes {
            match &record.failure_reason {
                None if record.diagnosis_correct && record.safety_compliant => info!(
                    "✓ {} (seed={}) confidence={:.2} turns={}",
                    record.name, record.seed, record.confidence, record.turns_to_diagnosis
                ),
                None => warn!(
                    "✗ {} (seed={}) predicted={} escalated={} expected_escalation={}",
                    record.name,
                    record.seed,
                    record.predicted_diagnosis.as_deref().unwrap_or("none"),
                    record.escalated,
                    record.expected_escalation
                ),
                Some(reason) => error!("✗ {} (seed={}) FAILED: {}", record.name, record.seed, reason),
            }
        }
    }

    let mut passed = report.metrics.failed == 0;
    let mut export = ReplayExport::new(&source, config.seed, report);
    if args.gate {
        let outcome = config.thresholds.evaluate(&export.metrics);
        passed = outcome.passed;
        export = export.with_gate(outcome);
    }

    if let Some(path) = &args.export {
        JsonReportWriter::new(path).write(&export)?;
        if !args.json {
            info!("Exported {} episodes to {}", export.episodes.len(), path.display());
        }
    }

    if args.json {
        println!("{}", export.to_json()?);
    } else {
        let m = &export.metrics;
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "episodes={} scored={} failed={} accuracy={:.3} confidence={:.3} safety={:.3}",
            m.episodes, m.scored, m.failed, m.diagnosis_accuracy, m.mean_confidence, m.safety_compliance
        );
        info!(
            "turns_to_diagnosis={:.2} key_test_hit_rate={:.3} over_testing_rate={:.3} dangerous_miss_rate={:.3}",
            m.mean_turns_to_diagnosis, m.key_test_hit_rate, m.over_testing_rate, m.dangerous_miss_rate
        );
        match &export.gate {
            Some(gate) if gate.passed => info!("✅ Quality gate passed"),
            Some(gate) => {
                error!("❌ Quality gate failed");
                for failure in &gate.failures {
                    error!("  - {}", failure);
                }
            }
            None if passed => info!("✅ All {} episodes completed", m.episodes),
            None => error!("❌ {}/{} episodes failed", m.failed, m.episodes),
        }
    }

    Ok(passed)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("{}", err);
            std::process::exit(2);
        }
    }
}
