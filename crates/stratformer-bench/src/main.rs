use std::path::PathBuf;

use clap::Parser;

use stratformer_bench::config::{ExperimentConfig, ResolvedOutputs};
use stratformer_bench::experiment::ExperimentRunner;
use stratformer_bench::logging::init_logging;
use stratformer_core::AppInfo;

/// Seeded opponent-modeling experiment harness.
#[derive(Debug, Parser)]
#[command(
    name = "stratformer-bench",
    author,
    version,
    about = "Deterministic opponent-modeling experiment harness"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "bench/bench.yaml")]
    config: PathBuf,

    /// Override the run identifier (substitutes {run_id} templates).
    #[arg(long, value_name = "RUN_ID")]
    run_id: Option<String>,

    /// Override the number of rounds to play.
    #[arg(long, value_name = "ROUNDS")]
    rounds: Option<usize>,

    /// Override the RNG seed for the synthetic opponent.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Exit after validating the configuration (no experiment is run).
    #[arg(long)]
    validate_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ExperimentConfig::from_path(&cli.config)?;

    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }

    if let Some(rounds) = cli.rounds {
        config.rounds = rounds;
    }

    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }

    config.validate()?;

    let outputs: ResolvedOutputs = config.resolved_outputs();
    let hypothesis_count = config.hypotheses.len();
    let run_id = config.run_id.clone();
    let rounds = config.rounds;
    let opponent = config
        .opponent
        .hypothesis
        .clone()
        .unwrap_or_else(|| "<novel table>".to_string());

    println!("{} {}", AppInfo::name(), AppInfo::version());
    println!(
        "Loaded configuration '{run_id}' with {hypothesis_count} hypothes{} ({rounds} rounds against {opponent})",
        if hypothesis_count == 1 { "is" } else { "es" }
    );

    let runner = ExperimentRunner::new(config, outputs.clone())?;

    if cli.validate_only {
        println!("Validation-only mode: experiment execution skipped.");
        return Ok(());
    }

    let _logging_guard = init_logging(&runner.config().logging, &outputs)?;

    let summary = runner.run()?;
    println!(
        "Experiment complete for '{run_id}': {} rounds ({} rejected) → {} rows at {}",
        summary.rounds_played,
        summary.rounds_rejected,
        summary.rows_written,
        summary.jsonl_path.display()
    );
    println!("Summary table: {}", summary.summary_path.display());
    println!(
        "  Mean max posterior {:.3}, novelty rate {:.1}%",
        summary.analytics.mean_max_posterior,
        summary.analytics.novelty_rate * 100.0
    );
    if let Some(plot_path) = summary.plot_path.as_ref() {
        println!("Max-posterior plot: {}", plot_path.display());
    }
    if let Some(telemetry_path) = summary.telemetry_path.as_ref() {
        println!("Telemetry log: {}", telemetry_path.display());
    }
    if let Some(outputs) = summary.telemetry_outputs.as_ref() {
        println!("Telemetry summary (JSON): {}", outputs.json_path.display());
        println!(
            "Telemetry summary (Markdown): {}",
            outputs.markdown_path.display()
        );
        println!(
            "  Round events: {}, selector fallbacks: {}",
            outputs.summary.rounds.count, outputs.summary.selector_warnings
        );
    }

    Ok(())
}
