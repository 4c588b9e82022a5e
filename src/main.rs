//! civicpulse: run the pipeline once over a batch file.
//!
//! Usage: `civicpulse --input batch.jsonl [--config path] [--output-dir dir] [--now RFC3339]`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use civicpulse_lib::config::{default_config_path, load_config};
use civicpulse_lib::pipeline::CancellationFlag;
use civicpulse_lib::runner::{run_from_files, RunnerOptions};
use civicpulse_lib::signals::normalizer::parse_timestamp;
use civicpulse_lib::PipelineError;

#[derive(Parser)]
#[command(name = "civicpulse")]
#[command(about = "Delayed, aggregated civic attention maps from public text signals")]
struct Cli {
    /// Input batch: a JSON array or JSON Lines of raw records
    #[arg(long)]
    input: PathBuf,

    /// Config file (defaults to ~/.civicpulse/config.json)
    #[arg(long, env = "CIVICPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the per-tier output files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Evaluation time (RFC 3339); defaults to now
    #[arg(long)]
    now: Option<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<PipelineError>()
                .map(|e| {
                    log::error!("{}", e.recovery_suggestion());
                    if e.is_recoverable() {
                        log::info!("Nothing was exported; the run can be re-triggered as is");
                    }
                    e.exit_code()
                })
                .unwrap_or(70);
            log::error!("{:#}", err);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path().map_err(PipelineError::from)?,
    };
    let config = load_config(&config_path).map_err(PipelineError::from)?;

    let now = match cli.now.as_deref() {
        Some(raw) => Some(
            parse_timestamp(raw)
                .ok_or_else(|| PipelineError::Input(format!("Invalid --now value: {}", raw)))?,
        ),
        None => None,
    };

    let options = RunnerOptions {
        input: cli.input,
        output_dir: cli.output_dir,
        now,
    };

    let output = run_from_files(&config, &options, &CancellationFlag::new())
        .with_context(|| format!("Run over {} failed", options.input.display()))?;

    log::info!(
        "Run {} complete: {} published, {} discarded, {} rejected",
        output.run_id,
        output.stats.published,
        output.stats.discarded,
        output.stats.rejected
    );
    Ok(())
}
