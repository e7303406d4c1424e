use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use l1t_fixrate::{pipeline, AnalysisConfig, InputFormat};

/// Calibrate L1 trigger thresholds of several configurations to common rates and measure their
/// turn-on efficiencies.
#[derive(Parser, Debug)]
#[command(name = "l1t-fixrate", version, about)]
struct Cli {
    /// Analysis configuration (YAML, or JSON when the file ends in `.json`)
    #[arg(short, long)]
    config: String,

    /// Read NanoAOD ntuples (`root`) or the tables persisted by a previous run (`parquet`)
    #[arg(long)]
    input_format: Option<InputFormat>,

    /// Directory of the JSON artifacts (overrides the configuration)
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Log level used when `RUST_LOG` is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = AnalysisConfig::from_path(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    if let Some(input_format) = cli.input_format {
        config = config.with_input_format(input_format);
    }
    if let Some(output_dir) = cli.output_dir {
        config = config.with_output_dir(output_dir);
    }

    let report = pipeline::run(&config).context("analysis failed")?;
    for set in &report.thresholds.calibration.threshold_sets {
        info!(label = %set.label, thresholds = ?set.values(), "calibrated");
    }
    let paths = report
        .write(&config.output_dir)
        .with_context(|| format!("failed to write artifacts to {}", config.output_dir))?;
    for path in paths {
        info!(path = %path.display(), "wrote");
    }
    Ok(())
}
