/// Bridge descriptor sanitizer
///
/// Reads raw bridge network statuses, server descriptors and extra-info
/// descriptors, removes or pseudonymizes everything that identifies a
/// bridge, and writes the results to the archive and the recent mirror.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bridgesan_common::SanitizerConfig;
use bridgesan_daemon::{run_batch, RunOptions, RunSummary};

const DEFAULT_CONFIG_PATH: &str = "bridgesan.toml";

#[derive(Parser, Debug)]
#[command(name = "bridgesan", version, about = "Sanitize bridge descriptors")]
struct Cli {
    /// Configuration file; defaults are used if it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the input directory from the configuration
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Replace addresses with placeholders instead of hashes
    #[arg(long)]
    no_hashing: bool,

    /// Do not publish or expire recent mirror files
    #[arg(long)]
    skip_housekeeping: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting bridge sanitizer v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&cli.config)?;
    if let Some(input_dir) = cli.input_dir {
        config.input_dir = input_dir;
    }
    if cli.no_hashing {
        config.replace_ip_addresses_with_hashes = false;
    }

    let options = RunOptions {
        skip_housekeeping: cli.skip_housekeeping,
    };
    let summary = run_batch(&config, options).context("sanitizing run failed")?;
    print_summary(&summary);

    Ok(())
}

/// Load configuration, falling back to defaults when the file is missing
fn load_config(path: &Path) -> Result<SanitizerConfig> {
    if path.exists() {
        info!("Loading configuration from {:?}", path);
        SanitizerConfig::from_file(path)
            .with_context(|| format!("invalid configuration in {}", path.display()))
    } else {
        info!("No configuration file found, using defaults");
        Ok(SanitizerConfig::default())
    }
}

fn print_summary(summary: &RunSummary) {
    let stored: usize = summary.counts.values().map(|c| c.stored).sum();
    let duplicates: usize = summary.counts.values().map(|c| c.duplicates).sum();
    let skipped: usize = summary.counts.values().map(|c| c.skipped).sum();
    info!(
        "Run finished: {} files, {} stored, {} already archived, {} skipped",
        summary.files, stored, duplicates, skipped
    );
    if summary.secrets_poisoned {
        warn!("{} records were not sanitized because of the secrets file", summary.refused);
    }
    if summary.write_failures > 0 {
        warn!("{} sanitized records could not be written", summary.write_failures);
    }
}
