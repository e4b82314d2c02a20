use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use ccseg_core::config::{ConfigOverrides, StudyConfig};
use ccseg_core::pipeline::run_batch;

/// Corpus callosum parcellation by regularized vote over lobe track densities
#[derive(Parser, Debug)]
#[command(name = "ccseg-vote", version, long_about = None)]
struct Args {
    /// Study configuration file (TOML); built-in defaults if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subject to process (repeatable; replaces the configured list)
    #[arg(short, long = "subject")]
    subjects: Vec<String>,

    /// Directory holding inputs and outputs
    #[arg(long)]
    result_dir: Option<PathBuf>,

    /// Label for masked voxels with no density in any lobe
    #[arg(long)]
    no_vote_label: Option<u16>,

    /// Slices added on each side of the mid-sagittal plane
    #[arg(long)]
    slices: Option<usize>,

    /// Maximum island relabelling passes
    #[arg(long)]
    max_passes: Option<usize>,

    /// Weight of a voxel's own densities when blending with its neighbours (0, 1]
    #[arg(long)]
    neighbour_blend: Option<f64>,

    /// Keep the raw vote, skip island relabelling
    #[arg(long, default_value_t = false)]
    no_regularization: bool,

    /// Worker threads (default: one per core)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            subjects: self.subjects.clone(),
            result_dir: self.result_dir.clone(),
            no_vote_label: self.no_vote_label,
            slices: self.slices,
            max_passes: self.max_passes,
            neighbour_blend: self.neighbour_blend,
            no_regularization: self.no_regularization,
        }
    }
}

fn load_config(args: &Args) -> ccseg_core::Result<StudyConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            StudyConfig::load(path)?
        }
        None => StudyConfig::default(),
    };
    config.apply_environment_overrides()?;
    config.apply_overrides(&args.overrides());
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let results = match run_batch(&config, args.jobs) {
        Ok(results) => results,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let mut failed = 0;
    for result in &results {
        match result {
            Ok(report) => info!(
                "[{}] {} masked voxels, {} relabelled in {} pass(es), {:.2?}",
                report.subject,
                report.summary.masked_voxels,
                report.summary.relabelled,
                report.summary.passes,
                report.elapsed
            ),
            Err(e) => {
                failed += 1;
                error!("{}", e);
            }
        }
    }

    if failed > 0 {
        warn!("{} of {} subject(s) failed", failed, results.len());
        ExitCode::FAILURE
    } else {
        info!("All {} subject(s) completed", results.len());
        ExitCode::SUCCESS
    }
}
