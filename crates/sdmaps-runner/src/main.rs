//! `sdmaps` command line.

use clap::{Parser, Subcommand};
use sdmaps_export::{load_model, CheckpointCache};
use sdmaps_maps::{incremental_merge, merge_all, CogConverter, MergeOptions, MosaicCogConverter, Tif2CogCommand};
use sdmaps_metrics::{describe_metrics, Diagnostics};
use sdmaps_runner::{replay, run_rasters, LinearModel, PipelineConfig, Result, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sdmaps")]
#[command(author, version, about = "Species distribution predictions to raster maps", long_about = None)]
struct Cli {
    /// Pipeline configuration
    #[arg(short, long, global = true, default_value = "sdmaps.yaml")]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Predict over the occurrence grid, export and write map tiles
    Rasters,
    /// Write map tiles from an existing export
    Replay,
    /// Merge one tile into its running mosaic, or with another tile
    Merge {
        /// Newly written tile
        #[arg(long)]
        tile: PathBuf,
        /// Explicit partner; defaults to the running mosaic
        #[arg(long)]
        other: Option<PathBuf>,
        /// Output path
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Skip the running-mosaic copy
        #[arg(long)]
        no_copy: bool,
    },
    /// Merge every tile of every product into one COG each
    MergeAll {
        /// Mosaic in-process instead of calling the external converter
        #[arg(long)]
        in_process: bool,
        /// Remove source tiles once merged
        #[arg(long)]
        delete_sources: bool,
    },
}

fn log_summary(summary: &RunSummary, diagnostics: &Diagnostics) {
    info!(
        "{} points, {} buffers, {} tiles, {} fallbacks",
        summary.exported, summary.buffers, summary.tiles, summary.fallbacks
    );
    for (kind, count) in diagnostics.snapshot() {
        if count > 0 {
            info!("  {}: {}", kind, count);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let diagnostics = Arc::new(Diagnostics::new());

    match cli.command {
        Commands::Rasters => {
            let config = PipelineConfig::from_yaml_file(&cli.config)?;
            let mut cache = CheckpointCache::new();
            let mut model = load_model(&mut cache, &config.model, LinearModel::from_checkpoint)?;
            let summary = run_rasters(&config, &mut model, diagnostics.clone())?;
            log_summary(&summary, &diagnostics);
        }
        Commands::Replay => {
            let config = PipelineConfig::from_yaml_file(&cli.config)?;
            let summary = replay(&config, diagnostics.clone())?;
            log_summary(&summary, &diagnostics);
        }
        Commands::Merge {
            tile,
            other,
            dest,
            no_copy,
        } => {
            let options = MergeOptions {
                dest,
                copy: !no_copy,
                ..Default::default()
            };
            let outcome = incremental_merge(&tile, other.as_deref(), &options)?;
            info!("Merged {} inputs into {}", outcome.inputs, outcome.merged.display());
        }
        Commands::MergeAll {
            in_process,
            delete_sources,
        } => {
            let config = PipelineConfig::from_yaml_file(&cli.config)?;
            let mut options = config.maps.merge.clone();
            options.delete_sources |= delete_sources;
            let converter: Box<dyn CogConverter> = if in_process {
                Box::new(MosaicCogConverter)
            } else {
                Box::new(Tif2CogCommand {
                    program: config.maps.tif2cog.clone(),
                })
            };
            let products = merge_all(
                &config.maps.settings.maps_path,
                &config.maps.merged_path(),
                &config.data.grid_name(),
                &config.indices.aggregation.statuses,
                converter.as_ref(),
                &options,
            )?;
            info!("{} products merged", products.len());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    describe_metrics();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
