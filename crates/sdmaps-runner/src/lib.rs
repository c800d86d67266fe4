//! # sdmaps-runner
//!
//! Configuration and wiring of the full pipeline: a [`PipelineConfig`] read
//! from YAML drives patch assembly, prediction export, aggregation and map
//! writing. The `sdmaps` binary exposes it as subcommands.

mod config;
mod error;
mod model;
mod pipeline;

pub use config::{DataConfig, IndicesConfig, MapsConfig, PipelineConfig};
pub use error::RunnerError;
pub use model::LinearModel;
pub use pipeline::{
    build_aggregator, build_assembler, build_dataset, build_map_sink, flush_boundaries, replay, run_rasters,
    slots_per_point, MapSink, RunSummary,
};

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
