//! Error types for the runner.

use thiserror::Error;

/// Errors raised while configuring or running the pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Raster(#[from] sdmaps_raster::RasterError),

    #[error(transparent)]
    Export(#[from] sdmaps_export::ExportError),

    #[error(transparent)]
    Indices(#[from] sdmaps_indices::IndicesError),

    #[error(transparent)]
    Maps(#[from] sdmaps_maps::MapsError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
