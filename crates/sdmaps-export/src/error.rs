//! Error types for the export crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading inputs or exporting predictions.
#[derive(Debug, Error)]
pub enum ExportError {
    /// I/O error on an input or export file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (label index).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error (occurrences, CSV export).
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Patch extraction failed.
    #[error("raster error: {0}")]
    Raster(#[from] sdmaps_raster::RasterError),

    /// The model's forward pass failed.
    #[error("model error: {0}")]
    Model(String),

    /// Scores returned by the model do not match the batch.
    #[error("model returned {actual} rows for a batch of {expected}")]
    BatchShape {
        /// Batch size sent to the model.
        expected: usize,
        /// Rows in the returned score matrix.
        actual: usize,
    },

    /// Checkpoint file does not exist.
    #[error("checkpoint {0} does not exist")]
    MissingCheckpoint(PathBuf),

    /// Label shape disagrees with the indexer's multitask setting.
    #[error("label kind mismatch: indexer expects {expected}, got {actual}")]
    LabelKind {
        /// What the indexer was built for.
        expected: &'static str,
        /// What was given.
        actual: &'static str,
    },

    /// Multitask label with the wrong number of tasks.
    #[error("label has {actual} tasks, indexer has {expected}")]
    TaskCount {
        /// Tasks declared on the indexer.
        expected: usize,
        /// Tasks in the label.
        actual: usize,
    },

    /// The sample-assembly thread pool could not be built.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A column is missing from a CSV header.
    #[error("column '{column}' not found in {path}")]
    MissingColumn {
        /// Column name.
        column: String,
        /// File being read.
        path: String,
    },

    /// Export files are inconsistent or malformed.
    #[error("malformed export: {0}")]
    Format(String),

    /// The flush sink failed.
    #[error("flush sink failed: {0}")]
    Sink(String),
}
