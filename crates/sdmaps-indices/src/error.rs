//! Error types for the indices crate.

use thiserror::Error;

/// Errors raised while loading reference data or aggregating a buffer.
#[derive(Debug, Error)]
pub enum IndicesError {
    /// I/O error reading a reference file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV error (grid, status tables).
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error (range map, region layer).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required column is missing from a delimited file.
    #[error("column {column:?} not found in {path}")]
    MissingColumn {
        /// Column name.
        column: String,
        /// File that was read.
        path: String,
    },

    /// A value could not be parsed.
    #[error("format error: {0}")]
    Format(String),

    /// The region layer is not a usable GeoJSON FeatureCollection.
    #[error("invalid region layer: {0}")]
    InvalidRegions(String),

    /// A derived column was requested before it was computed.
    #[error("grid has no column {0:?}")]
    UnknownColumn(String),

    /// A derived column does not have one value per grid row.
    #[error("column {name:?} has {actual} values for {expected} rows")]
    ColumnLength {
        /// Column name.
        name: String,
        /// Number of grid rows.
        expected: usize,
        /// Number of values given.
        actual: usize,
    },
}
