//! Error types for the maps crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while rasterizing, writing or merging maps.
#[derive(Debug, Error)]
pub enum MapsError {
    /// I/O error on a tile or list file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encoding or decoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Derived column missing from the grid.
    #[error("indices error: {0}")]
    Indices(#[from] sdmaps_indices::IndicesError),

    /// A GeoTIFF lacks the tags needed to place it.
    #[error("invalid GeoTIFF {path}: {reason}")]
    InvalidGeoTiff {
        /// File that was read.
        path: PathBuf,
        /// What is missing.
        reason: String,
    },

    /// Unknown map variable type.
    #[error("unknown map variable {0:?} (expected B, S, cat or shannon)")]
    UnknownVariable(String),

    /// Two rasters cannot be combined.
    #[error("incompatible rasters: {0}")]
    Incompatible(String),

    /// A band does not match the stack extent.
    #[error("band is {actual:?}, extent is {expected:?}")]
    BandShape {
        /// (rows, cols) of the extent.
        expected: (usize, usize),
        /// (rows, cols) of the band.
        actual: (usize, usize),
    },

    /// An external command could not run or failed.
    #[error("command {command:?} failed: {reason}")]
    Command {
        /// Program and arguments.
        command: String,
        /// Exit status or spawn error.
        reason: String,
    },
}
