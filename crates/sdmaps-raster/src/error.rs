//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur when loading rasters or extracting patches.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Catalog or descriptor JSON could not be parsed.
    #[error("catalog parse error: {0}")]
    Catalog(#[from] serde_json::Error),

    /// Invalid GeoTIFF - missing geo-referencing and no GeoMetaData.csv fallback.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// A raster name that the catalog does not know.
    #[error("unknown raster '{0}'")]
    UnknownRaster(String),

    /// Raster dimensions do not match the decoded buffer.
    #[error("raster '{name}' has {actual} pixels, expected {rows}x{cols}")]
    Shape {
        /// Raster name.
        name: String,
        /// Declared row count.
        rows: usize,
        /// Declared column count.
        cols: usize,
        /// Decoded pixel count.
        actual: usize,
    },

    /// Providers disagree on the patch size.
    #[error("provider patch {actual}x{actual} does not match assembler size {expected}x{expected}")]
    PatchSizeMismatch {
        /// Size the assembler was built for.
        expected: usize,
        /// Size returned by the provider.
        actual: usize,
    },

    /// No provider was configured.
    #[error("no patch provider configured")]
    NoProviders,
}
