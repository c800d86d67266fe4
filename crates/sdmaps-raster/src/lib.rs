//! # sdmaps-raster
//!
//! Environmental predictor rasters and per-location patch extraction.
//!
//! A predictor raster is a single-band GeoTIFF in WGS84 (EPSG:4326) whose
//! calibration (nodata value, sentinel, mean/std, min/max, native resolution,
//! categories) lives in a [`RasterCatalog`]. Rasters are decoded fully into
//! memory with nodata and NaN replaced by the sentinel, optionally normalised
//! or standardised, and then sampled around occurrence coordinates:
//!
//! - size 1 returns the pixel under the point;
//! - larger sizes read a window of native pixels, resample it to the
//!   requested metric resolution, and centre-crop it to `size × size`.
//!
//! Categorical rasters are one-hot encoded (one channel per category) and
//! ecoregion codes are exploded into one channel per biome.
//!
//! ## Example
//!
//! ```no_run
//! use sdmaps_metrics::Diagnostics;
//! use sdmaps_raster::{
//!     GeoFeatureProvider, GeoMode, PatchAssembler, RasterCatalog, RasterProvider,
//!     RasterProviderOptions, RasterTransform,
//! };
//! use std::sync::Arc;
//!
//! let catalog = RasterCatalog::builtin()?;
//! let diagnostics = Arc::new(Diagnostics::new());
//! let options = RasterProviderOptions {
//!     transform: Some(RasterTransform::Standardize),
//!     log_transform: false,
//!     size: 64,
//!     res: 30.0,
//! };
//! let rasters = RasterProvider::new(
//!     "rasters/",
//!     &["wc2.1_30s_bio_1".to_string()],
//!     &catalog,
//!     options,
//!     diagnostics,
//! )?;
//!
//! let mut assembler = PatchAssembler::new(64);
//! assembler.push(Box::new(GeoFeatureProvider::new(GeoMode::Sliding, 64, 30.0, None)))?;
//! assembler.push(Box::new(rasters))?;
//!
//! let tensor = assembler.get(1, 43.6, 3.9)?;
//! assert_eq!(tensor.shape()[0], 3);
//! # Ok::<(), sdmaps_raster::RasterError>(())
//! ```

mod assembler;
mod catalog;
mod error;
mod geo;
mod patch;
mod provider;
mod raster;
mod transform;

pub use assembler::PatchAssembler;
pub use catalog::{RasterCatalog, RasterDescriptor};
pub use error::RasterError;
pub use geo::{GeoFeatureProvider, GeoMode};
pub use patch::{resize_bilinear, resize_nearest, EQUATOR_ARC_SECOND_IN_METERS};
pub use provider::{PatchProvider, RasterProvider, RasterProviderOptions};
pub use raster::{LoadedRaster, RasterGeometry, WGS84_EPSG};
pub use transform::RasterTransform;

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
