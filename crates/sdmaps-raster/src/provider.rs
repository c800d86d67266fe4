//! Patch providers: anything that turns a located occurrence into channels.

use crate::catalog::RasterCatalog;
use crate::raster::LoadedRaster;
use crate::transform::RasterTransform;
use crate::{RasterError, Result};
use ndarray::{concatenate, Array3, ArrayView3, Axis};
use sdmaps_common::PointId;
use sdmaps_metrics::{Diagnostics, FallbackKind};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Source of `(channels, size, size)` patches for a located occurrence.
///
/// Providers are read-only after construction and shared between worker
/// threads.
pub trait PatchProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Number of channels in every patch.
    fn channels(&self) -> usize;

    /// Side of the square patches, in pixels.
    fn patch_size(&self) -> usize;

    /// Patch for occurrence `id` at `(lat, lon)`.
    fn get(&self, id: PointId, lat: f64, lon: f64) -> Result<Array3<f32>>;
}

/// Settings shared by every raster of a [`RasterProvider`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterProviderOptions {
    /// Transform applied to continuous rasters at load time.
    pub transform: Option<RasterTransform>,
    /// Use `ln(v + 1 - min)` instead of min/max scaling for `Normalize`.
    pub log_transform: bool,
    /// Patch side in pixels.
    pub size: usize,
    /// Output pixel size in metres.
    pub res: f64,
}

impl Default for RasterProviderOptions {
    fn default() -> Self {
        Self {
            transform: None,
            log_transform: false,
            size: 256,
            res: 100.0,
        }
    }
}

/// Ordered set of predictor rasters sampled together.
#[derive(Debug)]
pub struct RasterProvider {
    root: PathBuf,
    rasters: Vec<LoadedRaster>,
    options: RasterProviderOptions,
    diagnostics: Arc<Diagnostics>,
}

impl RasterProvider {
    /// Load the named rasters from `root`, in order.
    ///
    /// An empty name list loads every raster in the catalog. Unknown names are
    /// errors; files that cannot be opened are logged and skipped.
    pub fn new<P: AsRef<Path>>(
        root: P,
        names: &[String],
        catalog: &RasterCatalog,
        options: RasterProviderOptions,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        let mut provider = Self {
            root: root.as_ref().to_path_buf(),
            rasters: Vec::new(),
            options,
            diagnostics,
        };

        if names.is_empty() {
            let all: Vec<String> = catalog.names().into_iter().map(str::to_string).collect();
            for name in &all {
                provider.append(catalog, name)?;
            }
        } else {
            for name in names {
                provider.append(catalog, name)?;
            }
        }
        Ok(provider)
    }

    /// Load one more raster. Returns `false` when the file was skipped.
    pub fn append(&mut self, catalog: &RasterCatalog, name: &str) -> Result<bool> {
        let descriptor = catalog.get(name)?;
        info!("Adding raster {}", name);
        match LoadedRaster::load(
            &self.root,
            descriptor,
            self.options.transform,
            self.options.log_transform,
        ) {
            Ok(raster) => {
                self.rasters.push(raster);
                Ok(true)
            }
            Err(RasterError::Io(e)) => {
                warn!("Raster {} not available: {}", name, e);
                self.diagnostics.record(FallbackKind::RasterSkipped);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Add an already loaded raster.
    pub fn push(&mut self, raster: LoadedRaster) {
        self.rasters.push(raster);
    }

    /// Names of the loaded rasters, in channel order.
    pub fn rasters_order(&self) -> Vec<&str> {
        self.rasters.iter().map(|r| r.name()).collect()
    }

    /// Loaded rasters.
    pub fn rasters(&self) -> &[LoadedRaster] {
        &self.rasters
    }

    /// Number of rasters (not channels).
    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    /// True when no raster is loaded.
    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    /// Drop every raster.
    pub fn clean(&mut self) {
        info!("Removing all rasters");
        self.rasters.clear();
    }

    /// Human-readable geo description of each raster.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for r in &self.rasters {
            let g = r.geometry();
            let _ = writeln!(out, "{}", "-".repeat(50));
            let _ = writeln!(out, "title: {}", r.name());
            let _ = writeln!(out, "\t x_min: {}", g.x_min);
            let _ = writeln!(out, "\t y_min: {}", g.y_min);
            let _ = writeln!(out, "\t x_resolution: {}", g.x_res);
            let _ = writeln!(out, "\t y_resolution: {}", g.y_res);
            let _ = writeln!(out, "\t n_rows: {}", g.n_rows);
            let _ = writeln!(out, "\t n_cols: {}", g.n_cols);
        }
        out
    }
}

impl PatchProvider for RasterProvider {
    fn name(&self) -> &str {
        "rasters"
    }

    fn channels(&self) -> usize {
        self.rasters.iter().map(LoadedRaster::channels).sum()
    }

    fn patch_size(&self) -> usize {
        self.options.size
    }

    fn get(&self, _id: PointId, lat: f64, lon: f64) -> Result<Array3<f32>> {
        if self.rasters.is_empty() {
            return Err(RasterError::NoProviders);
        }
        let patches: Vec<Array3<f32>> = self
            .rasters
            .iter()
            .map(|r| r.get_patch(lat, lon, self.options.size, self.options.res, &self.diagnostics))
            .collect();
        let views: Vec<ArrayView3<f32>> = patches.iter().map(|p| p.view()).collect();
        concatenate(Axis(0), &views).map_err(|_| RasterError::PatchSizeMismatch {
            expected: self.options.size,
            actual: patches.iter().map(|p| p.shape()[1]).max().unwrap_or(0),
        })
    }
}
