//! Static calibration metadata for predictor rasters.

use crate::{RasterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Embedded calibration table for the standard predictor set.
const BUILTIN_CATALOG: &str = include_str!("../data/catalog.json");

/// Calibration of a single predictor raster.
///
/// Resolutions are in arc-seconds. `categories` is present only for
/// categorical rasters, in which case continuous transforms never apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDescriptor {
    /// Raster name; the file is `<name>.tif`.
    pub name: String,
    /// Value marking missing data in the file.
    pub nodata: f64,
    /// Sentinel that replaces nodata and NaN after loading.
    pub new_nan: f64,
    /// Mean used by standardisation.
    pub mean: f64,
    /// Standard deviation used by standardisation.
    pub std: f64,
    /// Minimum valid value.
    pub min: f64,
    /// Maximum valid value.
    pub max: f64,
    /// Native resolution in arc-seconds.
    pub resolution: f64,
    /// Declared category values for categorical rasters.
    #[serde(default)]
    pub categories: Option<Vec<f64>>,
    /// Every value strictly below `nodata` is also missing.
    #[serde(default)]
    pub nodata_below: bool,
    /// Categories are exploded into one band per biome (ecoregion codes).
    #[serde(default)]
    pub biome_grouped: bool,
}

impl RasterDescriptor {
    /// True for categorical rasters.
    pub fn is_categorical(&self) -> bool {
        self.categories.is_some()
    }
}

/// Name-indexed set of raster descriptors.
#[derive(Debug, Clone, Default)]
pub struct RasterCatalog {
    descriptors: BTreeMap<String, RasterDescriptor>,
}

impl RasterCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the standard predictor set (land use, climate, soil,
    /// biomes and ecoregions).
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Parse a JSON array of descriptors.
    pub fn from_json(json: &str) -> Result<Self> {
        let list: Vec<RasterDescriptor> = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for d in list {
            catalog.insert(d);
        }
        Ok(catalog)
    }

    /// Add or replace a descriptor.
    pub fn insert(&mut self, descriptor: RasterDescriptor) {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// Look up a descriptor. An unknown name is a configuration error.
    pub fn get(&self, name: &str) -> Result<&RasterDescriptor> {
        self.descriptors
            .get(name)
            .ok_or_else(|| RasterError::UnknownRaster(name.to_string()))
    }

    /// All raster names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.keys().map(String::as_str).collect()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = RasterCatalog::builtin().expect("builtin catalog parses");
        assert_eq!(catalog.len(), 50);

        let bio1 = catalog.get("wc2.1_30s_bio_1").unwrap();
        assert_eq!(bio1.new_nan, -56.0);
        assert_eq!(bio1.resolution, 30.0);
        assert!(!bio1.is_categorical());

        let eco = catalog.get("ecoregions001").unwrap();
        assert!(eco.biome_grouped);
        assert_eq!(eco.categories.as_ref().map(Vec::len), Some(815));

        assert!(catalog.get("Roads_WGS84").unwrap().nodata_below);
    }

    #[test]
    fn test_unknown_raster_is_error() {
        let catalog = RasterCatalog::builtin().unwrap();
        assert!(matches!(
            catalog.get("not_a_raster"),
            Err(RasterError::UnknownRaster(_))
        ));
    }

    #[test]
    fn test_names_sorted() {
        let catalog = RasterCatalog::builtin().unwrap();
        let names = catalog.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
