//! YAML pipeline configuration.

use crate::{Result, RunnerError};
use sdmaps_export::{ExportConfig, ModelParams, OccurrenceColumns};
use sdmaps_indices::{AggregationConfig, GridColumns};
use sdmaps_maps::{MapSettings, MergeAllOptions};
use sdmaps_raster::{GeoMode, RasterTransform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete pipeline configuration.
///
/// Only `model` is required; every other section falls back to its defaults.
///
/// ```yaml
/// model:
///   name: orchids
///   path: data/model/orchids.ckpt
/// data:
///   occurrences: data/occurrences/grid_europe.csv
///   rasters: [wc2.1_30s_bio_1, Roads_WGS84]
/// indices:
///   T: 8.75e-5
///   Lstats: [LC, NT, VU, EN, CR]
/// maps:
///   seconds: 30
///   compress: deflate
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Trained model.
    pub model: ModelParams,
    /// Occurrences and predictors.
    #[serde(default)]
    pub data: DataConfig,
    /// Prediction export.
    #[serde(default)]
    pub export: ExportConfig,
    /// Aggregation into indices.
    #[serde(default)]
    pub indices: IndicesConfig,
    /// Rasterization and merging.
    #[serde(default)]
    pub maps: MapsConfig,
}

/// Occurrence grid and patch assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Points to predict on. Its file stem names the grid in map paths.
    pub occurrences: PathBuf,
    /// Field separator of `occurrences`.
    pub sep: char,
    /// Id and coordinate column names.
    pub columns: OccurrenceColumns,
    /// Directory holding `<name>.tif` predictor rasters.
    pub rasters_dir: PathBuf,
    /// Predictor rasters, in channel order.
    pub rasters: Vec<String>,
    /// JSON raster catalog replacing the built-in one.
    pub catalog: Option<PathBuf>,
    /// Patch side in pixels.
    pub size: usize,
    /// Patch pixel size in metres.
    pub res: f64,
    /// Layout of the coordinate channels.
    pub geo_mode: GeoMode,
    /// Transform of the coordinate channels.
    pub patch_transform: Option<RasterTransform>,
    /// Transform of continuous rasters.
    pub raster_transform: Option<RasterTransform>,
    /// Log scaling for `Normalize`.
    pub log_transform: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            occurrences: PathBuf::from("data/occurrences/occurrences.csv"),
            sep: ';',
            columns: OccurrenceColumns::default(),
            rasters_dir: PathBuf::from("data/rasters"),
            rasters: Vec::new(),
            catalog: None,
            size: 64,
            res: 1000.0,
            geo_mode: GeoMode::Constant,
            patch_transform: Some(RasterTransform::Normalize),
            raster_transform: Some(RasterTransform::Normalize),
            log_transform: false,
        }
    }
}

impl DataConfig {
    /// Grid name used in map paths: the occurrence file stem.
    pub fn grid_name(&self) -> String {
        self.occurrences
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "grid".to_string())
    }
}

/// Aggregation settings and the reference data they need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicesConfig {
    /// Filters and derived columns.
    #[serde(flatten)]
    pub aggregation: AggregationConfig,
    /// Reference grid; defaults to the occurrence file.
    pub grid: Option<PathBuf>,
    /// Column names of the reference grid.
    pub grid_columns: GridColumns,
    /// GeoJSON region polygons; without it regions come from the grid column.
    pub regions: Option<PathBuf>,
    /// Region code property of the polygons.
    pub region_property: String,
    /// Species range map JSON; without it no range filter runs.
    pub ranges: Option<PathBuf>,
    /// Directory of the status CSVs.
    pub iucn_dir: PathBuf,
    /// Species reference CSV.
    pub species_ref: PathBuf,
}

impl Default for IndicesConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationConfig::default(),
            grid: None,
            grid_columns: GridColumns::default(),
            regions: None,
            region_property: "LEVEL1_COD".to_string(),
            ranges: None,
            iucn_dir: PathBuf::from("data/iucn_status"),
            species_ref: PathBuf::from("data/iucn_status/species_ref.csv"),
        }
    }
}

/// Map output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    /// Buffer tiles.
    #[serde(flatten)]
    pub settings: MapSettings,
    /// Final COG merge.
    #[serde(flatten)]
    pub merge: MergeAllOptions,
    /// Root of merged outputs; defaults to `<maps_path>/merged`.
    pub merged_path: Option<PathBuf>,
    /// External COG converter.
    pub tif2cog: String,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            settings: MapSettings::default(),
            merge: MergeAllOptions::default(),
            merged_path: None,
            tif2cog: "tif2cog".to_string(),
        }
    }
}

impl MapsConfig {
    /// Root of merged outputs.
    pub fn merged_path(&self) -> PathBuf {
        self.merged_path
            .clone()
            .unwrap_or_else(|| self.settings.maps_path.join("merged"))
    }
}

impl PipelineConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    /// Field separator as a byte.
    pub fn occurrence_sep(&self) -> Result<u8> {
        u8::try_from(self.data.sep)
            .map_err(|_| RunnerError::Config(format!("separator {:?} is not ASCII", self.data.sep)))
    }

    fn validate(&self) -> Result<()> {
        self.occurrence_sep()?;
        if self.export.size == 0 {
            return Err(RunnerError::Config("export.size must be positive".to_string()));
        }
        if self.maps.settings.seconds == 0 {
            return Err(RunnerError::Config("maps.seconds must be positive".to_string()));
        }
        if self.indices.aggregation.statuses.is_empty() {
            return Err(RunnerError::Config("indices.Lstats is empty".to_string()));
        }
        Ok(())
    }
}
