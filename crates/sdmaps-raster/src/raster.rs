//! A single predictor raster held in memory.

use crate::catalog::RasterDescriptor;
use crate::patch::BiomeIndex;
use crate::transform::{Calibration, RasterTransform};
use crate::{RasterError, Result};
use ndarray::Array2;
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, warn};

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

/// Name of the side-car file used when a GeoTIFF carries no geo-referencing.
const GEO_METADATA_FILE: &str = "GeoMetaData.csv";

/// Geo-referencing of a raster grid (north-up, degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterGeometry {
    /// West edge.
    pub x_min: f64,
    /// South edge.
    pub y_min: f64,
    /// Pixel width in degrees.
    pub x_res: f64,
    /// Pixel height in degrees.
    pub y_res: f64,
    /// Number of rows.
    pub n_rows: usize,
    /// Number of columns.
    pub n_cols: usize,
}

impl RasterGeometry {
    /// Row and column of the cell containing `(lat, lon)`, before bounds checks.
    ///
    /// Row 0 is the northern edge. Both indices truncate toward zero.
    pub fn cell_of(&self, lat: f64, lon: f64) -> (i64, i64) {
        let row = (self.n_rows as f64 - (lat - self.y_min) / self.y_res) as i64;
        let col = ((lon - self.x_min) / self.x_res) as i64;
        (row, col)
    }

    /// True when the cell lies inside the grid.
    pub fn contains_cell(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.n_rows && (col as usize) < self.n_cols
    }
}

/// A raster decoded into memory, with missing data replaced by a sentinel.
#[derive(Debug, Clone)]
pub struct LoadedRaster {
    descriptor: RasterDescriptor,
    data: Array2<f32>,
    geometry: RasterGeometry,
    sentinel: f32,
    crs: Option<u32>,
    transform: Option<RasterTransform>,
    biomes: Option<BiomeIndex>,
}

impl LoadedRaster {
    /// Load `<dir>/<name>.tif`.
    ///
    /// The file is read in full and closed before returning. Geo-referencing
    /// comes from the ModelTiepoint/ModelPixelScale tags, falling back to
    /// `<dir>/GeoMetaData.csv`.
    pub fn load<P: AsRef<Path>>(
        dir: P,
        descriptor: &RasterDescriptor,
        transform: Option<RasterTransform>,
        log_transform: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(format!("{}.tif", descriptor.name));
        let file = File::open(&path)?;
        let mut decoder = Decoder::new(file)?;

        // Global 30" rasters are 21600 x 43200 f32 pixels (~3.7 GB)
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 8 * 1024 * 1024 * 1024;
        limits.intermediate_buffer_size = 8 * 1024 * 1024 * 1024;
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let (geometry, crs) = match read_geotransform(&mut decoder, width, height)? {
            Some(geometry) => (geometry, read_epsg(&mut decoder)),
            None => (read_geo_metadata(dir)?, None),
        };

        let values = decode_values(&mut decoder)?;
        if values.len() != width * height {
            return Err(RasterError::Shape {
                name: descriptor.name.clone(),
                rows: height,
                cols: width,
                actual: values.len(),
            });
        }
        let data = Array2::from_shape_vec((height, width), values).map_err(|_| RasterError::Shape {
            name: descriptor.name.clone(),
            rows: height,
            cols: width,
            actual: width * height,
        })?;

        debug!(
            "Loaded raster {} ({}x{}) from {}",
            descriptor.name,
            height,
            width,
            path.display()
        );

        Self::from_parts(descriptor, data, geometry, crs, transform, log_transform)
    }

    /// Build a raster from decoded values.
    ///
    /// Applies the same cleaning as [`LoadedRaster::load`]: NaN and nodata
    /// become the sentinel, then the transform runs on continuous rasters.
    pub fn from_parts(
        descriptor: &RasterDescriptor,
        mut data: Array2<f32>,
        geometry: RasterGeometry,
        crs: Option<u32>,
        transform: Option<RasterTransform>,
        log_transform: bool,
    ) -> Result<Self> {
        let (rows, cols) = data.dim();
        if geometry.n_rows != rows || geometry.n_cols != cols {
            return Err(RasterError::Shape {
                name: descriptor.name.clone(),
                rows: geometry.n_rows,
                cols: geometry.n_cols,
                actual: rows * cols,
            });
        }
        if !data.is_standard_layout() {
            data = data.as_standard_layout().into_owned();
        }

        let nodata = descriptor.nodata as f32;
        let mut sentinel = descriptor.new_nan as f32;
        data.mapv_inplace(|v| {
            if v.is_nan() || v == nodata || (descriptor.nodata_below && v < nodata) {
                sentinel
            } else {
                v
            }
        });

        if let Some(t) = transform.filter(|_| !descriptor.is_categorical()) {
            let calibration = Calibration {
                mean: descriptor.mean,
                std: descriptor.std,
                min: descriptor.min,
                max: descriptor.max,
            };
            if let Some(values) = data.as_slice_mut() {
                sentinel = t.apply(values, sentinel, calibration, log_transform);
            }
        }

        if let Some(code) = crs.filter(|c| *c != WGS84_EPSG) {
            warn!(
                "Raster {} is in EPSG:{} rather than WGS84; reproject it before use",
                descriptor.name, code
            );
        }

        let biomes = if descriptor.biome_grouped {
            descriptor
                .categories
                .as_deref()
                .map(|cats| BiomeIndex::new(cats, transform == Some(RasterTransform::Normalize)))
        } else {
            None
        };

        Ok(Self {
            descriptor: descriptor.clone(),
            data,
            geometry,
            sentinel,
            crs,
            transform,
            biomes,
        })
    }

    /// Raster name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Calibration record this raster was loaded with.
    pub fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    /// Geo-referencing of the grid.
    pub fn geometry(&self) -> &RasterGeometry {
        &self.geometry
    }

    /// Sentinel currently marking missing data.
    pub fn sentinel(&self) -> f32 {
        self.sentinel
    }

    /// EPSG code from the GeoKeyDirectory, when present.
    pub fn crs(&self) -> Option<u32> {
        self.crs
    }

    /// Transform applied at load time.
    pub fn transform(&self) -> Option<RasterTransform> {
        self.transform
    }

    /// Cleaned pixel values (row 0 = north).
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub(crate) fn biomes(&self) -> Option<&BiomeIndex> {
        self.biomes.as_ref()
    }

    /// Value at a cell, `None` outside the grid.
    pub fn value_at(&self, row: i64, col: i64) -> Option<f32> {
        if self.geometry.contains_cell(row, col) {
            Some(self.data[[row as usize, col as usize]])
        } else {
            None
        }
    }

    /// Number of channels one patch of this raster occupies.
    pub fn channels(&self) -> usize {
        match (&self.biomes, &self.descriptor.categories) {
            (Some(b), _) => b.biomes().len(),
            (None, Some(cats)) => cats.len(),
            (None, None) => 1,
        }
    }
}

/// Read the geotransform from ModelTiepoint (33922) and ModelPixelScale (33550).
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    width: usize,
    height: usize,
) -> Result<Option<RasterGeometry>> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
        if tiepoint.len() >= 6 && scale.len() >= 2 {
            // [i, j, k, x, y, z]: raster cell (i, j) sits at (x, y)
            let x_res = scale[0];
            let y_res = scale[1];
            let x_min = tiepoint[3] - tiepoint[0] * x_res;
            let y_max = tiepoint[4] + tiepoint[1] * y_res;
            return Ok(Some(RasterGeometry {
                x_min,
                y_min: y_max - height as f64 * y_res,
                x_res,
                y_res,
                n_rows: height,
                n_cols: width,
            }));
        }
    }
    Ok(None)
}

/// EPSG code from the GeoKeyDirectory (34735), if any.
fn read_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u32_vec(Tag::GeoKeyDirectoryTag).ok()?;
    // Header is 4 shorts, then (key, location, count, value) entries
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| (entry[0] == 2048 || entry[0] == 3072) && entry[1] == 0)
        .map(|entry| entry[3])
}

/// Parse the `name;x_min;y_min;n_rows;n_cols;x_res;y_res` side-car record.
fn read_geo_metadata(dir: &Path) -> Result<RasterGeometry> {
    let path = dir.join(GEO_METADATA_FILE);
    if !path.exists() {
        return Err(RasterError::InvalidGeoTiff(format!(
            "no geo tags and no {} in {}",
            GEO_METADATA_FILE,
            dir.display()
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_path(&path)
        .map_err(|e| RasterError::InvalidGeoTiff(format!("{}: {}", path.display(), e)))?;

    let record = reader
        .records()
        .next()
        .ok_or_else(|| RasterError::InvalidGeoTiff(format!("{} has no data row", path.display())))?
        .map_err(|e| RasterError::InvalidGeoTiff(format!("{}: {}", path.display(), e)))?;

    let field = |i: usize| -> Result<f64> {
        record
            .get(i)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| {
                RasterError::InvalidGeoTiff(format!("{}: bad field {}", path.display(), i))
            })
    };

    Ok(RasterGeometry {
        x_min: field(1)?,
        y_min: field(2)?,
        n_rows: field(3)? as usize,
        n_cols: field(4)? as usize,
        x_res: field(5)?,
        y_res: field(6)?,
    })
}

/// Decode the first image to f32 regardless of the sample format.
fn decode_values<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
    let result = decoder.read_image()?;

    Ok(match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    })
}
