//! Multi-band GeoTIFF stacks.
//!
//! A stack is written as one image (IFD) per band, all sharing the same
//! geo-referencing tags. Reduced-resolution overviews follow the full
//! resolution bands and are flagged with `NewSubfileType = 1`, so readers
//! that only want data can skip them.

use crate::extent::RasterExtent;
use crate::pixel::Pixel;
use crate::{MapsError, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::ColorType;
use tiff::encoder::compression::{Compression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;
use tracing::debug;

/// GeoKeyDirectory for geographic WGS84 coordinates, pixel-is-area.
const WGS84_GEO_KEYS: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326];

/// Band samples of a stack, `(band, row, col)`.
#[derive(Debug, Clone, PartialEq)]
pub enum StackData {
    /// Continuous values (sumaps, Shannon).
    F32(Array3<f32>),
    /// Categories.
    U8(Array3<u8>),
}

impl StackData {
    /// `(bands, rows, cols)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            StackData::F32(a) => a.dim(),
            StackData::U8(a) => a.dim(),
        }
    }

    /// Sample type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            StackData::F32(_) => f32::NAME,
            StackData::U8(_) => u8::NAME,
        }
    }
}

/// A geo-referenced stack of equally sized bands.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterStack {
    /// Stack name, e.g. `comp-B` or `iucn-LC_iucn-NT`.
    pub name: String,
    /// Pixel grid shared by every band.
    pub extent: RasterExtent,
    /// Value marking cells without data.
    pub nodata: f64,
    /// Samples.
    pub data: StackData,
}

impl RasterStack {
    /// Stack checked against its extent.
    pub fn new(name: impl Into<String>, extent: RasterExtent, nodata: f64, data: StackData) -> Result<Self> {
        let (_, rows, cols) = data.dim();
        if (rows, cols) != extent.shape() {
            return Err(MapsError::BandShape {
                expected: extent.shape(),
                actual: (rows, cols),
            });
        }
        Ok(Self {
            name: name.into(),
            extent,
            nodata,
            data,
        })
    }

    /// Number of bands.
    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    /// Sample at `(band, row, col)`, widened to `f64`.
    pub fn value(&self, band: usize, row: usize, col: usize) -> Option<f64> {
        match &self.data {
            StackData::F32(a) => a.get((band, row, col)).map(|v| v.to_f64()),
            StackData::U8(a) => a.get((band, row, col)).map(|v| v.to_f64()),
        }
    }

    /// True when `v` carries data.
    pub fn is_valid(&self, v: f64) -> bool {
        !v.is_nan() && v != self.nodata
    }

    /// Number of samples, over all bands, that carry data.
    pub fn valid_count(&self) -> usize {
        match &self.data {
            StackData::F32(a) => a.iter().filter(|v| self.is_valid(v.to_f64())).count(),
            StackData::U8(a) => a.iter().filter(|v| self.is_valid(v.to_f64())).count(),
        }
    }
}

/// Compression applied to written bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileCompression {
    /// Raw strips.
    #[default]
    None,
    /// zlib/deflate.
    Deflate,
    /// LZW.
    Lzw,
}

/// How a stack is encoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Band compression.
    pub compression: TileCompression,
    /// Decimation factors of averaged overviews, e.g. `[2, 4, 8]`.
    pub overviews: Vec<u32>,
    /// Always write BigTIFF, even when classic offsets would do.
    pub big_tiff: bool,
}

/// Largest file classic TIFF can address with its 32-bit offsets.
pub const CLASSIC_TIFF_LIMIT: u64 = u32::MAX as u64;

/// Uncompressed sample bytes of `bands` bands of `rows x cols`, overviews
/// included.
pub fn estimated_size(bands: usize, rows: usize, cols: usize, sample_bytes: usize, overviews: &[u32]) -> u64 {
    let band = |r: usize, c: usize| (r as u64) * (c as u64) * sample_bytes as u64;
    let mut total = band(rows, cols);
    for factor in overviews.iter().map(|f| *f as usize).filter(|f| *f > 1) {
        total += band(rows.div_ceil(factor), cols.div_ceil(factor));
    }
    total * bands as u64
}

/// Whether a file of about `estimate` bytes needs 64-bit offsets.
///
/// Leaves headroom for directories, strip tables and compressed strips that
/// come out larger than their input.
pub fn needs_big_tiff(estimate: u64) -> bool {
    estimate + estimate / 64 + (1 << 20) > CLASSIC_TIFF_LIMIT
}

/// Header shared by every band of a stack written with [`write_band_stream`].
#[derive(Debug, Clone, Copy)]
pub struct BandLayout<'a> {
    /// Stack name, stored as the image description.
    pub name: &'a str,
    /// Georeferencing of every band.
    pub extent: &'a RasterExtent,
    /// Nodata value.
    pub nodata: f64,
    /// Number of bands.
    pub bands: usize,
}

/// Encode `stack` into `writer`.
pub fn write_stack<W: Write + Seek>(writer: &mut W, stack: &RasterStack, options: &WriteOptions) -> Result<()> {
    let layout = BandLayout {
        name: &stack.name,
        extent: &stack.extent,
        nodata: stack.nodata,
        bands: stack.bands(),
    };
    match &stack.data {
        StackData::F32(a) => write_band_stream(writer, layout, |i| Ok(a.index_axis(Axis(0), i).to_owned()), options),
        StackData::U8(a) => write_band_stream(writer, layout, |i| Ok(a.index_axis(Axis(0), i).to_owned()), options),
    }
}

/// Encode `stack` into the file at `path`, creating parent directories.
pub fn write_stack_to<P: AsRef<Path>>(path: P, stack: &RasterStack, options: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_stack(&mut writer, stack, options)?;
    writer.flush()?;
    Ok(())
}

/// Encode bands produced one at a time by `band`, called with indices
/// `0..layout.bands` in order.
///
/// Only the current band and the overviews of the bands seen so far are held.
/// BigTIFF is chosen when the estimated size does not fit classic offsets.
pub fn write_band_stream<W, P, F>(writer: &mut W, layout: BandLayout<'_>, band: F, options: &WriteOptions) -> Result<()>
where
    W: Write + Seek,
    P: Pixel,
    [P]: TiffValue,
    F: FnMut(usize) -> Result<Array2<P>>,
{
    let (rows, cols) = layout.extent.shape();
    let estimate = estimated_size(layout.bands, rows, cols, std::mem::size_of::<P>(), &options.overviews);
    if options.big_tiff || needs_big_tiff(estimate) {
        debug!("Writing {} as BigTIFF (~{} bytes)", layout.name, estimate);
        let mut encoder = TiffEncoder::new_big(writer)?;
        write_bands(&mut encoder, layout, band, options)
    } else {
        let mut encoder = TiffEncoder::new(writer)?;
        write_bands(&mut encoder, layout, band, options)
    }
}

fn write_bands<W, K, P, F>(
    encoder: &mut TiffEncoder<W, K>,
    layout: BandLayout<'_>,
    mut band: F,
    options: &WriteOptions,
) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
    P: Pixel,
    [P]: TiffValue,
    F: FnMut(usize) -> Result<Array2<P>>,
{
    let nodata = format_nodata(layout.nodata);
    let factors: Vec<usize> = options.overviews.iter().map(|f| *f as usize).filter(|f| *f > 1).collect();
    let mut overviews: Vec<Vec<Array2<P>>> = factors.iter().map(|_| Vec::with_capacity(layout.bands)).collect();

    for i in 0..layout.bands {
        let data = band(i)?;
        if data.dim() != layout.extent.shape() {
            return Err(MapsError::BandShape {
                expected: layout.extent.shape(),
                actual: data.dim(),
            });
        }
        write_band_compressed(encoder, data.view(), layout.extent, layout.name, &nodata, false, options.compression)?;
        for (factor, reduced) in factors.iter().zip(overviews.iter_mut()) {
            reduced.push(average_overview(data.view(), *factor, layout.nodata));
        }
    }
    for (factor, reduced) in factors.iter().zip(&overviews) {
        let extent = overview_extent(layout.extent, *factor);
        for data in reduced {
            write_band_compressed(encoder, data.view(), &extent, layout.name, &nodata, true, options.compression)?;
        }
    }
    Ok(())
}

fn write_band_compressed<W, K, P>(
    encoder: &mut TiffEncoder<W, K>,
    band: ArrayView2<P>,
    extent: &RasterExtent,
    name: &str,
    nodata: &str,
    overview: bool,
    compression: TileCompression,
) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
    P: Pixel,
    [P]: TiffValue,
{
    match compression {
        TileCompression::None => write_band::<W, K, P::Color, _>(encoder, band, extent, name, nodata, overview, Uncompressed),
        TileCompression::Deflate => {
            write_band::<W, K, P::Color, _>(encoder, band, extent, name, nodata, overview, Deflate::default())
        }
        TileCompression::Lzw => write_band::<W, K, P::Color, _>(encoder, band, extent, name, nodata, overview, Lzw),
    }
}

fn write_band<W, K, C, D>(
    encoder: &mut TiffEncoder<W, K>,
    band: ArrayView2<C::Inner>,
    extent: &RasterExtent,
    name: &str,
    nodata: &str,
    overview: bool,
    compression: D,
) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
    C: ColorType,
    C::Inner: Copy,
    [C::Inner]: TiffValue,
    D: Compression,
{
    let (rows, cols) = band.dim();
    let mut image = encoder.new_image_with_compression::<C, D>(cols as u32, rows as u32, compression)?;
    let dir = image.encoder();
    if overview {
        dir.write_tag(Tag::NewSubfileType, 1u32)?;
    }
    dir.write_tag(Tag::ImageDescription, name)?;
    dir.write_tag(Tag::ModelPixelScaleTag, &[extent.x_res, extent.y_res, 0.0][..])?;
    dir.write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, extent.x_min, extent.y_max, 0.0][..])?;
    dir.write_tag(Tag::GeoKeyDirectoryTag, &WGS84_GEO_KEYS[..])?;
    dir.write_tag(Tag::GdalNodata, nodata)?;

    match band.as_slice() {
        Some(samples) => image.write_data(samples)?,
        None => {
            let samples: Vec<C::Inner> = band.iter().copied().collect();
            image.write_data(&samples)?
        }
    }
    Ok(())
}

fn format_nodata(nodata: f64) -> String {
    if nodata.fract() == 0.0 && nodata.abs() < 1e15 {
        format!("{}", nodata as i64)
    } else {
        format!("{}", nodata)
    }
}

fn overview_extent(extent: &RasterExtent, factor: usize) -> RasterExtent {
    RasterExtent {
        x_res: extent.x_res * factor as f64,
        y_res: extent.y_res * factor as f64,
        width: extent.width.div_ceil(factor),
        height: extent.height.div_ceil(factor),
        ..*extent
    }
}

/// Block-average `band` by `factor`, ignoring nodata and NaN samples.
///
/// Blocks without any valid sample become nodata.
pub fn average_overview<P: Pixel>(band: ArrayView2<P>, factor: usize, nodata: f64) -> Array2<P> {
    let factor = factor.max(1);
    let (rows, cols) = band.dim();
    let shape = (rows.div_ceil(factor), cols.div_ceil(factor));
    Array2::from_shape_fn(shape, |(r, c)| {
        let (mut sum, mut n) = (0.0f64, 0usize);
        for rr in r * factor..((r + 1) * factor).min(rows) {
            for cc in c * factor..((c + 1) * factor).min(cols) {
                let v = band[(rr, cc)].to_f64();
                if !v.is_nan() && v != nodata {
                    sum += v;
                    n += 1;
                }
            }
        }
        if n == 0 {
            P::from_f64(nodata)
        } else {
            P::from_f64(sum / n as f64)
        }
    })
}

/// Decode a stack written by [`write_stack`], or any north-up single-sample
/// GeoTIFF with one image per band.
///
/// Overview images are skipped. The stack name is the image description,
/// falling back to the file stem.
pub fn read_stack<P: AsRef<Path>>(path: P) -> Result<RasterStack> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 8 * 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 8 * 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(limits);

    let invalid = |reason: &str| MapsError::InvalidGeoTiff {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut extent: Option<RasterExtent> = None;
    let mut nodata = f64::NAN;
    let mut name = None;
    let mut f32_bands: Vec<f32> = Vec::new();
    let mut u8_bands: Vec<u8> = Vec::new();
    let mut bands = 0usize;

    loop {
        let reduced = decoder
            .get_tag_u32(Tag::NewSubfileType)
            .map(|v| v & 1 == 1)
            .unwrap_or(false);
        if !reduced {
            let (width, height) = decoder.dimensions()?;
            let (width, height) = (width as usize, height as usize);
            match &extent {
                None => {
                    extent = Some(read_extent(&mut decoder, width, height).ok_or_else(|| invalid("missing geo tags"))?);
                    nodata = decoder
                        .get_tag_ascii_string(Tag::GdalNodata)
                        .ok()
                        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok())
                        .unwrap_or(f64::NAN);
                    name = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
                }
                Some(e) if e.shape() != (height, width) => {
                    return Err(MapsError::BandShape {
                        expected: e.shape(),
                        actual: (height, width),
                    });
                }
                Some(_) => {}
            }
            match decoder.read_image()? {
                DecodingResult::F32(v) if u8_bands.is_empty() => f32_bands.extend(v),
                DecodingResult::U8(v) if f32_bands.is_empty() => u8_bands.extend(v),
                _ => return Err(invalid("bands must all be float32 or all uint8")),
            }
            bands += 1;
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let extent = extent.ok_or_else(|| invalid("no full-resolution image"))?;
    let shape = (bands, extent.height, extent.width);
    let shape_err = |_| invalid("band sizes do not match the image dimensions");
    let data = if u8_bands.is_empty() {
        StackData::F32(Array3::from_shape_vec(shape, f32_bands).map_err(shape_err)?)
    } else {
        StackData::U8(Array3::from_shape_vec(shape, u8_bands).map_err(shape_err)?)
    };
    let name = name
        .map(|n| n.trim_end_matches('\0').to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();
    RasterStack::new(name, extent, nodata, data)
}

fn read_extent<R: std::io::Read + Seek>(decoder: &mut Decoder<R>, width: usize, height: usize) -> Option<RasterExtent> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    if tiepoint.len() < 6 || scale.len() < 2 {
        return None;
    }
    let (x_res, y_res) = (scale[0], scale[1]);
    Some(RasterExtent {
        x_min: tiepoint[3] - tiepoint[0] * x_res,
        y_max: tiepoint[4] + tiepoint[1] * y_res,
        x_res,
        y_res,
        width,
        height,
    })
}
