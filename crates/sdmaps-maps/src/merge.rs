//! Mosaicking buffer tiles.

use crate::extent::RasterExtent;
use crate::geotiff::{read_stack, write_stack_to, RasterStack, StackData, TileCompression, WriteOptions};
use crate::pixel::Pixel;
use crate::{MapsError, Result};
use ndarray::Array3;
use sdmaps_metrics::metric_defs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Name of the running mosaic kept next to the merged tiles.
pub const LAST_MERGE: &str = "last_merge.tif";

/// Name of the copy written by explicit pair merges.
pub const LAST_PAIR_MERGE: &str = "last_tif2merge.tif";

/// Combine two stacks over the union of their extents.
///
/// Valid pixels of `newer` win; where `newer` holds nodata (or lies outside)
/// the pixels of `older` show through. The result uses `newer`'s name and
/// nodata value.
pub fn mosaic(newer: &RasterStack, older: &RasterStack) -> Result<RasterStack> {
    if newer.bands() != older.bands() {
        return Err(MapsError::Incompatible(format!(
            "{} has {} bands, {} has {}",
            newer.name,
            newer.bands(),
            older.name,
            older.bands()
        )));
    }
    if !newer.extent.same_resolution(&older.extent) {
        return Err(MapsError::Incompatible(format!(
            "pixel sizes differ ({} x {} vs {} x {})",
            newer.extent.x_res, newer.extent.y_res, older.extent.x_res, older.extent.y_res
        )));
    }

    let extent = newer.extent.union(&older.extent);
    let data = match (&newer.data, &older.data) {
        (StackData::F32(n), StackData::F32(o)) => StackData::F32(mosaic_typed(n, newer, o, older, &extent)),
        (StackData::U8(n), StackData::U8(o)) => StackData::U8(mosaic_typed(n, newer, o, older, &extent)),
        _ => {
            return Err(MapsError::Incompatible(format!(
                "sample types differ ({} vs {})",
                newer.data.type_name(),
                older.data.type_name()
            )))
        }
    };
    RasterStack::new(newer.name.clone(), extent, newer.nodata, data)
}

fn mosaic_typed<P: Pixel>(
    newer: &Array3<P>,
    newer_stack: &RasterStack,
    older: &Array3<P>,
    older_stack: &RasterStack,
    extent: &RasterExtent,
) -> Array3<P> {
    let mut out = Array3::from_elem((newer.dim().0, extent.height, extent.width), P::from_f64(newer_stack.nodata));
    paint(&mut out, extent, older, older_stack);
    paint(&mut out, extent, newer, newer_stack);
    out
}

fn paint<P: Pixel>(out: &mut Array3<P>, outer: &RasterExtent, src: &Array3<P>, stack: &RasterStack) {
    let (row_off, col_off) = stack.extent.offset_in(outer);
    for ((b, r, c), v) in src.indexed_iter() {
        if !stack.is_valid(v.to_f64()) {
            continue;
        }
        if let Some(cell) = out.get_mut((b, r + row_off, c + col_off)) {
            *cell = *v;
        }
    }
}

/// Mosaic `stacks` in order: each stack is laid over everything before it.
pub fn mosaic_sequence(stacks: &[RasterStack]) -> Result<Option<RasterStack>> {
    let mut iter = stacks.iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut acc = first.clone();
    for stack in iter {
        acc = mosaic(stack, &acc)?;
    }
    Ok(Some(acc))
}

/// Options of [`incremental_merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    /// Output path; defaults to a name derived from the inputs under `merged/`.
    pub dest: Option<PathBuf>,
    /// Also copy the result to the running-mosaic file.
    pub copy: bool,
    /// Running-mosaic file name when no explicit partner is given.
    pub copy_name: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            dest: None,
            copy: true,
            copy_name: LAST_MERGE.to_string(),
        }
    }
}

/// Files produced by [`incremental_merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The merged GeoTIFF.
    pub merged: PathBuf,
    /// The running-mosaic copy, if written.
    pub copy: Option<PathBuf>,
    /// Number of inputs mosaicked (1 when there was nothing to merge with).
    pub inputs: usize,
}

/// Merge `tile` into a mosaic next to it, under `<tile dir>/merged/`.
///
/// With `other`, writes `<tile>_<other>_merged.tif` and copies it to
/// `last_tif2merge.tif`. Without, merges with `merged/<copy_name>` when it
/// exists and writes `<tile>_merged.tif`, then refreshes `<copy_name>`; the
/// first tile of a run is written alone so later merges have a base. In
/// both cases `tile` is the newer input.
pub fn incremental_merge(tile: &Path, other: Option<&Path>, options: &MergeOptions) -> Result<MergeOutcome> {
    let start = Instant::now();
    let dir = tile.parent().unwrap_or_else(|| Path::new("."));
    let merged_dir = dir.join("merged");
    std::fs::create_dir_all(&merged_dir)?;
    let stem = file_stem(tile);

    let (partner, default_dest, copy_path) = match other {
        Some(other) => (
            Some(other.to_path_buf()),
            merged_dir.join(format!("{}_{}_merged.tif", stem, file_stem(other))),
            merged_dir.join(LAST_PAIR_MERGE),
        ),
        None => {
            let last = merged_dir.join(&options.copy_name);
            (
                last.is_file().then_some(last.clone()),
                merged_dir.join(format!("{}_merged.tif", stem)),
                last,
            )
        }
    };
    let dest = options.dest.clone().unwrap_or(default_dest);

    let newer = read_stack(tile)?;
    let (result, inputs) = match &partner {
        Some(path) => (mosaic(&newer, &read_stack(path)?)?, 2),
        None => (newer, 1),
    };

    let write_options = WriteOptions {
        compression: TileCompression::Deflate,
        ..Default::default()
    };
    write_stack_to(&dest, &result, &write_options)?;

    let copy = if options.copy {
        std::fs::copy(&dest, &copy_path)?;
        Some(copy_path)
    } else {
        None
    };

    metrics::counter!(metric_defs::MAPS_MERGES.name).increment(1);
    info!(
        "Merged {} ({} inputs) into {} in {:.2}s",
        tile.display(),
        inputs,
        dest.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(MergeOutcome {
        merged: dest,
        copy,
        inputs,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
