//! Patch extraction around a coordinate, with resolution correction.

use crate::raster::LoadedRaster;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use sdmaps_metrics::{Diagnostics, FallbackKind};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Length of one arc-second of latitude at the equator, in metres.
pub const EQUATOR_ARC_SECOND_IN_METERS: f64 = 30.87;

/// Read windows larger than this (per axis, in native pixels) are refused.
const MAX_WINDOW: f64 = 65_536.0;

/// Rank and biome lookup for ecoregion codes.
///
/// Codes are ranked 1-based in sorted order; the biome of a code is
/// `code / 100 % 100`.
#[derive(Debug, Clone)]
pub(crate) struct BiomeIndex {
    ranks: HashMap<i64, f32>,
    biomes: Vec<i64>,
    divisor: f32,
}

impl BiomeIndex {
    pub(crate) fn new(categories: &[f64], normalized: bool) -> Self {
        let codes: BTreeSet<i64> = categories.iter().map(|c| *c as i64).collect();
        let ranks = codes
            .iter()
            .enumerate()
            .map(|(i, code)| (*code, (i + 1) as f32))
            .collect();
        let biomes = codes
            .iter()
            .map(|code| biome_of(*code))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let divisor = if normalized {
            (codes.len() + 1) as f32
        } else {
            1.0
        };
        Self {
            ranks,
            biomes,
            divisor,
        }
    }

    pub(crate) fn biomes(&self) -> &[i64] {
        &self.biomes
    }

    /// One band per biome: the code's rank where the pixel is in that biome,
    /// 0 elsewhere. Sentinel pixels (and unknown codes) stay sentinel in every band.
    fn encode(&self, plane: &Array2<f32>, sentinel: f32) -> Array3<f32> {
        let (h, w) = plane.dim();
        Array3::from_shape_fn((self.biomes.len(), h, w), |(b, i, j)| {
            let v = plane[[i, j]];
            if v == sentinel {
                return sentinel;
            }
            let code = v as i64;
            match self.ranks.get(&code) {
                Some(rank) if biome_of(code) == self.biomes[b] => rank / self.divisor,
                Some(_) => 0.0,
                None => sentinel,
            }
        })
    }
}

fn biome_of(code: i64) -> i64 {
    code / 100 % 100
}

impl LoadedRaster {
    /// Extract the patch centred on `(lat, lon)`.
    ///
    /// `size` is the side in output pixels and `res` the output pixel size in
    /// metres. Never fails: points outside the raster produce sentinel
    /// patches and are counted in `diagnostics`.
    ///
    /// The result has shape `(channels, size, size)` where `channels` is 1 for
    /// continuous rasters, the number of categories for categorical rasters,
    /// and the number of biomes for ecoregion rasters.
    pub fn get_patch(
        &self,
        lat: f64,
        lon: f64,
        size: usize,
        res: f64,
        diagnostics: &Diagnostics,
    ) -> Array3<f32> {
        let sentinel = self.sentinel();
        let (row, col) = self.geometry().cell_of(lat, lon);

        let plane = if size <= 1 {
            let v = self.value_at(row, col).unwrap_or_else(|| {
                diagnostics.record(FallbackKind::PatchOutOfBounds);
                sentinel
            });
            Array2::from_elem((1, 1), v)
        } else {
            match self.resampled_window(lat, row, col, size, res) {
                Some(p) => p,
                None => {
                    debug!(
                        "Occurrence at {}/{} probably outside raster {}; using sentinel patch",
                        lat,
                        lon,
                        self.name()
                    );
                    diagnostics.record(FallbackKind::PatchResizeFailed);
                    Array2::from_elem((size, size), sentinel)
                }
            }
        };

        self.encode(plane)
    }

    fn resampled_window(
        &self,
        lat: f64,
        row: i64,
        col: i64,
        size: usize,
        res: f64,
    ) -> Option<Array2<f32>> {
        let native = self.descriptor().resolution;
        let px_lat = EQUATOR_ARC_SECOND_IN_METERS * native;
        let px_lon = EQUATOR_ARC_SECOND_IN_METERS * lat.to_radians().cos() * native;

        let raw_rows = (1.5 * size as f64 * res / px_lat).ceil().max(4.0);
        let raw_cols = (1.5 * size as f64 * res / px_lon).ceil().max(4.0);
        if !raw_rows.is_finite() || !raw_cols.is_finite() || raw_rows > MAX_WINDOW || raw_cols > MAX_WINDOW {
            return None;
        }

        let half_rows = (raw_rows / 2.0) as i64;
        let half_cols = (raw_cols / 2.0) as i64;
        let window = self.window(row - half_rows, row + half_rows, col - half_cols, col + half_cols)?;

        let target_rows = (raw_rows * px_lat / res).round_ties_even() as usize;
        let target_cols = (raw_cols * px_lon / res).round_ties_even() as usize;
        if target_rows < size || target_cols < size {
            return None;
        }

        let resized = if self.descriptor().is_categorical() {
            resize_nearest(window.view(), target_rows, target_cols)
        } else {
            resize_bilinear(window.view(), target_rows, target_cols)
        };

        let r0 = target_rows / 2 - size / 2;
        let c0 = target_cols / 2 - size / 2;
        Some(resized.slice(s![r0..r0 + size, c0..c0 + size]).to_owned())
    }

    /// Copy rows `[r0, r1)` and columns `[c0, c1)`, padding outside cells with
    /// the sentinel. `None` when the window misses the raster entirely.
    fn window(&self, r0: i64, r1: i64, c0: i64, c1: i64) -> Option<Array2<f32>> {
        let g = self.geometry();
        let (rows, cols) = (g.n_rows as i64, g.n_cols as i64);
        let (ir0, ir1) = (r0.max(0), r1.min(rows));
        let (ic0, ic1) = (c0.max(0), c1.min(cols));
        if r1 <= r0 || c1 <= c0 || ir1 <= ir0 || ic1 <= ic0 {
            return None;
        }

        let mut out = Array2::from_elem(((r1 - r0) as usize, (c1 - c0) as usize), self.sentinel());
        out.slice_mut(s![
            (ir0 - r0) as usize..(ir1 - r0) as usize,
            (ic0 - c0) as usize..(ic1 - c0) as usize
        ])
        .assign(&self.data().slice(s![
            ir0 as usize..ir1 as usize,
            ic0 as usize..ic1 as usize
        ]));
        Some(out)
    }

    fn encode(&self, plane: Array2<f32>) -> Array3<f32> {
        let sentinel = self.sentinel();
        if let Some(biomes) = self.biomes() {
            return biomes.encode(&plane, sentinel);
        }
        match &self.descriptor().categories {
            Some(cats) => {
                let (h, w) = plane.dim();
                Array3::from_shape_fn((cats.len(), h, w), |(c, i, j)| {
                    let v = plane[[i, j]];
                    if v == sentinel {
                        sentinel
                    } else if v == cats[c] as f32 {
                        1.0
                    } else {
                        0.0
                    }
                })
            }
            None => plane.insert_axis(Axis(0)),
        }
    }
}

/// Bilinear resize with pixel centres at half-integer positions.
///
/// Source coordinates are clamped to the image, so edges replicate.
pub fn resize_bilinear(src: ArrayView2<f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (src_rows, src_cols) = src.dim();
    if src_rows == 0 || src_cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let ys: Vec<(usize, usize, f32)> = (0..rows).map(|d| linear_tap(d, src_rows, rows)).collect();
    let xs: Vec<(usize, usize, f32)> = (0..cols).map(|d| linear_tap(d, src_cols, cols)).collect();

    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let (y0, y1, fy) = ys[i];
        let (x0, x1, fx) = xs[j];
        let top = src[[y0, x0]] * (1.0 - fx) + src[[y0, x1]] * fx;
        let bottom = src[[y1, x0]] * (1.0 - fx) + src[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

fn linear_tap(dst: usize, src_len: usize, dst_len: usize) -> (usize, usize, f32) {
    let scale = src_len as f64 / dst_len as f64;
    let pos = (dst as f64 + 0.5) * scale - 0.5;
    let mut i = pos.floor();
    let mut frac = pos - i;
    if i < 0.0 {
        i = 0.0;
        frac = 0.0;
    }
    if i >= (src_len - 1) as f64 {
        i = (src_len - 1) as f64;
        frac = 0.0;
    }
    let i = i as usize;
    (i, (i + 1).min(src_len - 1), frac as f32)
}

/// Nearest-neighbour resize: destination pixel `d` reads source `floor(d * scale)`.
pub fn resize_nearest(src: ArrayView2<f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (src_rows, src_cols) = src.dim();
    if src_rows == 0 || src_cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let sy = src_rows as f64 / rows as f64;
    let sx = src_cols as f64 / cols as f64;
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let y = ((i as f64 * sy) as usize).min(src_rows - 1);
        let x = ((j as f64 * sx) as usize).min(src_cols - 1);
        src[[y, x]]
    })
}
