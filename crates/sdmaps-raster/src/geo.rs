//! Latitude/longitude channels.

use crate::provider::PatchProvider;
use crate::transform::RasterTransform;
use crate::Result;
use ndarray::Array3;
use sdmaps_common::PointId;
use serde::{Deserialize, Serialize};

const LAT_MEAN: f64 = 29.50334;
const LAT_STD: f64 = 35.58280;
const LON_MEAN: f64 = 24.09806;
const LON_STD: f64 = 67.70266;

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.0;

/// How coordinates are laid out over the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoMode {
    /// Same latitude and longitude in every pixel.
    Constant,
    /// Like `Constant`, rounded to a fixed number of decimals.
    Degraded,
    /// Coordinates sweep the patch's ground extent.
    Sliding,
}

/// Two-channel provider: channel 0 is latitude, channel 1 longitude.
#[derive(Debug, Clone)]
pub struct GeoFeatureProvider {
    mode: GeoMode,
    size: usize,
    res: f64,
    decimals: i32,
    transform: Option<RasterTransform>,
}

impl GeoFeatureProvider {
    /// Provider with patches of `size` pixels of `res` metres.
    pub fn new(mode: GeoMode, size: usize, res: f64, transform: Option<RasterTransform>) -> Self {
        Self {
            mode,
            size,
            res,
            decimals: 2,
            transform,
        }
    }

    /// Decimals kept in `Degraded` mode (default 2).
    pub fn with_decimals(mut self, decimals: i32) -> Self {
        self.decimals = decimals;
        self
    }

    /// `(lat_min, lat_max, lon_min, lon_max)` of the patch around `(lat, lon)`.
    ///
    /// Bounds beyond the poles or the antimeridian wrap with floored modulo.
    pub fn extent(&self, lat: f64, lon: f64) -> (f64, f64, f64, f64) {
        let d = (self.size as f64 * self.res / 2.0).floor() / 1000.0;
        let d_lat = d / KM_PER_DEGREE;
        let d_lon = d / (KM_PER_DEGREE * (lat.trunc().to_radians()).cos());

        let wrap = |v: f64, lo: f64, hi: f64, modulus: f64| {
            if v < lo || v > hi {
                floored_mod(v, modulus)
            } else {
                v
            }
        };

        (
            wrap(lat - d_lat, -90.0, f64::INFINITY, 90.0),
            wrap(lat + d_lat, f64::NEG_INFINITY, 90.0, -90.0),
            wrap(lon - d_lon, -180.0, f64::INFINITY, 180.0),
            wrap(lon + d_lon, f64::NEG_INFINITY, 180.0, -180.0),
        )
    }

    fn features(&self, lat: f64, lon: f64) -> Array3<f64> {
        let n = self.size;
        match self.mode {
            GeoMode::Constant => constant(lat, lon, n),
            GeoMode::Degraded => {
                let scale = 10f64.powi(self.decimals);
                let round = |v: f64| (v * scale).round_ties_even() / scale;
                constant(round(lat), round(lon), n)
            }
            GeoMode::Sliding => {
                let (lat_min, lat_max, lon_min, lon_max) = self.extent(lat, lon);
                let lats = linspace(lat_max, lat_min, n);
                let lons = linspace(lon_min, lon_max, n);
                Array3::from_shape_fn((2, n, n), |(c, i, j)| if c == 0 { lats[i] } else { lons[j] })
            }
        }
    }
}

impl PatchProvider for GeoFeatureProvider {
    fn name(&self) -> &str {
        "geo"
    }

    fn channels(&self) -> usize {
        2
    }

    fn patch_size(&self) -> usize {
        self.size
    }

    fn get(&self, _id: PointId, lat: f64, lon: f64) -> Result<Array3<f32>> {
        let mut patch = self.features(lat, lon);
        match self.transform {
            Some(RasterTransform::Normalize) => {
                patch
                    .index_axis_mut(ndarray::Axis(0), 0)
                    .mapv_inplace(|v| 2.0 * (v + 90.0) / 180.0 - 1.0);
                patch
                    .index_axis_mut(ndarray::Axis(0), 1)
                    .mapv_inplace(|v| 2.0 * (v + 180.0) / 360.0 - 1.0);
            }
            Some(RasterTransform::Standardize) => {
                patch
                    .index_axis_mut(ndarray::Axis(0), 0)
                    .mapv_inplace(|v| (v - LAT_MEAN) / LAT_STD);
                patch
                    .index_axis_mut(ndarray::Axis(0), 1)
                    .mapv_inplace(|v| (v - LON_MEAN) / LON_STD);
            }
            None => {}
        }
        Ok(patch.mapv(|v| v as f32))
    }
}

fn constant(lat: f64, lon: f64, n: usize) -> Array3<f64> {
    Array3::from_shape_fn((2, n, n), |(c, _, _)| if c == 0 { lat } else { lon })
}

/// `a mod m` with the sign of `m`.
fn floored_mod(a: f64, m: f64) -> f64 {
    a - m * (a / m).floor()
}

/// `n` evenly spaced values from `start` to `stop`, both included.
fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut v: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            v[n - 1] = stop;
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_mode() {
        let p = GeoFeatureProvider::new(GeoMode::Constant, 3, 10.0, None);
        let patch = p.get(1, 43.61, 3.87).unwrap();
        assert_eq!(patch.shape(), &[2, 3, 3]);
        assert!(patch.index_axis(ndarray::Axis(0), 0).iter().all(|v| *v == 43.61f32));
        assert!(patch.index_axis(ndarray::Axis(0), 1).iter().all(|v| *v == 3.87f32));
    }

    #[test]
    fn test_degraded_mode_rounds() {
        let p = GeoFeatureProvider::new(GeoMode::Degraded, 2, 10.0, None).with_decimals(1);
        let patch = p.get(1, 43.6789, -3.8712).unwrap();
        assert_relative_eq!(patch[[0, 0, 0]], 43.7, epsilon = 1e-5);
        assert_relative_eq!(patch[[1, 1, 1]], -3.9, epsilon = 1e-5);
    }

    #[test]
    fn test_sliding_directions() {
        let p = GeoFeatureProvider::new(GeoMode::Sliding, 5, 1000.0, None);
        let patch = p.get(1, 10.0, 20.0).unwrap();
        // Latitude decreases down the rows, longitude increases across columns
        assert!(patch[[0, 0, 2]] > patch[[0, 4, 2]]);
        assert!(patch[[1, 2, 0]] < patch[[1, 2, 4]]);
        assert_relative_eq!(patch[[0, 2, 2]], 10.0, epsilon = 1e-4);
        assert_relative_eq!(patch[[1, 2, 2]], 20.0, epsilon = 1e-4);

        let (lat_min, lat_max, _, _) = p.extent(10.0, 20.0);
        assert_relative_eq!(lat_max - lat_min, 2.0 * 2.5 / 111.0, epsilon = 1e-9);
    }

    #[test]
    fn test_extent_wraps_at_pole() {
        let p = GeoFeatureProvider::new(GeoMode::Sliding, 100, 2000.0, None);
        let (_, lat_max, _, lon_max) = p.extent(89.5, 179.9);
        assert!(lat_max <= 0.0);
        assert!(lon_max <= 0.0);
    }

    #[test]
    fn test_normalize_transform() {
        let p = GeoFeatureProvider::new(GeoMode::Constant, 1, 10.0, Some(RasterTransform::Normalize));
        let patch = p.get(1, 90.0, -180.0).unwrap();
        assert_relative_eq!(patch[[0, 0, 0]], 1.0);
        assert_relative_eq!(patch[[1, 0, 0]], -1.0);
    }

    #[test]
    fn test_standardize_transform() {
        let p = GeoFeatureProvider::new(GeoMode::Constant, 1, 10.0, Some(RasterTransform::Standardize));
        let patch = p.get(1, LAT_MEAN, LON_MEAN + LON_STD).unwrap();
        assert_relative_eq!(patch[[0, 0, 0]], 0.0, epsilon = 1e-6);
        assert_relative_eq!(patch[[1, 0, 0]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(1.0, 0.0, 3), vec![1.0, 0.5, 0.0]);
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
    }
}
