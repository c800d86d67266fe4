//! Value transforms applied to rasters and geo patches.

use serde::{Deserialize, Serialize};

/// Transform applied once to a raster after loading.
///
/// Continuous rasters only; categorical rasters are never transformed.
///
/// - `Normalize`: each non-sentinel value `v` becomes `(v - min) / (max - min)`,
///   or `ln(v + 1 - min)` when the log transform is requested. Sentinel cells
///   become `-1` and `-1` is the raster's sentinel from then on.
/// - `Standardize`: each non-sentinel value becomes `(v - mean) / std`; the
///   sentinel is left unchanged.
///
/// The geo feature provider reuses the same variants for its own patch
/// transforms (see [`crate::GeoFeatureProvider`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterTransform {
    /// Min/max scaling (or log scaling).
    Normalize,
    /// Z-score.
    Standardize,
}

/// Sentinel used by normalised rasters.
pub(crate) const NORMALIZED_SENTINEL: f32 = -1.0;

/// Calibration needed by [`RasterTransform::apply`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Calibration {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl RasterTransform {
    /// Transform `values` in place and return the sentinel in effect afterwards.
    pub(crate) fn apply(
        self,
        values: &mut [f32],
        sentinel: f32,
        calibration: Calibration,
        log_transform: bool,
    ) -> f32 {
        match self {
            RasterTransform::Normalize => {
                let min = calibration.min as f32;
                let span = (calibration.max - calibration.min) as f32;
                for v in values.iter_mut() {
                    *v = if *v == sentinel {
                        NORMALIZED_SENTINEL
                    } else if log_transform {
                        (*v + 1.0 - min).ln()
                    } else {
                        (*v - min) / span
                    };
                }
                NORMALIZED_SENTINEL
            }
            RasterTransform::Standardize => {
                let mean = calibration.mean as f32;
                let std = calibration.std as f32;
                for v in values.iter_mut().filter(|v| **v != sentinel) {
                    *v = (*v - mean) / std;
                }
                sentinel
            }
        }
    }
}
