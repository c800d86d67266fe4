//! Per-row list stages: threshold, renormalisation, empty flag.

use crate::grid::Grid;
use tracing::debug;

/// Keep the pairs whose probability is at least `t`.
///
/// Classes and probabilities are filtered together, so they stay aligned;
/// NaN probabilities never pass.
pub fn apply_threshold(grid: &mut Grid, t: f32) {
    let mut dropped = 0usize;
    for row in grid.rows_mut() {
        let before = row.probas.len();
        row.retain_pairs(|_, p| p >= t);
        dropped += before - row.probas.len();
    }
    debug!("Threshold {} dropped {} classes", t, dropped);
}

/// Rescale each row's probabilities to sum to one.
///
/// Rows without classes stay empty; rows whose sum is not positive are
/// left unchanged.
pub fn renormalize(grid: &mut Grid) {
    for row in grid.rows_mut() {
        let sum: f64 = row.probas.iter().map(|p| *p as f64).sum();
        if row.probas.is_empty() || sum.is_nan() || sum <= 0.0 {
            continue;
        }
        for p in &mut row.probas {
            *p = (*p as f64 / sum) as f32;
        }
    }
}

/// Set the `empty` flag: true when no class is retained.
pub fn mark_empty(grid: &mut Grid) -> usize {
    let mut n = 0;
    for row in grid.rows_mut() {
        row.empty = row.probas.is_empty();
        n += row.empty as usize;
    }
    n
}
