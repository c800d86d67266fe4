//! The fixed-order aggregation pipeline applied to every flushed buffer.

use crate::derived::derive_all;
use crate::filters::{apply_threshold, mark_empty, renormalize};
use crate::grid::{Grid, ReferenceGrid};
use crate::range::{filter_out_of_range, RangeMap};
use crate::regions::{attach_regions, RegionSource};
use crate::status::{default_statuses, StatusTable};
use crate::Result;
use sdmaps_common::ExportedPrediction;
use sdmaps_metrics::Diagnostics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Probability threshold T.
    #[serde(rename = "T", alias = "threshold")]
    pub threshold: f32,
    /// Drop classes outside their known range.
    pub removes_oor: bool,
    /// Range map level matched against region codes.
    pub range_level: u8,
    /// Rescale retained probabilities to sum to one.
    #[serde(rename = "norm_AbTprobas", alias = "normalize_probas")]
    pub normalize_probas: bool,
    /// Divide Shannon by the class count.
    pub norm_shannon: bool,
    /// Statuses, least to most severe.
    #[serde(rename = "Lstats", alias = "statuses")]
    pub statuses: Vec<String>,
    /// Worst-status category of rows without any status, and raster value of
    /// empty rows.
    pub empty_value: u8,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            threshold: 8.75e-5,
            removes_oor: true,
            range_level: 1,
            normalize_probas: true,
            norm_shannon: false,
            statuses: default_statuses(),
            empty_value: 255,
        }
    }
}

/// Turns exported buffers into grid rows with derived columns.
///
/// Stages run in this order: join, threshold, region attach, out-of-range
/// filter, renormalisation, empty flag, derived columns. Region attach and
/// the range filter only run when `removes_oor` is set and a range map is
/// available.
#[derive(Debug)]
pub struct GridIndexAggregator {
    config: AggregationConfig,
    reference: Arc<ReferenceGrid>,
    regions: RegionSource,
    ranges: Option<Arc<RangeMap>>,
    status: Arc<StatusTable>,
    diagnostics: Arc<Diagnostics>,
}

impl GridIndexAggregator {
    /// Aggregator over `reference`.
    pub fn new(
        config: AggregationConfig,
        reference: Arc<ReferenceGrid>,
        regions: RegionSource,
        ranges: Option<Arc<RangeMap>>,
        status: Arc<StatusTable>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            config,
            reference,
            regions,
            ranges,
            status,
            diagnostics,
        }
    }

    /// Settings.
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Reference grid.
    pub fn reference(&self) -> &ReferenceGrid {
        &self.reference
    }

    /// Run every stage on one buffer.
    pub fn aggregate(&self, batch: &[ExportedPrediction]) -> Result<Grid> {
        let start = Instant::now();
        let mut grid = Grid::join(&self.reference, batch, &self.diagnostics);
        apply_threshold(&mut grid, self.config.threshold);

        if self.config.removes_oor {
            if let Some(ranges) = &self.ranges {
                attach_regions(&mut grid, &self.regions, &self.diagnostics);
                filter_out_of_range(&mut grid, ranges, self.config.range_level, &self.diagnostics);
            }
        }
        if self.config.normalize_probas {
            renormalize(&mut grid);
        }
        let empty = mark_empty(&mut grid);

        derive_all(
            &mut grid,
            &self.status,
            &self.config.statuses,
            self.config.empty_value,
            self.config.norm_shannon,
            &self.diagnostics,
        )?;

        info!(
            "Aggregated {} points ({} empty) in {:.2}s",
            grid.len(),
            empty,
            start.elapsed().as_secs_f64()
        );
        Ok(grid)
    }
}
