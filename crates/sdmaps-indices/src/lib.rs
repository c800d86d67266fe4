//! # sdmaps-indices
//!
//! Aggregation of exported predictions into per-point ecological indices.
//!
//! Each flushed export buffer is joined onto the reference occurrence grid
//! and run through a fixed sequence of stages by [`GridIndexAggregator`]:
//!
//! 1. join on point id;
//! 2. probability threshold `T`;
//! 3. region attach ([`RegionSource`]);
//! 4. out-of-range filter ([`RangeMap`]);
//! 5. renormalisation;
//! 6. empty flag and derived columns: summed probability per threat
//!    status ("sumap"), Shannon diversity and worst-status category.
//!
//! Derived columns are named `<source>-B`, `<source>-<status>`,
//! `<source>-cats` and `shannon`, with `source` one of `iucn` or `comp`
//! ([`StatusSource`]).

mod aggregator;
mod derived;
mod error;
mod filters;
mod grid;
mod range;
mod regions;
mod status;

pub use aggregator::{AggregationConfig, GridIndexAggregator};
pub use derived::{
    binary_column, category_column, derive_all, shannon, status_column, sumap, worst_status_category, SHANNON,
};
pub use error::IndicesError;
pub use filters::{apply_threshold, mark_empty, renormalize};
pub use grid::{Grid, GridColumns, GridPoint, GridRow, ReferenceGrid};
pub use range::{filter_out_of_range, RangeMap};
pub use regions::{attach_regions, parse_region_code, Region, RegionCode, RegionLayer, RegionMatch, RegionSource};
pub use status::{
    default_statuses, is_threatened, SpeciesStatus, StatusFiles, StatusLevel, StatusLookup, StatusSource,
    StatusTable, THREATENED,
};

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, IndicesError>;
