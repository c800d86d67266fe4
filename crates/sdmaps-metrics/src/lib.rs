//! Metrics infrastructure for the sdmaps pipeline.
//!
//! This crate declares every metric emitted by the pipeline as a structured
//! [`Metric`] constant and provides [`Diagnostics`], a set of countable
//! fallback counters that the pipeline stages share.
//!
//! Every best-effort fallback (a skipped raster, a sentinel patch, an unmapped
//! class, a nearest-region join, ...) is recorded twice: once in the local
//! atomic counter so tests can assert "N fallbacks occurred", and once through
//! the global `metrics` recorder for whatever exporter the binary installs.
//!
//! # Example
//!
//! ```rust
//! use sdmaps_metrics::{Diagnostics, FallbackKind};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.record(FallbackKind::UnmappedClass);
//! assert_eq!(diagnostics.count(FallbackKind::UnmappedClass), 1);
//! ```

pub use metrics;

mod diagnostics;

pub use diagnostics::{Diagnostics, FallbackKind};

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Counter, gauge or histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Only ever incremented.
    Counter,
    /// Set to the latest value.
    Gauge,
    /// Records a distribution of samples.
    Histogram,
}

impl MetricKind {
    /// Lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time declaration of one pipeline metric.
///
/// ```rust
/// use sdmaps_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const TILES: Metric = Metric::counter("tiles")
///     .with_description("Tiles written")
///     .with_unit(Unit::Count)
///     .with_labels(&["stack"]);
/// assert_eq!(TILES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Key passed to the `metrics` macros.
    pub name: &'static str,
    /// Counter, gauge or histogram.
    pub kind: MetricKind,
    /// Text shown by exporters.
    pub description: &'static str,
    /// Unit, when one applies.
    pub unit: Option<Unit>,
    /// Label keys attached at emission.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn of_kind(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Counter called `name`.
    pub const fn counter(name: &'static str) -> Self {
        Self::of_kind(name, MetricKind::Counter)
    }

    /// Gauge called `name`.
    pub const fn gauge(name: &'static str) -> Self {
        Self::of_kind(name, MetricKind::Gauge)
    }

    /// Histogram called `name`.
    pub const fn histogram(name: &'static str) -> Self {
        Self::of_kind(name, MetricKind::Histogram)
    }

    /// Attach a description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Attach a unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Attach the label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Hand the description and unit to the installed recorder.
    pub fn describe(&self) {
        let (name, text) = (self.name, self.description);
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(name, unit, text),
            (MetricKind::Counter, None) => describe_counter!(name, text),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(name, unit, text),
            (MetricKind::Gauge, None) => describe_gauge!(name, text),
            (MetricKind::Histogram, Some(unit)) => describe_histogram!(name, unit, text),
            (MetricKind::Histogram, None) => describe_histogram!(name, text),
        }
    }
}

/// All metric definitions for the pipeline.
pub mod metric_defs {
    use super::{Metric, Unit};

    // Export

    /// Points written to the class/probability files.
    pub const EXPORT_POINTS: Metric = Metric::counter("sdmaps.export.points")
        .with_description("Points written to the export files")
        .with_unit(Unit::Count);

    /// Export buffers flushed (including the final partial buffer).
    pub const EXPORT_FLUSHES: Metric = Metric::counter("sdmaps.export.flushes")
        .with_description("Export buffers flushed")
        .with_unit(Unit::Count);

    /// Wall time of one flush, from top-K selection to the end of the sink.
    pub const EXPORT_FLUSH_TIME: Metric = Metric::histogram("sdmaps.export.flush_time_s")
        .with_description("Duration of a buffer flush")
        .with_unit(Unit::Seconds);

    /// Cumulative exported count as a fraction of the reference grid.
    pub const EXPORT_PROGRESS: Metric = Metric::gauge("sdmaps.export.progress")
        .with_description("Exported points over reference grid size")
        .with_unit(Unit::Percent);

    // Maps

    /// Buffer tiles written to disk.
    pub const MAPS_TILES_WRITTEN: Metric = Metric::counter("sdmaps.maps.tiles_written")
        .with_description("Buffer GeoTIFF stacks written")
        .with_unit(Unit::Count)
        .with_labels(&["stack"]);

    /// Incremental merges performed.
    pub const MAPS_MERGES: Metric = Metric::counter("sdmaps.maps.merges")
        .with_description("Incremental mosaic merges performed")
        .with_unit(Unit::Count);

    // Fallbacks

    /// Best-effort fallbacks taken, broken down by kind.
    pub const FALLBACKS: Metric = Metric::counter("sdmaps.fallbacks")
        .with_description("Best-effort fallback paths taken")
        .with_unit(Unit::Count)
        .with_labels(&["kind"]);

    /// All metrics, for bulk description.
    pub const ALL: &[&Metric] = &[
        &EXPORT_POINTS,
        &EXPORT_FLUSHES,
        &EXPORT_FLUSH_TIME,
        &EXPORT_PROGRESS,
        &MAPS_TILES_WRITTEN,
        &MAPS_MERGES,
        &FALLBACKS,
    ];
}

/// Describes all metrics used in the pipeline.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::EXPORT_POINTS.name, "sdmaps.export.points");
        assert_eq!(metric_defs::EXPORT_POINTS.kind, MetricKind::Counter);
        assert_eq!(metric_defs::EXPORT_FLUSH_TIME.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::EXPORT_FLUSH_TIME.unit, Some(Unit::Seconds));
        assert_eq!(metric_defs::EXPORT_PROGRESS.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::FALLBACKS.labels, &["kind"]);
    }

    #[test]
    fn test_all_metrics_count() {
        assert_eq!(metric_defs::ALL.len(), 7);
    }

    #[test]
    fn test_bare_gauge_has_no_metadata() {
        const BARE: Metric = Metric::gauge("bare");
        assert_eq!(BARE.kind, MetricKind::Gauge);
        assert!(BARE.description.is_empty() && BARE.unit.is_none() && BARE.labels.is_empty());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
    }
}
