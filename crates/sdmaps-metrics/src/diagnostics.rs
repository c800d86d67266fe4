//! Countable diagnostics for best-effort fallback paths.

use crate::metric_defs;
use std::sync::atomic::{AtomicU64, Ordering};

/// A fallback path that keeps the pipeline running instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackKind {
    /// A raster file could not be opened and was left out of the feature set.
    RasterSkipped,
    /// A size-1 patch fell outside the raster grid.
    PatchOutOfBounds,
    /// A patch window could not be resampled; a sentinel patch was used.
    PatchResizeFailed,
    /// A class index had no entry in the label index.
    UnmappedClass,
    /// An exported point id was not found in the reference grid.
    UnplacedPoint,
    /// A point outside every region polygon took the nearest polygon's code.
    NearestRegionFallback,
    /// A point fell inside more than one region polygon; the first was kept.
    DuplicateRegionJoin,
    /// A predicted species had no known range and was dropped by the range filter.
    MissingRange,
    /// A predicted species had no row in the status table.
    MissingStatus,
}

impl FallbackKind {
    /// Every kind, in declaration order.
    pub const ALL: [FallbackKind; 9] = [
        FallbackKind::RasterSkipped,
        FallbackKind::PatchOutOfBounds,
        FallbackKind::PatchResizeFailed,
        FallbackKind::UnmappedClass,
        FallbackKind::UnplacedPoint,
        FallbackKind::NearestRegionFallback,
        FallbackKind::DuplicateRegionJoin,
        FallbackKind::MissingRange,
        FallbackKind::MissingStatus,
    ];

    /// Label value used on the `sdmaps.fallbacks` counter.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::RasterSkipped => "raster_skipped",
            FallbackKind::PatchOutOfBounds => "patch_out_of_bounds",
            FallbackKind::PatchResizeFailed => "patch_resize_failed",
            FallbackKind::UnmappedClass => "unmapped_class",
            FallbackKind::UnplacedPoint => "unplaced_point",
            FallbackKind::NearestRegionFallback => "nearest_region_fallback",
            FallbackKind::DuplicateRegionJoin => "duplicate_region_join",
            FallbackKind::MissingRange => "missing_range",
            FallbackKind::MissingStatus => "missing_status",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind fallback counters.
///
/// Cheap to share behind an `Arc`; all updates are relaxed atomic increments.
#[derive(Debug, Default)]
pub struct Diagnostics {
    counts: [AtomicU64; 9],
}

impl Diagnostics {
    /// Create a set of zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `kind`.
    pub fn record(&self, kind: FallbackKind) {
        self.record_n(kind, 1);
    }

    /// Record `n` occurrences of `kind`.
    pub fn record_n(&self, kind: FallbackKind, n: u64) {
        if n == 0 {
            return;
        }
        self.counts[kind.slot()].fetch_add(n, Ordering::Relaxed);
        metrics::counter!(metric_defs::FALLBACKS.name, "kind" => kind.as_str()).increment(n);
    }

    /// Current count for `kind`.
    pub fn count(&self, kind: FallbackKind) -> u64 {
        self.counts[kind.slot()].load(Ordering::Relaxed)
    }

    /// Sum over all kinds.
    pub fn total(&self) -> u64 {
        FallbackKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    /// Non-zero counters, in declaration order.
    pub fn snapshot(&self) -> Vec<(FallbackKind, u64)> {
        FallbackKind::ALL
            .iter()
            .map(|k| (*k, self.count(*k)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        for c in &self.counts {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_distinct() {
        let mut slots: Vec<usize> = FallbackKind::ALL.iter().map(|k| k.slot()).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), FallbackKind::ALL.len());
        assert!(slots.iter().all(|s| *s < FallbackKind::ALL.len()));
    }

    #[test]
    fn test_record_and_snapshot() {
        let d = Diagnostics::new();
        d.record(FallbackKind::NearestRegionFallback);
        d.record_n(FallbackKind::NearestRegionFallback, 2);
        d.record_n(FallbackKind::MissingRange, 0);
        d.record(FallbackKind::UnmappedClass);

        assert_eq!(d.count(FallbackKind::NearestRegionFallback), 3);
        assert_eq!(d.count(FallbackKind::MissingRange), 0);
        assert_eq!(d.total(), 4);
        assert_eq!(
            d.snapshot(),
            vec![
                (FallbackKind::UnmappedClass, 1),
                (FallbackKind::NearestRegionFallback, 3)
            ]
        );

        d.reset();
        assert_eq!(d.total(), 0);
    }
}
