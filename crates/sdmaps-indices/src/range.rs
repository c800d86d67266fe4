//! Known species ranges and the out-of-range filter.

use crate::grid::Grid;
use crate::regions::RegionCode;
use crate::{IndicesError, Result};
use sdmaps_common::ClassId;
use sdmaps_metrics::{Diagnostics, FallbackKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Regions each species is known from, per region level.
///
/// Stored on disk as `{"1": {"<speciesKey>": [codes, ...]}, "2": {...}}`.
#[derive(Debug, Clone, Default)]
pub struct RangeMap {
    levels: BTreeMap<u8, HashMap<ClassId, HashSet<RegionCode>>>,
}

impl RangeMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a range map JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let map = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!(
            "Loaded range map {} (levels {:?})",
            path.display(),
            map.levels.keys().collect::<Vec<_>>()
        );
        Ok(map)
    }

    /// Parse a range map from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, HashMap<String, Vec<RegionCode>>> = serde_json::from_str(text)?;
        let mut levels = BTreeMap::new();
        for (level, species) in raw {
            let level: u8 = level
                .trim()
                .parse()
                .map_err(|_| IndicesError::Format(format!("range level {level:?} is not an integer")))?;
            let mut table = HashMap::with_capacity(species.len());
            for (key, codes) in species {
                let key: ClassId = key
                    .trim()
                    .parse()
                    .map_err(|_| IndicesError::Format(format!("species key {key:?} is not an integer")))?;
                table.insert(key, codes.into_iter().collect());
            }
            levels.insert(level, table);
        }
        Ok(Self { levels })
    }

    /// Record that `species` occurs in `region` at `level`.
    pub fn insert(&mut self, level: u8, species: ClassId, region: RegionCode) {
        self.levels
            .entry(level)
            .or_default()
            .entry(species)
            .or_default()
            .insert(region);
    }

    /// Whether `species` is known from `region` at `level`; `None` when the
    /// species has no entry at that level.
    pub fn contains(&self, level: u8, species: ClassId, region: RegionCode) -> Option<bool> {
        self.levels
            .get(&level)
            .and_then(|t| t.get(&species))
            .map(|codes| codes.contains(&region))
    }
}

/// Drop every class whose known range at `level` does not include the row's
/// region. Species with no range entry and unmapped classes are dropped and
/// counted as `MissingRange`; rows without a region lose all classes.
pub fn filter_out_of_range(grid: &mut Grid, ranges: &RangeMap, level: u8, diagnostics: &Diagnostics) {
    let mut missing = 0u64;
    let mut removed = 0usize;
    for row in grid.rows_mut() {
        let before = row.classes.len();
        let region = row.region;
        row.retain_pairs(|class, _| {
            let (Some(class), Some(region)) = (class, region) else {
                if class.is_none() {
                    missing += 1;
                }
                return false;
            };
            match ranges.contains(level, class, region) {
                Some(inside) => inside,
                None => {
                    missing += 1;
                    false
                }
            }
        });
        removed += before - row.classes.len();
    }
    if missing > 0 {
        diagnostics.record_n(FallbackKind::MissingRange, missing);
    }
    debug!("Out-of-range filter removed {} classes", removed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridRow;

    fn row(region: Option<RegionCode>, classes: Vec<Option<ClassId>>) -> GridRow {
        let n = classes.len();
        GridRow {
            id: 1,
            lon: 0.0,
            lat: 0.0,
            region_raw: None,
            region,
            classes,
            probas: (0..n).map(|i| 0.5 / (i + 1) as f32).collect(),
            empty: false,
        }
    }

    #[test]
    fn test_parse() {
        let map = RangeMap::from_json_str(r#"{"1": {"10": [1, 2], "11": [3]}, "2": {"10": [14]}}"#).unwrap();
        assert_eq!(map.contains(1, 10, 2), Some(true));
        assert_eq!(map.contains(1, 11, 2), Some(false));
        assert_eq!(map.contains(1, 12, 2), None);
        assert_eq!(map.contains(2, 10, 14), Some(true));
        assert!(RangeMap::from_json_str(r#"{"x": {}}"#).is_err());
    }

    #[test]
    fn test_filter_keeps_alignment() {
        let mut map = RangeMap::new();
        map.insert(1, 10, 2);
        map.insert(1, 11, 3);

        let mut grid = Grid::new(vec![
            row(Some(2), vec![Some(11), Some(10), None, Some(99)]),
            row(None, vec![Some(10)]),
        ]);
        let diagnostics = Diagnostics::new();
        filter_out_of_range(&mut grid, &map, 1, &diagnostics);

        assert_eq!(grid.rows()[0].classes, vec![Some(10)]);
        assert_eq!(grid.rows()[0].probas, vec![0.25]);
        assert!(grid.rows()[1].classes.is_empty());
        assert_eq!(diagnostics.count(FallbackKind::MissingRange), 2);
    }
}
