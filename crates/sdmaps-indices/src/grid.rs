//! Reference occurrence grid and the per-buffer aggregation frame.

use crate::{IndicesError, Result};
use sdmaps_common::{ClassId, ExportedPrediction, PointId};
use sdmaps_metrics::{Diagnostics, FallbackKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Column names of the reference grid CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridColumns {
    /// Record id.
    pub id: String,
    /// Latitude.
    pub lat: String,
    /// Longitude.
    pub lon: String,
    /// Region code column, read when present.
    pub region: Option<String>,
}

impl Default for GridColumns {
    fn default() -> Self {
        Self {
            id: "gbifid".to_string(),
            lat: "decimallatitude".to_string(),
            lon: "decimallongitude".to_string(),
            region: Some("LEVEL1_COD".to_string()),
        }
    }
}

/// One point of the reference grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    /// Record id.
    pub id: PointId,
    /// Longitude.
    pub lon: f64,
    /// Latitude.
    pub lat: f64,
    /// Raw region column value, if the grid carries one.
    pub region: Option<String>,
}

/// The static grid that exported predictions are joined onto.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGrid {
    points: Vec<GridPoint>,
    by_id: HashMap<PointId, usize>,
}

impl ReferenceGrid {
    /// Grid from points; the first point of a repeated id wins.
    pub fn new(points: Vec<GridPoint>) -> Self {
        let mut by_id = HashMap::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            by_id.entry(p.id).or_insert(i);
        }
        Self { points, by_id }
    }

    /// Load a delimited grid file. Duplicate rows are dropped.
    pub fn load<P: AsRef<Path>>(path: P, sep: u8, columns: &GridColumns) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(sep)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| IndicesError::MissingColumn {
                column: name.to_string(),
                path: path.display().to_string(),
            })
        };
        let id_col = require(&columns.id)?;
        let lat_col = require(&columns.lat)?;
        let lon_col = require(&columns.lon)?;
        let region_col = columns.region.as_deref().and_then(find);

        let mut seen = HashSet::new();
        let mut points = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");
            let bad = |what: &str| IndicesError::Format(format!("{}: bad {} on data row {}", path.display(), what, line + 1));

            let id = parse_id(field(id_col)).ok_or_else(|| bad("id"))?;
            let lat: f64 = field(lat_col).parse().map_err(|_| bad("latitude"))?;
            let lon: f64 = field(lon_col).parse().map_err(|_| bad("longitude"))?;
            let region = region_col.map(field).filter(|s| !s.is_empty()).map(str::to_string);

            if seen.insert((id, lat.to_bits(), lon.to_bits(), region.clone())) {
                points.push(GridPoint { id, lon, lat, region });
            }
        }

        info!("Grid reference {}: {} points", path.display(), points.len());
        Ok(Self::new(points))
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the grid has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point with id `id`.
    pub fn get(&self, id: PointId) -> Option<&GridPoint> {
        self.by_id.get(&id).map(|i| &self.points[*i])
    }

    /// Points in file order.
    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }
}

fn parse_id(s: &str) -> Option<PointId> {
    s.parse::<PointId>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as PointId)
    })
}

/// Per-point state carried through the aggregation stages.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// Record id.
    pub id: PointId,
    /// Longitude.
    pub lon: f64,
    /// Latitude.
    pub lat: f64,
    /// Raw region column from the reference grid.
    pub region_raw: Option<String>,
    /// Region code attached by the region stage.
    pub region: Option<crate::RegionCode>,
    /// Retained classes, index-aligned with `probas`.
    pub classes: Vec<Option<ClassId>>,
    /// Retained probabilities.
    pub probas: Vec<f32>,
    /// No class retained.
    pub empty: bool,
}

impl GridRow {
    /// `(class, proba)` pairs in rank order.
    pub fn pairs(&self) -> impl Iterator<Item = (Option<ClassId>, f32)> + '_ {
        self.classes.iter().copied().zip(self.probas.iter().copied())
    }

    /// Keep only the pairs for which `keep(class, proba)` holds.
    pub fn retain_pairs<F>(&mut self, mut keep: F)
    where
        F: FnMut(Option<ClassId>, f32) -> bool,
    {
        let (classes, probas) = self
            .classes
            .iter()
            .zip(&self.probas)
            .filter(|(c, p)| keep(**c, **p))
            .map(|(c, p)| (*c, *p))
            .unzip();
        self.classes = classes;
        self.probas = probas;
    }
}

/// The rows of one flushed buffer plus named derived columns.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    rows: Vec<GridRow>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl Grid {
    /// Frame over `rows` with no derived columns.
    pub fn new(rows: Vec<GridRow>) -> Self {
        Self {
            rows,
            columns: BTreeMap::new(),
        }
    }

    /// Join an exported buffer onto `reference`.
    ///
    /// Rows sharing an id are grouped in first-seen order. Ids missing from the
    /// reference grid are dropped and counted as `UnplacedPoint`.
    pub fn join(reference: &ReferenceGrid, batch: &[ExportedPrediction], diagnostics: &Diagnostics) -> Self {
        let mut rows: Vec<GridRow> = Vec::with_capacity(batch.len());
        let mut position: HashMap<PointId, usize> = HashMap::with_capacity(batch.len());
        let mut unplaced = 0u64;

        for pred in batch {
            if let Some(i) = position.get(&pred.point_id) {
                let row = &mut rows[*i];
                row.classes.extend_from_slice(&pred.classes);
                row.probas.extend_from_slice(&pred.probas);
                continue;
            }
            let Some(point) = reference.get(pred.point_id) else {
                unplaced += 1;
                continue;
            };
            position.insert(pred.point_id, rows.len());
            rows.push(GridRow {
                id: point.id,
                lon: point.lon,
                lat: point.lat,
                region_raw: point.region.clone(),
                region: None,
                classes: pred.classes.clone(),
                probas: pred.probas.clone(),
                empty: pred.is_empty(),
            });
        }

        if unplaced > 0 {
            diagnostics.record_n(FallbackKind::UnplacedPoint, unplaced);
        }
        debug!("Joined {} rows onto the grid ({} unplaced)", rows.len(), unplaced);
        Self::new(rows)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows.
    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    /// Mutable rows.
    pub fn rows_mut(&mut self) -> &mut [GridRow] {
        &mut self.rows
    }

    /// Derived column `name`.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| IndicesError::UnknownColumn(name.to_string()))
    }

    /// True when `name` has been computed.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Store a derived column, replacing any previous one of the same name.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.rows.len() {
            return Err(IndicesError::ColumnLength {
                name,
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Names of the derived columns, sorted.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceGrid {
        ReferenceGrid::new(vec![
            GridPoint {
                id: 1,
                lon: 3.9,
                lat: 43.6,
                region: Some("1".to_string()),
            },
            GridPoint {
                id: 2,
                lon: -60.0,
                lat: -3.0,
                region: None,
            },
        ])
    }

    #[test]
    fn test_join_groups_and_drops_unplaced() {
        let batch = vec![
            ExportedPrediction::new(2, vec![Some(5)], vec![0.7]),
            ExportedPrediction::new(99, vec![Some(5)], vec![0.7]),
            ExportedPrediction::new(2, vec![Some(6)], vec![0.2]),
            ExportedPrediction::new(1, vec![], vec![]),
        ];
        let diagnostics = Diagnostics::new();
        let grid = Grid::join(&reference(), &batch, &diagnostics);

        assert_eq!(grid.len(), 2);
        assert_eq!(grid.rows()[0].id, 2);
        assert_eq!(grid.rows()[0].classes, vec![Some(5), Some(6)]);
        assert_eq!(grid.rows()[0].lon, -60.0);
        assert!(grid.rows()[1].empty);
        assert_eq!(grid.rows()[1].region_raw.as_deref(), Some("1"));
        assert_eq!(diagnostics.count(FallbackKind::UnplacedPoint), 1);
    }

    #[test]
    fn test_load_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        std::fs::write(
            &path,
            "gbifid;decimallatitude;decimallongitude;LEVEL1_COD\n\
             1;43.6;3.9;[1, 2]\n\
             1;43.6;3.9;[1, 2]\n\
             2.0;-3;-60;\n",
        )
        .unwrap();
        let grid = ReferenceGrid::load(&path, b';', &GridColumns::default()).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.get(1).unwrap().region.as_deref(), Some("[1, 2]"));
        assert_eq!(grid.get(2).unwrap().region, None);
    }

    #[test]
    fn test_column_length_checked() {
        let mut grid = Grid::join(&reference(), &[ExportedPrediction::new(1, vec![], vec![])], &Diagnostics::new());
        assert!(grid.set_column("shannon", vec![0.0]).is_ok());
        assert!(matches!(
            grid.set_column("x", vec![0.0, 1.0]),
            Err(IndicesError::ColumnLength { .. })
        ));
        assert!(matches!(grid.column("missing"), Err(IndicesError::UnknownColumn(_))));
    }
}
