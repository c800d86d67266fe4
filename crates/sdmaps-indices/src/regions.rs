//! Region codes: polygon layer lookup or a grid column.

use crate::grid::Grid;
use crate::{IndicesError, Result};
use geo::{BoundingRect, Contains, Coord, EuclideanDistance, LineString, MultiPolygon, Point, Polygon, Rect};
use sdmaps_metrics::{Diagnostics, FallbackKind};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Code of a geographic region (botanical continent).
pub type RegionCode = u32;

/// One polygon of the region layer.
#[derive(Debug, Clone)]
pub struct Region {
    /// Region code.
    pub code: RegionCode,
    /// Outline.
    pub geometry: MultiPolygon<f64>,
    bbox: Option<Rect<f64>>,
}

impl Region {
    /// Region from its code and outline.
    pub fn new(code: RegionCode, geometry: MultiPolygon<f64>) -> Self {
        let bbox = geometry.bounding_rect();
        Self { code, geometry, bbox }
    }

    fn may_contain(&self, p: Point<f64>) -> bool {
        self.bbox.is_some_and(|b| {
            let (min, max) = (b.min(), b.max());
            p.x() >= min.x && p.x() <= max.x && p.y() >= min.y && p.y() <= max.y
        })
    }
}

/// Where a point landed in the region layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMatch {
    /// Inside a polygon; `extra` counts further polygons that also contain it.
    Inside {
        /// Code of the first containing polygon.
        code: RegionCode,
        /// Additional containing polygons.
        extra: usize,
    },
    /// Outside every polygon; code of the nearest one.
    Nearest(RegionCode),
    /// The layer is empty.
    Unmatched,
}

/// Region polygons in layer order.
#[derive(Debug, Clone, Default)]
pub struct RegionLayer {
    regions: Vec<Region>,
}

impl RegionLayer {
    /// Layer from regions.
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// Read a GeoJSON FeatureCollection of Polygon, MultiPolygon or
    /// GeometryCollection features, taking the region code from
    /// `code_property`.
    pub fn from_geojson<P: AsRef<Path>>(path: P, code_property: &str) -> Result<Self> {
        let path = path.as_ref();
        let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let layer = Self::from_geojson_value(&value, code_property)?;
        info!("Loaded {} regions from {}", layer.len(), path.display());
        Ok(layer)
    }

    /// Parse an already-decoded FeatureCollection.
    pub fn from_geojson_value(value: &Value, code_property: &str) -> Result<Self> {
        let features = value
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| IndicesError::InvalidRegions("no \"features\" array".to_string()))?;

        let mut regions = Vec::with_capacity(features.len());
        for (i, feature) in features.iter().enumerate() {
            let code = feature
                .get("properties")
                .and_then(|p| p.get(code_property))
                .and_then(parse_code_value)
                .ok_or_else(|| IndicesError::InvalidRegions(format!("feature {i} has no usable {code_property:?}")))?;
            let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) else {
                warn!("Region feature {} ({}) has no geometry, skipped", i, code);
                continue;
            };
            let outline = parse_geometry(geometry, i)?;
            if outline.0.is_empty() {
                warn!("Region feature {} ({}) has no polygon, skipped", i, code);
                continue;
            }
            regions.push(Region::new(code, outline));
        }
        Ok(Self::new(regions))
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True when there are no regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Locate `(lon, lat)`: containing polygons first, nearest polygon otherwise.
    pub fn locate(&self, lon: f64, lat: f64) -> RegionMatch {
        let p = Point::new(lon, lat);
        let mut inside = self
            .regions
            .iter()
            .filter(|r| r.may_contain(p) && r.geometry.contains(&p));
        if let Some(first) = inside.next() {
            return RegionMatch::Inside {
                code: first.code,
                extra: inside.count(),
            };
        }

        self.regions
            .iter()
            .map(|r| (r.code, p.euclidean_distance(&r.geometry)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(RegionMatch::Unmatched, |(code, _)| RegionMatch::Nearest(code))
    }
}

fn parse_code_value(v: &Value) -> Option<RegionCode> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|c| RegionCode::try_from(c).ok()),
        Value::String(s) => parse_region_code(s),
        _ => None,
    }
}

fn parse_ring(v: &Value, feature: usize) -> Result<LineString<f64>> {
    let bad = || IndicesError::InvalidRegions(format!("feature {feature}: malformed ring"));
    let coords = v
        .as_array()
        .ok_or_else(bad)?
        .iter()
        .map(|c| {
            let xy = c.as_array().filter(|a| a.len() >= 2).ok_or_else(bad)?;
            match (xy[0].as_f64(), xy[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(bad()),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(LineString::new(coords))
}

fn parse_polygon(v: &Value, feature: usize) -> Result<Polygon<f64>> {
    let rings = v
        .as_array()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| IndicesError::InvalidRegions(format!("feature {feature}: polygon without rings")))?;
    let exterior = parse_ring(&rings[0], feature)?;
    let interiors = rings[1..]
        .iter()
        .map(|r| parse_ring(r, feature))
        .collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_geometry(v: &Value, feature: usize) -> Result<MultiPolygon<f64>> {
    let mut polygons = Vec::new();
    collect_polygons(v, feature, &mut polygons)?;
    Ok(MultiPolygon::new(polygons))
}

/// Polygons of `v`. Collections are flattened; their point and line members
/// carry no area and are skipped.
fn collect_polygons(v: &Value, feature: usize, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    let coordinates = || {
        v.get("coordinates")
            .ok_or_else(|| IndicesError::InvalidRegions(format!("feature {feature}: no coordinates")))
    };
    match v.get("type").and_then(Value::as_str) {
        Some("Polygon") => out.push(parse_polygon(coordinates()?, feature)?),
        Some("MultiPolygon") => {
            let polygons = coordinates()?
                .as_array()
                .ok_or_else(|| IndicesError::InvalidRegions(format!("feature {feature}: malformed MultiPolygon")))?;
            for p in polygons {
                out.push(parse_polygon(p, feature)?);
            }
        }
        Some("GeometryCollection") => {
            let members = v
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or_else(|| IndicesError::InvalidRegions(format!("feature {feature}: collection without geometries")))?;
            for member in members {
                collect_polygons(member, feature, out)?;
            }
        }
        Some(kind @ ("Point" | "MultiPoint" | "LineString" | "MultiLineString")) => {
            debug!("Region feature {}: {} member skipped", feature, kind);
        }
        other => {
            return Err(IndicesError::InvalidRegions(format!(
                "feature {feature}: unsupported geometry type {other:?}"
            )))
        }
    }
    Ok(())
}

/// Parse a region code as stored in a grid column: `3`, `3.0` or a list
/// literal such as `[3, 5]` (first element).
pub fn parse_region_code(s: &str) -> Option<RegionCode> {
    let s = s.trim();
    let s = match s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        Some(inner) => inner.split(',').next()?.trim(),
        None => s,
    };
    let s = s.trim_matches(|c| c == '\'' || c == '"');
    s.parse::<RegionCode>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= RegionCode::MAX as f64)
            .map(|f| f as RegionCode)
    })
}

/// How region codes are attached to grid rows.
#[derive(Debug, Clone)]
pub enum RegionSource {
    /// Point-in-polygon against a layer, nearest polygon as fallback.
    Polygons(RegionLayer),
    /// Code read from the reference grid's region column.
    GridColumn,
}

/// Attach a region code to every row of `grid`.
pub fn attach_regions(grid: &mut Grid, source: &RegionSource, diagnostics: &Diagnostics) {
    let mut nearest = 0u64;
    let mut duplicates = 0u64;
    for row in grid.rows_mut() {
        row.region = match source {
            RegionSource::GridColumn => row.region_raw.as_deref().and_then(parse_region_code),
            RegionSource::Polygons(layer) => match layer.locate(row.lon, row.lat) {
                RegionMatch::Inside { code, extra } => {
                    duplicates += extra as u64;
                    Some(code)
                }
                RegionMatch::Nearest(code) => {
                    nearest += 1;
                    Some(code)
                }
                RegionMatch::Unmatched => None,
            },
        };
    }
    if nearest > 0 {
        diagnostics.record_n(FallbackKind::NearestRegionFallback, nearest);
    }
    if duplicates > 0 {
        diagnostics.record_n(FallbackKind::DuplicateRegionJoin, duplicates);
    }
    debug!(
        "Regions attached ({} by nearest polygon, {} duplicate matches)",
        nearest, duplicates
    );
}
