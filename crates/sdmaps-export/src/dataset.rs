//! Occurrence points and batched input assembly.

use crate::{ExportError, Result};
use ndarray::{stack, Array3, Array4, ArrayView3, Axis};
use rayon::prelude::*;
use sdmaps_common::PointId;
use sdmaps_raster::PatchAssembler;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Label attached to inference samples.
pub const NO_LABEL: i64 = -1;

/// A point to predict on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occurrence {
    /// Record id, used to join predictions back onto the grid.
    pub id: PointId,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
}

/// Names of the id and coordinate columns in an occurrence CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceColumns {
    /// Id column.
    pub id: String,
    /// Latitude column.
    pub lat: String,
    /// Longitude column.
    pub lon: String,
}

impl Default for OccurrenceColumns {
    fn default() -> Self {
        Self {
            id: "gbifid".to_string(),
            lat: "decimallatitude".to_string(),
            lon: "decimallongitude".to_string(),
        }
    }
}

/// Read occurrences from a delimited file, dropping duplicate rows.
pub fn load_occurrences<P: AsRef<Path>>(
    path: P,
    sep: u8,
    columns: &OccurrenceColumns,
) -> Result<Vec<Occurrence>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sep)
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| ExportError::MissingColumn {
                column: name.to_string(),
                path: path.display().to_string(),
            })
    };
    let (id_col, lat_col, lon_col) = (position(&columns.id)?, position(&columns.lat)?, position(&columns.lon)?);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut duplicates = 0usize;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");
        let bad = |what: &str| ExportError::Format(format!("{}: bad {} on data row {}", path.display(), what, line + 1));

        let id = parse_id(field(id_col)).ok_or_else(|| bad("id"))?;
        let lat: f64 = field(lat_col).parse().map_err(|_| bad("latitude"))?;
        let lon: f64 = field(lon_col).parse().map_err(|_| bad("longitude"))?;

        if seen.insert((id, lat.to_bits(), lon.to_bits())) {
            out.push(Occurrence { id, lat, lon });
        } else {
            duplicates += 1;
        }
    }

    info!(
        "Loaded {} occurrences from {} ({} duplicates dropped)",
        out.len(),
        path.display(),
        duplicates
    );
    Ok(out)
}

/// Ids are integers but may have been written as floats (`123.0`).
fn parse_id(s: &str) -> Option<PointId> {
    s.parse::<PointId>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as PointId)
    })
}

/// Occurrences paired with the assembler that turns them into tensors.
#[derive(Debug)]
pub struct OccurrenceDataset {
    occurrences: Vec<Occurrence>,
    assembler: PatchAssembler,
}

impl OccurrenceDataset {
    /// Dataset over `occurrences`, in the given order.
    pub fn new(occurrences: Vec<Occurrence>, assembler: PatchAssembler) -> Self {
        Self {
            occurrences,
            assembler,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    /// True when there is nothing to predict.
    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Sample ids in dataset order.
    pub fn ids(&self) -> impl Iterator<Item = PointId> + '_ {
        self.occurrences.iter().map(|o| o.id)
    }

    /// Occurrences in dataset order.
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    /// Input tensor and label of sample `idx`.
    pub fn get(&self, idx: usize) -> Result<(Array3<f32>, i64)> {
        let o = self.occurrences.get(idx).ok_or_else(|| {
            ExportError::Format(format!("sample {} out of range ({} samples)", idx, self.len()))
        })?;
        Ok((self.assembler.get(o.id, o.lat, o.lon)?, NO_LABEL))
    }
}

/// One batch of inputs, in dataset order.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Ids of the samples.
    pub ids: Vec<PointId>,
    /// `(batch, channels, size, size)` inputs.
    pub inputs: Array4<f32>,
}

/// Iterator over fixed-size batches.
///
/// Samples within a batch are assembled on a dedicated thread pool; batches
/// themselves come out strictly in dataset order.
pub struct BatchLoader<'a> {
    dataset: &'a OccurrenceDataset,
    batch_size: usize,
    pool: rayon::ThreadPool,
    next: usize,
}

impl<'a> BatchLoader<'a> {
    /// Loader with `num_workers` assembly threads (at least one).
    pub fn new(dataset: &'a OccurrenceDataset, batch_size: usize, num_workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("sdmaps-loader-{i}"))
            .build()?;
        Ok(Self {
            dataset,
            batch_size: batch_size.max(1),
            pool,
            next: 0,
        })
    }

    /// Number of batches in total.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn assemble(&self, start: usize, end: usize) -> Result<Batch> {
        let dataset = self.dataset;
        let samples: Vec<Array3<f32>> = self.pool.install(|| {
            (start..end)
                .into_par_iter()
                .map(|i| dataset.get(i).map(|(tensor, _)| tensor))
                .collect::<Result<Vec<_>>>()
        })?;

        let views: Vec<ArrayView3<f32>> = samples.iter().map(|s| s.view()).collect();
        let inputs = stack(Axis(0), &views)
            .map_err(|e| ExportError::Format(format!("cannot stack batch {start}..{end}: {e}")))?;
        let ids = dataset.occurrences[start..end].iter().map(|o| o.id).collect();
        debug!("Assembled batch {}..{}", start, end);
        Ok(Batch { ids, inputs })
    }
}

impl Iterator for BatchLoader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.dataset.len() {
            return None;
        }
        let start = self.next;
        let end = (start + self.batch_size).min(self.dataset.len());
        self.next = end;
        Some(self.assemble(start, end))
    }
}
