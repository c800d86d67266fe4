//! Buffered top-K export of model scores.

use crate::codec::{export_stem, ExportFormat, ExportPaths, ExportWriter};
use crate::dataset::Batch;
use crate::index::LabelIndex;
use crate::model::Model;
use crate::{ExportError, Result};
use ndarray::{concatenate, Array2, ArrayView1, ArrayView2, Axis};
use sdmaps_common::{ClassId, ExportedPrediction, PointId};
use sdmaps_metrics::{metric_defs, Diagnostics, FallbackKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Error type returned by flush sinks.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every flushed buffer after it has been written to disk.
pub trait FlushSink {
    /// `batch` holds the rows just written; `exported_count` is the running
    /// total including them. Called once more at end of stream, possibly with
    /// an empty batch.
    fn on_flush(&mut self, batch: &[ExportedPrediction], exported_count: usize) -> std::result::Result<(), SinkError>;
}

impl<F> FlushSink for F
where
    F: FnMut(&[ExportedPrediction], usize) -> std::result::Result<(), SinkError>,
{
    fn on_flush(&mut self, batch: &[ExportedPrediction], exported_count: usize) -> std::result::Result<(), SinkError> {
        self(batch, exported_count)
    }
}

/// Sink that ignores flushes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl FlushSink for NoopSink {
    fn on_flush(&mut self, _batch: &[ExportedPrediction], _exported_count: usize) -> std::result::Result<(), SinkError> {
        Ok(())
    }
}

/// Export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Samples per model call.
    pub batch_size: usize,
    /// Rows buffered before a flush.
    pub buffer_size: usize,
    /// Classes kept per point.
    pub size: usize,
    /// Suffix of the export file stem.
    pub name: Option<String>,
    /// Output format.
    pub format: ExportFormat,
    /// Directory receiving the export files.
    pub output_dir: PathBuf,
    /// Sample-assembly threads.
    pub num_workers: usize,
    /// Label index JSON; absent means class id = output index.
    pub index_path: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            buffer_size: 100,
            size: 550,
            name: None,
            format: ExportFormat::Binary,
            output_dir: PathBuf::from("out/bin"),
            num_workers: 4,
            index_path: None,
        }
    }
}

impl ExportConfig {
    /// Export file stem for this configuration.
    pub fn stem(&self) -> String {
        export_stem(self.size, self.buffer_size, self.name.as_deref())
    }
}

/// Indices of the `k` largest scores of `row`, best first.
///
/// Ties keep the lower index first and NaN scores rank last, so the order is
/// the same as a stable sort by descending score.
pub fn top_k(row: ArrayView1<f32>, k: usize) -> Vec<usize> {
    let cmp = |a: &usize, b: &usize| descending(row[*a], row[*b]).then(a.cmp(b));
    let mut idx: Vec<usize> = (0..row.len()).collect();
    let k = k.min(idx.len());
    if k == 0 {
        return Vec::new();
    }
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, cmp);
        idx.truncate(k);
    }
    idx.sort_by(cmp);
    idx
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Streams model scores to disk in buffers of ranked predictions.
///
/// Scores are buffered until at least `buffer_size` rows are pending, then
/// ranked, mapped to class ids, appended to the export files and handed to a
/// [`FlushSink`]. [`StreamingPredictionExporter::finish`] performs the final
/// flush and closes the files.
#[derive(Debug)]
pub struct StreamingPredictionExporter {
    config: ExportConfig,
    writer: ExportWriter,
    index: Option<Arc<LabelIndex>>,
    diagnostics: Arc<Diagnostics>,
    pending_scores: Vec<Array2<f32>>,
    pending_ids: Vec<PointId>,
    exported: usize,
    total: Option<usize>,
    flushes: usize,
}

impl StreamingPredictionExporter {
    /// Open the export files described by `config`.
    pub fn new(config: ExportConfig, index: Option<Arc<LabelIndex>>, diagnostics: Arc<Diagnostics>) -> Result<Self> {
        let writer = ExportWriter::create(&config.output_dir, &config.stem(), config.format)?;
        info!("Exporting predictions to {:?}", writer.paths());
        Ok(Self {
            config,
            writer,
            index,
            diagnostics,
            pending_scores: Vec::new(),
            pending_ids: Vec::new(),
            exported: 0,
            total: None,
            flushes: 0,
        })
    }

    /// Number of points expected overall, for progress reporting.
    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    /// Points exported so far.
    pub fn exported_count(&self) -> usize {
        self.exported
    }

    /// Rows waiting for the next flush.
    pub fn pending_rows(&self) -> usize {
        self.pending_ids.len()
    }

    /// Export files.
    pub fn paths(&self) -> &ExportPaths {
        self.writer.paths()
    }

    /// Buffer the scores of one batch; flush when the buffer is full.
    ///
    /// Returns the exported count after this call.
    pub fn push<S: FlushSink + ?Sized>(&mut self, ids: &[PointId], scores: Array2<f32>, sink: &mut S) -> Result<usize> {
        if scores.nrows() != ids.len() {
            return Err(ExportError::BatchShape {
                expected: ids.len(),
                actual: scores.nrows(),
            });
        }
        self.pending_ids.extend_from_slice(ids);
        self.pending_scores.push(scores);

        if self.pending_ids.len() >= self.config.buffer_size {
            self.flush(sink)?;
        }
        Ok(self.exported)
    }

    /// Final flush (always performed, even with nothing pending), then close.
    pub fn finish<S: FlushSink + ?Sized>(mut self, sink: &mut S) -> Result<usize> {
        debug!("Final export flush");
        self.flush(sink)?;
        let paths = self.writer.finish()?;
        info!(
            "Export finished: {} points in {} flushes ({:?})",
            self.exported, self.flushes, paths
        );
        Ok(self.exported)
    }

    fn flush<S: FlushSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let start = Instant::now();
        let views: Vec<ArrayView2<f32>> = self.pending_scores.iter().map(|s| s.view()).collect();
        let rows = if views.is_empty() {
            Vec::new()
        } else {
            let scores = concatenate(Axis(0), &views)
                .map_err(|e| ExportError::Format(format!("score buffers disagree on class count: {e}")))?;
            self.rank(&scores)
        };
        self.pending_scores.clear();
        self.pending_ids.clear();

        self.writer.write(&rows)?;
        self.writer.flush()?;

        self.exported += rows.len();
        self.flushes += 1;
        metrics::counter!(metric_defs::EXPORT_POINTS.name).increment(rows.len() as u64);
        metrics::counter!(metric_defs::EXPORT_FLUSHES.name).increment(1);
        metrics::histogram!(metric_defs::EXPORT_FLUSH_TIME.name).record(start.elapsed().as_secs_f64());
        match self.total.filter(|t| *t > 0) {
            Some(total) => {
                let pct = 100.0 * self.exported as f64 / total as f64;
                metrics::gauge!(metric_defs::EXPORT_PROGRESS.name).set(pct);
                info!("Predictions saved, total exported: {} ({:.2} %)", self.exported, pct);
            }
            None => info!("Predictions saved, total exported: {}", self.exported),
        }

        sink.on_flush(&rows, self.exported)
            .map_err(|e| ExportError::Sink(e.to_string()))
    }

    fn rank(&self, scores: &Array2<f32>) -> Vec<ExportedPrediction> {
        scores
            .outer_iter()
            .zip(&self.pending_ids)
            .map(|(row, id)| {
                let order = top_k(row, self.config.size);
                let classes = order.iter().map(|j| self.class_of(*j)).collect();
                let probas = order.iter().map(|j| row[*j]).collect();
                ExportedPrediction::new(*id, classes, probas)
            })
            .collect()
    }

    fn class_of(&self, j: usize) -> Option<ClassId> {
        match &self.index {
            None => Some(j as ClassId),
            Some(index) => {
                let class = index.get(&j).copied();
                if class.is_none() {
                    warn!("Output index {} is not in the label index", j);
                    self.diagnostics.record(FallbackKind::UnmappedClass);
                }
                class
            }
        }
    }
}

/// Run `model` over every batch and export the results.
///
/// Returns the number of exported points.
pub fn export_all<M, I, S>(
    model: &mut M,
    batches: I,
    mut exporter: StreamingPredictionExporter,
    sink: &mut S,
) -> Result<usize>
where
    M: Model + ?Sized,
    I: IntoIterator<Item = Result<Batch>>,
    S: FlushSink + ?Sized,
{
    for (idx, batch) in batches.into_iter().enumerate() {
        let batch = batch?;
        let scores = model
            .forward(&batch.inputs)
            .map_err(|e| ExportError::Model(e.to_string()))?;
        debug!("Batch {} scored: {:?}", idx, scores.dim());
        exporter.push(&batch.ids, scores, sink)?;
    }
    exporter.finish(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_top_k_order() {
        let row = array![0.1f32, 0.5, f32::NAN, 0.5, 0.9];
        assert_eq!(top_k(row.view(), 3), vec![4, 1, 3]);
        assert_eq!(top_k(row.view(), 10), vec![4, 1, 3, 0, 2]);
        assert!(top_k(row.view(), 0).is_empty());
    }

    #[test]
    fn test_class_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            size: 2,
            buffer_size: 10,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let index: LabelIndex = [(0, 500), (1, 501)].into_iter().collect();
        let diagnostics = Arc::new(Diagnostics::new());
        let mut exporter =
            StreamingPredictionExporter::new(config, Some(Arc::new(index)), diagnostics.clone()).unwrap();

        let mut seen = Vec::new();
        let mut sink = |batch: &[ExportedPrediction], _n: usize| -> std::result::Result<(), SinkError> {
            seen.extend_from_slice(batch);
            Ok(())
        };
        exporter.push(&[9], array![[0.2f32, 0.3, 0.5]], &mut sink).unwrap();
        exporter.finish(&mut sink).unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].classes, vec![None, Some(501)]);
        assert_eq!(seen[0].probas, vec![0.5, 0.3]);
        assert_eq!(diagnostics.count(FallbackKind::UnmappedClass), 1);
    }

    #[test]
    fn test_batch_shape_checked() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut exporter = StreamingPredictionExporter::new(config, None, Arc::new(Diagnostics::new())).unwrap();
        let err = exporter
            .push(&[1, 2], array![[0.1f32, 0.9]], &mut NoopSink)
            .unwrap_err();
        assert!(matches!(err, ExportError::BatchShape { expected: 2, actual: 1 }));
    }
}
