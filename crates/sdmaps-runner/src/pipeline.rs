//! Wiring of the export, aggregation and mapping stages.

use crate::config::PipelineConfig;
use crate::{Result, RunnerError};
use sdmaps_common::ExportedPrediction;
use sdmaps_export::{
    export_all, load_occurrences, read_binary_export, read_csv_export, BatchLoader, ExportPaths, FlushSink,
    IndexCache, Model, OccurrenceDataset, SinkError, StreamingPredictionExporter,
};
use sdmaps_indices::{
    GridIndexAggregator, RangeMap, ReferenceGrid, RegionLayer, RegionSource, StatusFiles, StatusTable,
};
use sdmaps_maps::BufferTileWriter;
use sdmaps_metrics::Diagnostics;
use sdmaps_raster::{
    GeoFeatureProvider, PatchAssembler, RasterCatalog, RasterProvider, RasterProviderOptions,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Aggregates every flushed buffer and writes its map tiles.
#[derive(Debug)]
pub struct MapSink {
    aggregator: GridIndexAggregator,
    writer: BufferTileWriter,
    statuses: Vec<String>,
    buffers: usize,
    tiles: usize,
}

impl MapSink {
    /// Sink writing through `writer`.
    pub fn new(aggregator: GridIndexAggregator, writer: BufferTileWriter) -> Self {
        let statuses = aggregator.config().statuses.clone();
        Self {
            aggregator,
            writer,
            statuses,
            buffers: 0,
            tiles: 0,
        }
    }

    /// Aggregate one buffer and write its tiles, named after `exported_count`.
    ///
    /// Empty buffers (the end-of-stream flush) produce nothing.
    pub fn process(&mut self, batch: &[ExportedPrediction], exported_count: usize) -> Result<()> {
        if batch.is_empty() {
            debug!("Empty buffer at {} points, no tiles", exported_count);
            return Ok(());
        }
        let start = Instant::now();
        let grid = self.aggregator.aggregate(batch)?;
        let written = self.writer.write_buffer(&grid, &self.statuses, exported_count)?;
        self.buffers += 1;
        self.tiles += written.len();
        info!(
            "Buffer {} ({} points): {} tiles in {:.2}s",
            self.buffers,
            exported_count,
            written.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Non-empty buffers processed.
    pub fn buffers(&self) -> usize {
        self.buffers
    }

    /// Tiles written.
    pub fn tiles(&self) -> usize {
        self.tiles
    }
}

impl FlushSink for MapSink {
    fn on_flush(&mut self, batch: &[ExportedPrediction], exported_count: usize) -> std::result::Result<(), SinkError> {
        self.process(batch, exported_count).map_err(|e| e.to_string().into())
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Points exported (or replayed).
    pub exported: usize,
    /// Non-empty buffers turned into tiles.
    pub buffers: usize,
    /// Tiles written.
    pub tiles: usize,
    /// Fallbacks recorded along the way.
    pub fallbacks: u64,
}

/// Coordinate channels first, then the configured rasters.
pub fn build_assembler(config: &PipelineConfig, diagnostics: &Arc<Diagnostics>) -> Result<PatchAssembler> {
    let data = &config.data;
    let mut assembler = PatchAssembler::new(data.size);
    assembler.push(Box::new(GeoFeatureProvider::new(
        data.geo_mode,
        data.size,
        data.res,
        data.patch_transform,
    )))?;

    if data.rasters.is_empty() {
        info!("No predictor rasters configured, coordinates only");
        return Ok(assembler);
    }
    let catalog = match &data.catalog {
        Some(path) => RasterCatalog::from_json(&std::fs::read_to_string(path)?)?,
        None => RasterCatalog::builtin()?,
    };
    let options = RasterProviderOptions {
        transform: data.raster_transform,
        log_transform: data.log_transform,
        size: data.size,
        res: data.res,
    };
    let rasters = RasterProvider::new(&data.rasters_dir, &data.rasters, &catalog, options, diagnostics.clone())?;
    info!("{}", rasters.summary());
    assembler.push(Box::new(rasters))?;
    Ok(assembler)
}

/// Occurrences of the configured grid, paired with their assembler.
pub fn build_dataset(config: &PipelineConfig, diagnostics: &Arc<Diagnostics>) -> Result<OccurrenceDataset> {
    let occurrences = load_occurrences(&config.data.occurrences, config.occurrence_sep()?, &config.data.columns)?;
    let assembler = build_assembler(config, diagnostics)?;
    info!(
        "Dataset: {} points, {} channels of {}x{}",
        occurrences.len(),
        assembler.channels(),
        assembler.size(),
        assembler.size()
    );
    Ok(OccurrenceDataset::new(occurrences, assembler))
}

/// Aggregator over the reference grid with its regions, ranges and statuses.
pub fn build_aggregator(config: &PipelineConfig, diagnostics: &Arc<Diagnostics>) -> Result<GridIndexAggregator> {
    let indices = &config.indices;
    let grid_path = indices.grid.as_ref().unwrap_or(&config.data.occurrences);
    let reference = ReferenceGrid::load(grid_path, config.occurrence_sep()?, &indices.grid_columns)?;

    let regions = match &indices.regions {
        Some(path) => RegionSource::Polygons(RegionLayer::from_geojson(path, &indices.region_property)?),
        None => RegionSource::GridColumn,
    };
    let ranges = match &indices.ranges {
        Some(path) => Some(Arc::new(RangeMap::from_json(path)?)),
        None => {
            if indices.aggregation.removes_oor {
                warn!("No range map configured, out-of-range filter disabled");
            }
            None
        }
    };
    let status = if indices.iucn_dir.is_dir() {
        StatusTable::load(&StatusFiles::in_dir(&indices.iucn_dir, &indices.species_ref))?
    } else {
        warn!(
            "Status directory {} not found, every species is unassessed",
            indices.iucn_dir.display()
        );
        StatusTable::default()
    };

    Ok(GridIndexAggregator::new(
        indices.aggregation.clone(),
        Arc::new(reference),
        regions,
        ranges,
        Arc::new(status),
        diagnostics.clone(),
    ))
}

/// Map sink for the configured grid.
pub fn build_map_sink(config: &PipelineConfig, diagnostics: &Arc<Diagnostics>) -> Result<MapSink> {
    let aggregator = build_aggregator(config, diagnostics)?;
    let writer = BufferTileWriter::new(config.data.grid_name(), config.maps.settings.clone());
    Ok(MapSink::new(aggregator, writer))
}

/// Predict over the occurrence grid, export and map every buffer.
pub fn run_rasters<M: Model + ?Sized>(
    config: &PipelineConfig,
    model: &mut M,
    diagnostics: Arc<Diagnostics>,
) -> Result<RunSummary> {
    let start = Instant::now();
    let dataset = build_dataset(config, &diagnostics)?;
    let mut sink = build_map_sink(config, &diagnostics)?;

    let index = match &config.export.index_path {
        Some(path) => IndexCache::new().get(path)?,
        None => None,
    };
    let exporter = StreamingPredictionExporter::new(config.export.clone(), index, diagnostics.clone())?
        .with_total(dataset.len());
    let batches = BatchLoader::new(&dataset, config.export.batch_size, config.export.num_workers)?;
    info!("{} batches of {}", batches.num_batches(), config.export.batch_size);

    let exported = export_all(model, batches, exporter, &mut sink)?;
    let summary = RunSummary {
        exported,
        buffers: sink.buffers(),
        tiles: sink.tiles(),
        fallbacks: diagnostics.total(),
    };
    info!("Run finished in {:.1}s: {:?}", start.elapsed().as_secs_f64(), summary);
    Ok(summary)
}

/// Sizes of the buffers an export of `total` points flushes, in order.
///
/// Batches of `batch_size` accumulate until at least `buffer_size` rows are
/// pending; whatever remains is flushed at the end. Empty flushes are left
/// out.
pub fn flush_boundaries(total: usize, batch_size: usize, buffer_size: usize) -> Vec<usize> {
    let batch_size = batch_size.max(1);
    let mut sizes = Vec::new();
    let mut pending = 0;
    let mut done = 0;
    while done < total {
        let n = batch_size.min(total - done);
        done += n;
        pending += n;
        if pending >= buffer_size {
            sizes.push(pending);
            pending = 0;
        }
    }
    if pending > 0 {
        sizes.push(pending);
    }
    sizes
}

/// Values the exporter wrote per point: the top `size` classes, capped by
/// the classes the model predicts.
pub fn slots_per_point(size: usize, n_labels: usize) -> usize {
    size.min(n_labels)
}

/// Map an existing export again, buffer by buffer, without running a model.
///
/// Binary exports carry no ids: they are taken from the occurrence file in
/// order. Buffers are cut where the export flushed, so tile names
/// match a direct run.
pub fn replay(config: &PipelineConfig, diagnostics: Arc<Diagnostics>) -> Result<RunSummary> {
    let export = &config.export;
    let paths = ExportPaths::new(&export.output_dir, &export.stem(), export.format);
    let predictions = match &paths {
        ExportPaths::Binary { classes, probas } => {
            let per_point = slots_per_point(export.size, config.model.n_labels);
            let values = std::fs::metadata(classes)?.len() as usize / 4;
            if per_point == 0 || values % per_point != 0 {
                return Err(RunnerError::Config(format!(
                    "{} holds {} values, not a multiple of {} per point",
                    classes.display(),
                    values,
                    per_point
                )));
            }
            let n = values / per_point;
            let occurrences =
                load_occurrences(&config.data.occurrences, config.occurrence_sep()?, &config.data.columns)?;
            if occurrences.len() < n {
                return Err(RunnerError::Config(format!(
                    "export holds {} points but {} lists only {}",
                    n,
                    config.data.occurrences.display(),
                    occurrences.len()
                )));
            }
            let ids: Vec<_> = occurrences.iter().take(n).map(|o| o.id).collect();
            read_binary_export(classes, probas, &ids, per_point)?
        }
        ExportPaths::Csv(path) => read_csv_export(path)?,
    };
    info!("Replaying {} exported points from {:?}", predictions.len(), paths);

    let mut sink = build_map_sink(config, &diagnostics)?;
    let mut exported = 0;
    for size in flush_boundaries(predictions.len(), export.batch_size, export.buffer_size) {
        let buffer = &predictions[exported..exported + size];
        exported += size;
        sink.process(buffer, exported)?;
    }
    Ok(RunSummary {
        exported,
        buffers: sink.buffers(),
        tiles: sink.tiles(),
        fallbacks: diagnostics.total(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_boundaries() {
        assert_eq!(flush_boundaries(3, 1, 2), vec![2, 1]);
        assert_eq!(flush_boundaries(1200, 512, 100), vec![512, 512, 176]);
        assert_eq!(flush_boundaries(10, 3, 5), vec![6, 4]);
        assert_eq!(flush_boundaries(4, 2, 2), vec![2, 2]);
        assert!(flush_boundaries(0, 512, 100).is_empty());
    }

    #[test]
    fn test_slots_per_point_capped_by_labels() {
        assert_eq!(slots_per_point(2, 3), 2);
        assert_eq!(slots_per_point(5, 3), 3);
        assert_eq!(slots_per_point(3, 3), 3);
        assert_eq!(slots_per_point(0, 3), 0);
    }
}
