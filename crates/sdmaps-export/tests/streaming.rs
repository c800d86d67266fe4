//! End-to-end export tests.

use ndarray::{Array2, Array4};
use sdmaps_common::ExportedPrediction;
use sdmaps_export::{
    export_all, read_binary_export, BatchLoader, ExportConfig, ExportFormat, ExportPaths, ModelError, NoopSink,
    Occurrence, OccurrenceDataset, SinkError, StreamingPredictionExporter,
};
use sdmaps_metrics::Diagnostics;
use sdmaps_raster::{GeoFeatureProvider, GeoMode, PatchAssembler};
use std::sync::Arc;

fn config(dir: &std::path::Path, size: usize, buffer_size: usize) -> ExportConfig {
    ExportConfig {
        size,
        buffer_size,
        output_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn scores(rows: usize, classes: usize, seed: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, classes), |(i, j)| ((i * 7 + j * 13 + seed) % 17) as f32 / 17.0)
}

#[test]
fn test_two_buffers_file_size() {
    let dir = tempfile::tempdir().unwrap();
    let size = 4;
    let mut exporter =
        StreamingPredictionExporter::new(config(dir.path(), size, 3), None, Arc::new(Diagnostics::new())).unwrap();

    let mut calls = Vec::new();
    let mut sink = |batch: &[ExportedPrediction], n: usize| -> Result<(), SinkError> {
        calls.push((batch.len(), n));
        Ok(())
    };
    exporter.push(&[1, 2, 3], scores(3, 10, 0), &mut sink).unwrap();
    exporter.push(&[4, 5], scores(2, 10, 1), &mut sink).unwrap();
    let paths = exporter.paths().clone();
    assert_eq!(exporter.finish(&mut sink).unwrap(), 5);

    assert_eq!(calls, vec![(3, 3), (2, 5)]);
    let ExportPaths::Binary { classes, probas } = paths else {
        panic!("binary export expected");
    };
    assert_eq!(std::fs::metadata(&classes).unwrap().len(), ((3 + 2) * size * 4) as u64);
    assert_eq!(std::fs::metadata(&probas).unwrap().len(), ((3 + 2) * size * 4) as u64);

    let rows = read_binary_export(&classes, &probas, &[1, 2, 3, 4, 5], size).unwrap();
    for row in &rows {
        assert!(row.probas.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[test]
fn test_final_flush_with_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut exporter =
        StreamingPredictionExporter::new(config(dir.path(), 2, 2), None, Arc::new(Diagnostics::new())).unwrap();

    let mut calls = Vec::new();
    let mut sink = |batch: &[ExportedPrediction], n: usize| -> Result<(), SinkError> {
        calls.push((batch.len(), n));
        Ok(())
    };
    exporter.push(&[1, 2], scores(2, 5, 0), &mut sink).unwrap();
    exporter.finish(&mut sink).unwrap();

    assert_eq!(calls, vec![(2, 2), (0, 2)]);
}

#[test]
fn test_sink_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let exporter =
        StreamingPredictionExporter::new(config(dir.path(), 2, 2), None, Arc::new(Diagnostics::new())).unwrap();
    let mut sink = |_: &[ExportedPrediction], _: usize| -> Result<(), SinkError> { Err("map write failed".into()) };
    let err = exporter.finish(&mut sink).unwrap_err();
    assert!(err.to_string().contains("map write failed"));
}

#[test]
fn test_export_all_over_geo_features() {
    let dir = tempfile::tempdir().unwrap();
    let mut assembler = PatchAssembler::new(1);
    assembler
        .push(Box::new(GeoFeatureProvider::new(GeoMode::Constant, 1, 10.0, None)))
        .unwrap();
    let occurrences: Vec<Occurrence> = (0..7)
        .map(|i| Occurrence {
            id: 10 + i,
            lat: i as f64 * 10.0,
            lon: i as f64 * -5.0,
        })
        .collect();
    let dataset = OccurrenceDataset::new(occurrences, assembler);
    let loader = BatchLoader::new(&dataset, 3, 2).unwrap();

    // Class 0 scores the latitude, class 1 a constant.
    let mut model = |inputs: &Array4<f32>| -> Result<Array2<f32>, ModelError> {
        let n = inputs.shape()[0];
        Ok(Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                inputs[[i, 0, 0, 0]] / 100.0
            } else {
                0.25
            }
        }))
    };

    let mut cfg = config(dir.path(), 2, 4);
    cfg.format = ExportFormat::Csv;
    let exporter = StreamingPredictionExporter::new(cfg, None, Arc::new(Diagnostics::new()))
        .unwrap()
        .with_total(dataset.len());
    let paths = exporter.paths().clone();
    let exported = export_all(&mut model, loader, exporter, &mut NoopSink).unwrap();
    assert_eq!(exported, 7);

    let ExportPaths::Csv(path) = paths else {
        panic!("csv export expected");
    };
    let rows = sdmaps_export::read_csv_export(path).unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].point_id, 10);
    assert_eq!(rows[0].classes, vec![Some(1), Some(0)]);
    assert_eq!(rows[6].point_id, 16);
    assert_eq!(rows[6].classes, vec![Some(0), Some(1)]);
}
