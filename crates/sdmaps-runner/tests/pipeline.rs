//! End-to-end runs over a small occurrence grid with coordinate channels only.

use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use sdmaps_maps::{merge_all, read_stack, MosaicCogConverter};
use sdmaps_metrics::Diagnostics;
use sdmaps_runner::{replay, run_rasters, LinearModel, PipelineConfig, RunSummary};
use std::path::Path;
use std::sync::Arc;

fn config(root: &Path) -> PipelineConfig {
    config_with_size(root, 2)
}

fn config_with_size(root: &Path, size: usize) -> PipelineConfig {
    let occurrences = root.join("occs.csv");
    std::fs::write(
        &occurrences,
        "gbifid;decimallatitude;decimallongitude\n1;5.0;5.0\n2;-45.0;-100.0\n3;45.0;100.0\n1;5.0;5.0\n",
    )
    .unwrap();

    let yaml = format!(
        "
model: {{name: geo, path: {root}/geo.ckpt, n_input: 2, n_labels: 3}}
data: {{occurrences: {root}/occs.csv, size: 1}}
export: {{batch_size: 1, buffer_size: 2, size: {size}, output_dir: {root}/bin, num_workers: 1}}
indices: {{iucn_dir: {root}/iucn}}
maps: {{maps_path: {root}/maps, seconds: 36000}}
",
        root = root.display(),
        size = size
    );
    PipelineConfig::from_yaml_str(&yaml).unwrap()
}

fn uniform_model() -> LinearModel {
    LinearModel::new(Array2::zeros((3, 2)), Array1::zeros(3)).unwrap()
}

#[test]
fn test_run_writes_one_tile_set_per_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut model = uniform_model();

    let summary = run_rasters(&config, &mut model, Arc::new(Diagnostics::new())).unwrap();
    assert_eq!(summary.exported, 3);
    assert_eq!(summary.buffers, 2);
    assert_eq!(summary.tiles, 14);

    let shannon_dir = dir.path().join("maps").join("shannon").join("occs");
    let first = read_stack(shannon_dir.join("2.tif")).unwrap();
    let last = read_stack(shannon_dir.join("3.tif")).unwrap();
    // Two retained classes of equal probability after renormalisation.
    assert_relative_eq!(first.value(0, 8, 18).unwrap(), 2f64.ln(), epsilon = 1e-5);
    assert_relative_eq!(first.value(0, 13, 8).unwrap(), 2f64.ln(), epsilon = 1e-5);
    assert_eq!(first.value(0, 4, 28), Some(10.0));
    assert_relative_eq!(last.value(0, 4, 28).unwrap(), 2f64.ln(), epsilon = 1e-5);
    assert_eq!(last.value(0, 8, 18), Some(10.0));

    let status_tile = dir
        .path()
        .join("maps")
        .join("comp-LC_comp-NT_comp-VU_comp-EN_comp-CR")
        .join("occs")
        .join("2.tif");
    assert_eq!(read_stack(status_tile).unwrap().bands(), 5);
    assert!(dir.path().join("bin").join("preds_size2_buff2_classes.bin").is_file());
}

#[test]
fn test_replay_reproduces_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let direct = run_rasters(&config, &mut uniform_model(), Arc::new(Diagnostics::new())).unwrap();
    let cats = dir.path().join("maps").join("comp-cats").join("occs").join("2.tif");
    let before = read_stack(&cats).unwrap();
    std::fs::remove_dir_all(dir.path().join("maps")).unwrap();

    let replayed = replay(&config, Arc::new(Diagnostics::new())).unwrap();
    assert_eq!(
        RunSummary {
            fallbacks: direct.fallbacks,
            ..replayed.clone()
        },
        direct
    );
    assert_eq!(read_stack(&cats).unwrap(), before);
}

#[test]
fn test_replay_with_size_above_label_count() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_size(dir.path(), 5);
    let direct = run_rasters(&config, &mut uniform_model(), Arc::new(Diagnostics::new())).unwrap();
    assert_eq!(direct.exported, 3);
    assert_eq!(direct.tiles, 14);

    let classes = dir.path().join("bin").join("preds_size5_buff2_classes.bin");
    assert_eq!(std::fs::metadata(&classes).unwrap().len(), 3 * 3 * 4);
    let shannon = dir.path().join("maps").join("shannon").join("occs").join("2.tif");
    let before = read_stack(&shannon).unwrap();
    std::fs::remove_dir_all(dir.path().join("maps")).unwrap();

    let replayed = replay(&config, Arc::new(Diagnostics::new())).unwrap();
    assert_eq!(replayed.exported, 3);
    assert_eq!(replayed.buffers, 2);
    assert_eq!(replayed.tiles, 14);
    assert_eq!(read_stack(&shannon).unwrap(), before);
}

#[test]
fn test_merge_all_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    run_rasters(&config, &mut uniform_model(), Arc::new(Diagnostics::new())).unwrap();

    let products = merge_all(
        &config.maps.settings.maps_path,
        &config.maps.merged_path(),
        &config.data.grid_name(),
        &config.indices.aggregation.statuses,
        &MosaicCogConverter,
        &config.maps.merge,
    )
    .unwrap();
    assert_eq!(products.len(), 7);
    assert!(products.iter().all(|p| p.tiles == 2));

    let shannon = products.iter().find(|p| p.folder == "shannon").unwrap();
    let merged = read_stack(&shannon.output).unwrap();
    for (row, col) in [(8, 18), (13, 8), (4, 28)] {
        assert_relative_eq!(merged.value(0, row, col).unwrap(), 2f64.ln(), epsilon = 1e-5);
    }
}

#[test]
fn test_missing_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut cache = sdmaps_export::CheckpointCache::new();
    assert!(sdmaps_export::load_model(&mut cache, &config.model, LinearModel::from_checkpoint).is_err());
}
