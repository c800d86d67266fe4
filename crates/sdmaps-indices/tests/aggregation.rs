//! Full aggregation pipeline over files on disk.

use approx::assert_relative_eq;
use sdmaps_common::ExportedPrediction;
use sdmaps_indices::{
    AggregationConfig, GridColumns, GridIndexAggregator, RangeMap, ReferenceGrid, RegionLayer, RegionSource,
    StatusFiles, StatusTable,
};
use sdmaps_metrics::{Diagnostics, FallbackKind};
use std::path::Path;
use std::sync::Arc;

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn fixtures(dir: &Path) {
    write(
        dir,
        "grid.csv",
        "gbifid;decimallatitude;decimallongitude\n\
         1;5;5\n\
         2;5;25\n\
         3;5;15\n",
    );
    write(
        dir,
        "level1.geojson",
        r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"LEVEL1_COD": 1},
             "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]]]}},
            {"type": "Feature", "properties": {"LEVEL1_COD": 2},
             "geometry": {"type": "Polygon", "coordinates": [[[20, 0], [30, 0], [30, 10], [20, 10], [20, 0]]]}}
        ]}"#,
    );
    write(dir, "ranges.json", r#"{"1": {"100": [1], "101": [1, 2], "102": [2]}}"#);
    write(
        dir,
        "ref.csv",
        "speciesKey;canonical_name\n100;Sp a\n101;Sp b\n102;Sp c\n",
    );
    write(dir, "IUCN_GroundTruth.csv", ",species,labels\n0,Sp a,EN\n");
    write(
        dir,
        "predsIUCNN_binary.csv",
        ",species,preds\n0,Sp a,Threatened\n1,Sp b,Not Threatened\n2,Sp c,Threatened\n",
    );
    write(
        dir,
        "predsIUCNN_statuses.csv",
        ",species,preds\n0,Sp a,VU\n1,Sp b,LC\n2,Sp c,CR\n",
    );
}

fn aggregator(dir: &Path, diagnostics: Arc<Diagnostics>) -> GridIndexAggregator {
    let reference = ReferenceGrid::load(dir.join("grid.csv"), b';', &GridColumns::default()).unwrap();
    let layer = RegionLayer::from_geojson(dir.join("level1.geojson"), "LEVEL1_COD").unwrap();
    let ranges = RangeMap::from_json(dir.join("ranges.json")).unwrap();
    let status = StatusTable::load(&StatusFiles::in_dir(dir, dir.join("ref.csv"))).unwrap();
    GridIndexAggregator::new(
        AggregationConfig {
            threshold: 0.08,
            ..Default::default()
        },
        Arc::new(reference),
        RegionSource::Polygons(layer),
        Some(Arc::new(ranges)),
        Arc::new(status),
        diagnostics,
    )
}

#[test]
fn test_buffer_aggregation() {
    let dir = tempfile::tempdir().unwrap();
    fixtures(dir.path());
    let diagnostics = Arc::new(Diagnostics::new());
    let agg = aggregator(dir.path(), diagnostics.clone());

    let batch = vec![
        ExportedPrediction::new(1, vec![Some(100), Some(102), Some(101)], vec![0.6, 0.3, 0.05]),
        ExportedPrediction::new(2, vec![Some(102), Some(101), Some(100)], vec![0.5, 0.3, 0.2]),
        ExportedPrediction::new(3, vec![Some(100)], vec![0.01]),
        ExportedPrediction::new(42, vec![Some(100)], vec![0.9]),
    ];
    let grid = agg.aggregate(&batch).unwrap();
    assert_eq!(grid.len(), 3);
    assert_eq!(diagnostics.count(FallbackKind::UnplacedPoint), 1);
    // Point 3 lies between the two polygons.
    assert_eq!(diagnostics.count(FallbackKind::NearestRegionFallback), 1);

    let rows = grid.rows();
    // Point 1, region 1: 101 below T, 102 out of range.
    assert_eq!(rows[0].region, Some(1));
    assert_eq!(rows[0].classes, vec![Some(100)]);
    assert_relative_eq!(rows[0].probas[0], 1.0);
    // Point 2, region 2: 100 out of range, the rest renormalised.
    assert_eq!(rows[1].classes, vec![Some(102), Some(101)]);
    assert_relative_eq!(rows[1].probas.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(rows[1].probas[0], 0.625, epsilon = 1e-6);
    // Point 3: nothing above T.
    assert!(rows[2].empty);
    assert!(rows[2].probas.is_empty());

    assert_eq!(grid.column("iucn-cats").unwrap(), &[4.0, 255.0, 255.0]);
    assert_eq!(grid.column("comp-cats").unwrap(), &[4.0, 5.0, 255.0]);
    let comp_b = grid.column("comp-B").unwrap();
    assert_relative_eq!(comp_b[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(comp_b[1], 0.625, epsilon = 1e-6);
    assert_relative_eq!(grid.column("comp-LC").unwrap()[1], 0.375, epsilon = 1e-6);
    assert_eq!(grid.column("shannon").unwrap()[0], 0.0);
}

#[test]
fn test_without_range_filter() {
    let dir = tempfile::tempdir().unwrap();
    fixtures(dir.path());
    let mut agg_config = AggregationConfig {
        threshold: 0.08,
        removes_oor: false,
        normalize_probas: false,
        ..Default::default()
    };
    agg_config.statuses = vec!["LC".to_string(), "CR".to_string()];
    let reference = ReferenceGrid::load(dir.path().join("grid.csv"), b';', &GridColumns::default()).unwrap();
    let agg = GridIndexAggregator::new(
        agg_config,
        Arc::new(reference),
        RegionSource::GridColumn,
        None,
        Arc::new(StatusTable::default()),
        Arc::new(Diagnostics::new()),
    );

    let grid = agg
        .aggregate(&[ExportedPrediction::new(1, vec![Some(100), Some(102), Some(101)], vec![0.6, 0.3, 0.05])])
        .unwrap();
    assert_eq!(grid.rows()[0].classes, vec![Some(100), Some(102)]);
    assert_eq!(grid.rows()[0].probas, vec![0.6, 0.3]);
    assert!(grid.has_column("comp-CR"));
    assert!(!grid.has_column("comp-EN"));
    assert_eq!(grid.column("iucn-cats").unwrap(), &[255.0]);
}
