//! End-to-end extraction from GeoTIFF files written to a scratch directory.

use sdmaps_metrics::{Diagnostics, FallbackKind};
use sdmaps_raster::{
    LoadedRaster, PatchProvider, RasterCatalog, RasterError, RasterProvider, RasterProviderOptions,
    RasterTransform,
};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const NAME: &str = "NavWater2009_WGS84";

/// 4x4 raster covering [-2, 2] x [-2, 2] with 1 degree pixels.
fn write_raster(dir: &Path, data: &[f32], georeferenced: bool) {
    let file = File::create(dir.join(format!("{NAME}.tif"))).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder.new_image::<colortype::Gray32Float>(4, 4).unwrap();
    if georeferenced {
        image
            .encoder()
            .write_tag(Tag::Unknown(33550), &[1.0f64, 1.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::Unknown(33922), &[0.0f64, 0.0, 0.0, -2.0, 2.0, 0.0][..])
            .unwrap();
    }
    image.write_data(data).unwrap();
}

fn raster_values() -> Vec<f32> {
    let mut data: Vec<f32> = (0..16).map(|i| (i % 4) as f32).collect();
    // Cell (2, 2) contains (lat=0, lon=0)
    data[2 * 4 + 2] = -9999.0;
    data
}

#[test]
fn test_nodata_at_origin_becomes_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    write_raster(dir.path(), &raster_values(), true);

    let catalog = RasterCatalog::builtin().unwrap();
    let diagnostics = Arc::new(Diagnostics::new());
    let provider = RasterProvider::new(
        dir.path(),
        &[NAME.to_string()],
        &catalog,
        RasterProviderOptions {
            size: 1,
            ..Default::default()
        },
        diagnostics.clone(),
    )
    .unwrap();

    assert_eq!(provider.rasters_order(), vec![NAME]);
    let geometry = provider.rasters()[0].geometry();
    assert_eq!((geometry.n_rows, geometry.n_cols), (4, 4));
    assert_eq!((geometry.x_min, geometry.y_min), (-2.0, -2.0));

    let patch = provider.get(7, 0.0, 0.0).unwrap();
    assert_eq!(patch.shape(), &[1, 1, 1]);
    assert_eq!(patch[[0, 0, 0]], -1.0);

    let patch = provider.get(8, 0.5, -1.5).unwrap();
    assert_eq!(patch[[0, 0, 0]], 0.0);
    assert_eq!(diagnostics.total(), 0);
}

#[test]
fn test_normalize_on_load() {
    let dir = tempfile::tempdir().unwrap();
    write_raster(dir.path(), &raster_values(), true);

    let catalog = RasterCatalog::builtin().unwrap();
    let descriptor = catalog.get(NAME).unwrap();
    let raster =
        LoadedRaster::load(dir.path(), descriptor, Some(RasterTransform::Normalize), false).unwrap();

    let diagnostics = Diagnostics::new();
    // Column 2 holds 2.0 everywhere but the origin cell; max is 4.0
    assert_eq!(raster.get_patch(1.5, 0.5, 1, 100.0, &diagnostics)[[0, 0, 0]], 0.5);
    assert_eq!(raster.get_patch(0.0, 0.0, 1, 100.0, &diagnostics)[[0, 0, 0]], -1.0);
    assert_eq!(raster.sentinel(), -1.0);
}

#[test]
fn test_geo_metadata_fallback() {
    let dir = tempfile::tempdir().unwrap();
    write_raster(dir.path(), &raster_values(), false);
    std::fs::write(
        dir.path().join("GeoMetaData.csv"),
        "name;x_min;y_min;n_rows;n_cols;x_res;y_res\nNavWater2009_WGS84;-2;-2;4;4;1;1\n",
    )
    .unwrap();

    let catalog = RasterCatalog::builtin().unwrap();
    let raster = LoadedRaster::load(dir.path(), catalog.get(NAME).unwrap(), None, false).unwrap();
    assert_eq!(raster.geometry().x_min, -2.0);
    assert_eq!(raster.geometry().y_res, 1.0);
    assert_eq!(raster.crs(), None);
}

#[test]
fn test_missing_georeferencing_is_error() {
    let dir = tempfile::tempdir().unwrap();
    write_raster(dir.path(), &raster_values(), false);

    let catalog = RasterCatalog::builtin().unwrap();
    let err = LoadedRaster::load(dir.path(), catalog.get(NAME).unwrap(), None, false).unwrap_err();
    assert!(matches!(err, RasterError::InvalidGeoTiff(_)));
}

#[test]
fn test_patch_outside_raster_counts_fallback() {
    let dir = tempfile::tempdir().unwrap();
    write_raster(dir.path(), &raster_values(), true);

    let catalog = RasterCatalog::builtin().unwrap();
    let diagnostics = Arc::new(Diagnostics::new());
    let provider = RasterProvider::new(
        dir.path(),
        &[NAME.to_string()],
        &catalog,
        RasterProviderOptions {
            size: 1,
            ..Default::default()
        },
        diagnostics.clone(),
    )
    .unwrap();

    let patch = provider.get(1, 45.0, 45.0).unwrap();
    assert_eq!(patch[[0, 0, 0]], -1.0);
    assert_eq!(diagnostics.count(FallbackKind::PatchOutOfBounds), 1);
}
