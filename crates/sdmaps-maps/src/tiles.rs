//! Rendering derived columns into per-buffer GeoTIFF tiles.

use crate::extent::RasterExtent;
use crate::geotiff::{write_band_stream, write_stack, BandLayout, RasterStack, StackData, TileCompression, WriteOptions};
use crate::merge::{incremental_merge, MergeOptions};
use crate::rasterize::rasterize;
use crate::variables::VariableGroup;
use crate::Result;
use ndarray::{Array3, Axis};
use sdmaps_indices::Grid;
use sdmaps_metrics::metric_defs;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Map rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    /// Root of the per-stack tile folders.
    pub maps_path: PathBuf,
    /// Pixel size in arc-seconds.
    pub seconds: u32,
    /// Background of sumap and Shannon stacks.
    pub fill_sumap: f32,
    /// Background of category stacks.
    pub fill_cat: u8,
    /// Value burned for points without any retained prediction.
    pub empty_value: u8,
    /// Stage tiles in memory and append overviews before writing.
    pub tiled: bool,
    /// Overview decimation factors used by the staged path.
    pub overviews: Vec<u32>,
    /// Tile compression.
    pub compress: TileCompression,
    /// Merge every new tile into the running `last_merge.tif`.
    pub incremental_merge: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            maps_path: PathBuf::from("out/maps"),
            seconds: 30,
            fill_sumap: 10.0,
            fill_cat: 10,
            empty_value: 255,
            tiled: false,
            overviews: Vec::new(),
            compress: TileCompression::None,
            incremental_merge: false,
        }
    }
}

impl MapSettings {
    /// The global grid at the configured resolution.
    pub fn extent(&self) -> RasterExtent {
        RasterExtent::global(self.seconds)
    }
}

/// Rasterize every column of `group` into one stack on the global grid.
///
/// Category stacks are `u8` over `fill_cat`; the others are `f32` over
/// `fill_sumap`. The fill value doubles as the stack's nodata.
pub fn render_group(grid: &Grid, group: VariableGroup, statuses: &[String], settings: &MapSettings) -> Result<RasterStack> {
    let extent = settings.extent();
    let columns = group.columns(statuses);
    let name = group.stack_name(statuses);
    let (rows, cols) = extent.shape();

    let stack = if group.is_categorical() {
        let mut data = Array3::from_elem((columns.len(), rows, cols), settings.fill_cat);
        for (i, column) in columns.iter().enumerate() {
            let band = rasterize(grid, column, &extent, settings.fill_cat, Some(settings.empty_value))?;
            data.index_axis_mut(Axis(0), i).assign(&band);
        }
        RasterStack::new(name, extent, settings.fill_cat as f64, StackData::U8(data))?
    } else {
        let mut data = Array3::from_elem((columns.len(), rows, cols), settings.fill_sumap);
        for (i, column) in columns.iter().enumerate() {
            let band = rasterize(grid, column, &extent, settings.fill_sumap, Some(settings.empty_value as f32))?;
            data.index_axis_mut(Axis(0), i).assign(&band);
        }
        RasterStack::new(name, extent, settings.fill_sumap as f64, StackData::F32(data))?
    };

    debug!(
        "Stack {} ({}): {} non-empty cells",
        stack.name,
        stack.data.type_name(),
        stack.valid_count()
    );
    Ok(stack)
}

/// A tile that can encode itself.
trait EncodeTile {
    fn stack_name(&self) -> &str;

    fn encode<W: Write + Seek>(&self, writer: &mut W, options: &WriteOptions) -> Result<()>;
}

impl EncodeTile for RasterStack {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn encode<W: Write + Seek>(&self, writer: &mut W, options: &WriteOptions) -> Result<()> {
        write_stack(writer, self, options)
    }
}

/// One variable group of a buffer, rasterized band by band as it is written.
struct GroupTile<'a> {
    grid: &'a Grid,
    name: String,
    columns: Vec<String>,
    categorical: bool,
    settings: &'a MapSettings,
}

impl<'a> GroupTile<'a> {
    fn new(grid: &'a Grid, group: VariableGroup, statuses: &[String], settings: &'a MapSettings) -> Self {
        Self {
            grid,
            name: group.stack_name(statuses),
            columns: group.columns(statuses),
            categorical: group.is_categorical(),
            settings,
        }
    }
}

impl EncodeTile for GroupTile<'_> {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn encode<W: Write + Seek>(&self, writer: &mut W, options: &WriteOptions) -> Result<()> {
        let s = self.settings;
        let extent = s.extent();
        let mut layout = BandLayout {
            name: &self.name,
            extent: &extent,
            nodata: s.fill_sumap as f64,
            bands: self.columns.len(),
        };
        if self.categorical {
            layout.nodata = s.fill_cat as f64;
            write_band_stream(
                writer,
                layout,
                |i| rasterize(self.grid, &self.columns[i], &extent, s.fill_cat, Some(s.empty_value)),
                options,
            )
        } else {
            write_band_stream(
                writer,
                layout,
                |i| rasterize(self.grid, &self.columns[i], &extent, s.fill_sumap, Some(s.empty_value as f32)),
                options,
            )
        }
    }
}

/// Writes buffer stacks to `<maps>/<stack>/<grid>/<exported_count>.tif`.
#[derive(Debug, Clone)]
pub struct BufferTileWriter {
    grid_name: String,
    settings: MapSettings,
}

impl BufferTileWriter {
    /// Writer for tiles of the occurrence grid `grid_name`.
    pub fn new(grid_name: impl Into<String>, settings: MapSettings) -> Self {
        Self {
            grid_name: grid_name.into(),
            settings,
        }
    }

    /// Settings.
    pub fn settings(&self) -> &MapSettings {
        &self.settings
    }

    /// Folder holding every tile of `stack_name`.
    pub fn stack_dir(&self, stack_name: &str) -> PathBuf {
        self.settings.maps_path.join(stack_name).join(&self.grid_name)
    }

    /// Path of the tile written after `exported_count` points.
    pub fn tile_path(&self, stack_name: &str, exported_count: usize) -> PathBuf {
        self.stack_dir(stack_name).join(format!("{}.tif", exported_count))
    }

    /// Write one stack. Returns the tile path.
    pub fn save(&self, stack: &RasterStack, exported_count: usize) -> Result<PathBuf> {
        self.write_tile(stack, exported_count)
    }

    /// Rasterize and write one variable group of a buffer, one band at a
    /// time. Returns the tile path.
    ///
    /// Produces the same file as [`render_group`] followed by [`save`](Self::save)
    /// without holding the whole stack.
    pub fn write_group(
        &self,
        grid: &Grid,
        group: VariableGroup,
        statuses: &[String],
        exported_count: usize,
    ) -> Result<PathBuf> {
        self.write_tile(&GroupTile::new(grid, group, statuses, &self.settings), exported_count)
    }

    fn write_tile<T: EncodeTile>(&self, tile: &T, exported_count: usize) -> Result<PathBuf> {
        let start = Instant::now();
        let path = self.tile_path(tile.stack_name(), exported_count);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.settings.tiled {
            let options = WriteOptions {
                compression: self.settings.compress,
                overviews: self.settings.overviews.clone(),
                ..Default::default()
            };
            let mut staged = Cursor::new(Vec::new());
            tile.encode(&mut staged, &options)?;
            std::fs::write(&path, staged.into_inner())?;
        } else {
            let options = WriteOptions {
                compression: self.settings.compress,
                ..Default::default()
            };
            let mut writer = BufWriter::new(File::create(&path)?);
            tile.encode(&mut writer, &options)?;
            writer.flush()?;
        }

        metrics::counter!(metric_defs::MAPS_TILES_WRITTEN.name, "stack" => tile.stack_name().to_string()).increment(1);
        info!(
            "Wrote {} in {:.2}s",
            path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(path)
    }

    /// Render and write every variable group of one aggregated buffer.
    ///
    /// Groups are written in [`VariableGroup::all`] order. With
    /// `incremental_merge`, each tile is merged into its stack's running
    /// mosaic right after it is written.
    pub fn write_buffer(&self, grid: &Grid, statuses: &[String], exported_count: usize) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for group in VariableGroup::all() {
            let path = self.write_group(grid, group, statuses, exported_count)?;
            if self.settings.incremental_merge {
                incremental_merge(&path, None, &MergeOptions::default())?;
            }
            written.push(path);
        }
        Ok(written)
    }
}

/// Tile file names under `dir` sorted by buffer count.
pub(crate) fn sorted_tiles(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut tiles: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == extension))
        .collect();
    tiles.sort_by_key(|p| {
        let stem = p.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        (stem.parse::<u64>().unwrap_or(u64::MAX), stem)
    });
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdmaps_indices::{GridRow, StatusSource};

    fn grid() -> Grid {
        let row = |lon: f64, lat: f64, empty: bool| GridRow {
            id: 0,
            lon,
            lat,
            region_raw: None,
            region: None,
            classes: Vec::new(),
            probas: Vec::new(),
            empty,
        };
        let mut g = Grid::new(vec![row(5.0, 5.0, false), row(-5.0, -5.0, true)]);
        g.set_column("comp-cats", vec![4.0, 255.0]).unwrap();
        g.set_column("comp-LC", vec![0.25, 0.0]).unwrap();
        g.set_column("comp-CR", vec![0.5, 0.0]).unwrap();
        g
    }

    fn settings(dir: &Path) -> MapSettings {
        MapSettings {
            maps_path: dir.to_path_buf(),
            seconds: 36000,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_status_stack() {
        let statuses = vec!["LC".to_string(), "CR".to_string()];
        let stack = render_group(&grid(), VariableGroup::Status(StatusSource::Comp), &statuses, &settings(Path::new("."))).unwrap();
        assert_eq!(stack.name, "comp-LC_comp-CR");
        assert_eq!(stack.data.dim(), (2, 18, 36));
        assert_eq!(stack.value(0, 8, 18), Some(0.25));
        assert_eq!(stack.value(1, 8, 18), Some(0.5));
        assert_eq!(stack.value(1, 9, 17), Some(255.0));
        assert_eq!(stack.nodata, 10.0);
    }

    #[test]
    fn test_render_category_stack_is_u8() {
        let stack = render_group(&grid(), VariableGroup::Category(StatusSource::Comp), &[], &settings(Path::new("."))).unwrap();
        assert!(matches!(stack.data, StackData::U8(_)));
        assert_eq!(stack.value(0, 8, 18), Some(4.0));
    }

    #[test]
    fn test_tile_paths() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BufferTileWriter::new("occs", settings(dir.path()));
        let stack = render_group(&grid(), VariableGroup::Category(StatusSource::Comp), &[], writer.settings()).unwrap();
        let path = writer.save(&stack, 200).unwrap();
        assert_eq!(path, dir.path().join("comp-cats").join("occs").join("200.tif"));
        assert!(path.is_file());
    }

    #[test]
    fn test_streamed_group_matches_rendered_stack() {
        let statuses = vec!["LC".to_string(), "CR".to_string()];
        for tiled in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let writer = BufferTileWriter::new(
                "occs",
                MapSettings {
                    tiled,
                    overviews: vec![2],
                    compress: TileCompression::Deflate,
                    ..settings(dir.path())
                },
            );
            for group in [
                VariableGroup::Status(StatusSource::Comp),
                VariableGroup::Category(StatusSource::Comp),
            ] {
                let stack = render_group(&grid(), group, &statuses, writer.settings()).unwrap();
                let saved = writer.save(&stack, 1).unwrap();
                let rendered = std::fs::read(&saved).unwrap();

                let streamed = writer.write_group(&grid(), group, &statuses, 2).unwrap();
                assert_eq!(streamed, dir.path().join(&stack.name).join("occs").join("2.tif"));
                assert_eq!(std::fs::read(&streamed).unwrap(), rendered);
                assert_eq!(crate::geotiff::read_stack(&streamed).unwrap(), stack);
            }
        }
    }

    #[test]
    fn test_sorted_tiles() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1000.tif", "200.tif", "merged_x.txt", "50.tif"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let tiles = sorted_tiles(dir.path(), "tif").unwrap();
        let names: Vec<_> = tiles.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["50.tif", "200.tif", "1000.tif"]);
    }
}
