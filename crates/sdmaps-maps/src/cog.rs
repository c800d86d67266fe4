//! Final merge of every buffer tile into one cloud-optimised GeoTIFF per
//! product.

use crate::geotiff::{read_stack, write_stack_to, TileCompression, WriteOptions};
use crate::merge::mosaic_sequence;
use crate::tiles::sorted_tiles;
use crate::variables::VariableGroup;
use crate::{MapsError, Result};
use chrono::{Local, NaiveDateTime};
use sdmaps_indices::StatusSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Variable types merged for each source, in order.
pub const MERGE_TYPES: [&str; 4] = ["cats", "shannon", "B", "S"];

/// Settings of [`merge_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeAllOptions {
    /// Overview levels of the output.
    pub levels: u32,
    /// Worker threads handed to the converter.
    pub num_threads: String,
    /// Converter cache budget in MB.
    pub gdal_cachemax: u32,
    /// Remove the source tiles once merged.
    pub delete_sources: bool,
}

impl Default for MergeAllOptions {
    fn default() -> Self {
        Self {
            levels: 6,
            num_threads: "ALL_CPUS".to_string(),
            gdal_cachemax: 4096,
            delete_sources: false,
        }
    }
}

/// Turns a list of tiles into one COG.
pub trait CogConverter {
    /// Merge the tiles listed (one path per line) in `list` into `output`.
    fn convert(&self, list: &Path, output: &Path, options: &MergeAllOptions) -> Result<()>;
}

/// Runs an external `tif2cog`-style program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tif2CogCommand {
    /// Program name or path.
    pub program: String,
}

impl Default for Tif2CogCommand {
    fn default() -> Self {
        Self {
            program: "tif2cog".to_string(),
        }
    }
}

impl Tif2CogCommand {
    /// Arguments passed for one conversion.
    pub fn args(&self, list: &Path, output: &Path, options: &MergeAllOptions) -> Vec<String> {
        vec![
            "--input-file-list".to_string(),
            list.display().to_string(),
            "--output-file".to_string(),
            output.display().to_string(),
            "--levels".to_string(),
            options.levels.to_string(),
            "--num-threads".to_string(),
            options.num_threads.clone(),
            "--cachemax".to_string(),
            options.gdal_cachemax.to_string(),
        ]
    }
}

impl CogConverter for Tif2CogCommand {
    fn convert(&self, list: &Path, output: &Path, options: &MergeAllOptions) -> Result<()> {
        let args = self.args(list, output, options);
        run(&self.program, &args)
    }
}

/// Mosaics the listed tiles in-process: later tiles are laid over earlier
/// ones, the result is Deflate-compressed with `levels` averaged overviews.
///
/// Thread count and cache budget do not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MosaicCogConverter;

impl CogConverter for MosaicCogConverter {
    fn convert(&self, list: &Path, output: &Path, options: &MergeAllOptions) -> Result<()> {
        let reader = BufReader::new(std::fs::File::open(list)?);
        let mut stacks = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                stacks.push(read_stack(line)?);
            }
        }
        let Some(merged) = mosaic_sequence(&stacks)? else {
            return Err(MapsError::Incompatible(format!("{} lists no tiles", list.display())));
        };

        let (rows, cols) = merged.extent.shape();
        let overviews = (1..=options.levels)
            .map(|level| 1u32 << level.min(31))
            .take_while(|f| (*f as usize) <= rows.max(cols))
            .collect();
        debug!(
            "In-process COG of {} tiles ({} threads, {} MB cache ignored)",
            stacks.len(),
            options.num_threads,
            options.gdal_cachemax
        );
        let write_options = WriteOptions {
            compression: TileCompression::Deflate,
            overviews,
            ..Default::default()
        };
        write_stack_to(output, &merged, &write_options)
    }
}

fn run(program: &str, args: &[String]) -> Result<()> {
    let command = format!("{} {}", program, args.join(" "));
    debug!("Running {}", command);
    let status = Command::new(program).args(args).status().map_err(|e| MapsError::Command {
        command: command.clone(),
        reason: e.to_string(),
    })?;
    if !status.success() {
        return Err(MapsError::Command {
            command,
            reason: status.to_string(),
        });
    }
    Ok(())
}

/// Decompress every `*.lz4` in `dir` next to itself with `lz4 -d -m`.
///
/// Returns the number of archives found.
pub fn decompress_lz4(dir: &Path) -> Result<usize> {
    let archives = sorted_tiles(dir, "lz4")?;
    if archives.is_empty() {
        return Ok(0);
    }
    let mut args = vec!["-d".to_string(), "-m".to_string()];
    args.extend(archives.iter().map(|p| p.display().to_string()));
    run("lz4", &args)?;
    Ok(archives.len())
}

/// Folder name of a merged product: the stack name of its variable group.
pub fn type_folder(source: StatusSource, var_type: &str, statuses: &[String]) -> Result<String> {
    Ok(VariableGroup::parse(var_type, source)?.stack_name(statuses))
}

/// One merged product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedProduct {
    /// Stack folder, e.g. `comp-cats`.
    pub folder: String,
    /// Tile list handed to the converter.
    pub list: PathBuf,
    /// The merged COG.
    pub output: PathBuf,
    /// Number of tiles listed.
    pub tiles: usize,
}

/// [`merge_all_at`] stamped with the current local time.
pub fn merge_all<C: CogConverter + ?Sized>(
    maps_path: &Path,
    out_root: &Path,
    grid_name: &str,
    statuses: &[String],
    converter: &C,
    options: &MergeAllOptions,
) -> Result<Vec<MergedProduct>> {
    merge_all_at(maps_path, out_root, grid_name, statuses, converter, options, Local::now().naive_local())
}

/// Merge the tiles of every product of `grid_name`.
///
/// For each source and each of [`MERGE_TYPES`], tiles under
/// `<maps_path>/<folder>/<grid_name>/` are decompressed when archived,
/// listed in buffer order to `merged_<dd-mm-YYYY-HhMM>.txt` and converted to
/// `<out_root>/<folder>/<grid_name>/merged_<stamp>.tif`. Shannon is shared
/// by both sources and merged once. Products without a tile folder are
/// skipped.
pub fn merge_all_at<C: CogConverter + ?Sized>(
    maps_path: &Path,
    out_root: &Path,
    grid_name: &str,
    statuses: &[String],
    converter: &C,
    options: &MergeAllOptions,
    now: NaiveDateTime,
) -> Result<Vec<MergedProduct>> {
    let stamp = format!("merged_{}", now.format("%d-%m-%Y-%Hh%M"));
    let mut seen = HashSet::new();
    let mut products = Vec::new();

    for source in StatusSource::ALL {
        for var_type in MERGE_TYPES {
            let folder = type_folder(source, var_type, statuses)?;
            if !seen.insert(folder.clone()) {
                continue;
            }
            let tifs_dir = maps_path.join(&folder).join(grid_name);
            if !tifs_dir.is_dir() {
                warn!("No tiles for {} in {}", folder, tifs_dir.display());
                continue;
            }

            let archives = decompress_lz4(&tifs_dir)?;
            if archives > 0 {
                info!("Decompressed {} archives in {}", archives, tifs_dir.display());
            }
            let tiles = sorted_tiles(&tifs_dir, "tif")?;

            let list = tifs_dir.join(format!("{}.txt", stamp));
            let mut file = std::io::BufWriter::new(std::fs::File::create(&list)?);
            for tile in &tiles {
                writeln!(file, "{}", tile.display())?;
            }
            file.flush()?;

            let out_dir = out_root.join(&folder).join(grid_name);
            std::fs::create_dir_all(&out_dir)?;
            let output = out_dir.join(format!("{}.tif", stamp));
            converter.convert(&list, &output, options)?;
            info!("Merged {} tiles of {} into {}", tiles.len(), folder, output.display());

            if options.delete_sources {
                for tile in &tiles {
                    std::fs::remove_file(tile)?;
                }
            }
            products.push(MergedProduct {
                folder,
                list,
                output,
                tiles: tiles.len(),
            });
        }
    }
    Ok(products)
}
