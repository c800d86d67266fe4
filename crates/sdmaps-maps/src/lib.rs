//! # sdmaps-maps
//!
//! Turns aggregated grids into GeoTIFF maps.
//!
//! Each derived column is burned onto the global equirectangular grid
//! ([`RasterExtent::global`]); the columns of one [`VariableGroup`] are
//! stacked into a multi-band [`RasterStack`] and written per export buffer
//! by [`BufferTileWriter`]. Tiles are combined either incrementally
//! ([`incremental_merge`]) or once at the end of a run ([`merge_all`]).

mod cog;
mod error;
mod extent;
mod geotiff;
mod merge;
mod pixel;
mod rasterize;
mod tiles;
mod variables;

pub use cog::{
    decompress_lz4, merge_all, merge_all_at, type_folder, CogConverter, MergeAllOptions, MergedProduct,
    MosaicCogConverter, Tif2CogCommand, MERGE_TYPES,
};
pub use error::MapsError;
pub use extent::RasterExtent;
pub use geotiff::{
    average_overview, estimated_size, needs_big_tiff, read_stack, write_band_stream, write_stack, write_stack_to,
    BandLayout, RasterStack, StackData, TileCompression, WriteOptions, CLASSIC_TIFF_LIMIT,
};
pub use merge::{incremental_merge, mosaic, mosaic_sequence, MergeOptions, MergeOutcome, LAST_MERGE, LAST_PAIR_MERGE};
pub use pixel::Pixel;
pub use rasterize::rasterize;
pub use tiles::{render_group, BufferTileWriter, MapSettings};
pub use variables::VariableGroup;

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, MapsError>;
