//! # sdmaps-export
//!
//! Runs a trained classifier over occurrence points and streams its ranked
//! predictions to disk.
//!
//! The pipeline is:
//!
//! 1. [`load_occurrences`] reads the prediction grid.
//! 2. [`OccurrenceDataset`] pairs it with a raster [`PatchAssembler`]
//!    and [`BatchLoader`] cuts it into ordered batches.
//! 3. A [`Model`] scores every batch.
//! 4. [`StreamingPredictionExporter`] keeps the top-K classes per point,
//!    maps output indices to class ids through a [`LabelIndex`], appends
//!    them to the export files and hands each flushed buffer to a
//!    [`FlushSink`].
//!
//! [`PatchAssembler`]: sdmaps_raster::PatchAssembler

mod checkpoint;
mod codec;
mod dataset;
mod error;
mod exporter;
mod index;
mod model;

pub use checkpoint::{load_model, Checkpoint, CheckpointCache, ModelParams};
pub use codec::{export_stem, read_binary_export, read_csv_export, ExportFormat, ExportPaths, ExportWriter};
pub use dataset::{load_occurrences, Batch, BatchLoader, Occurrence, OccurrenceColumns, OccurrenceDataset, NO_LABEL};
pub use error::ExportError;
pub use exporter::{export_all, top_k, ExportConfig, FlushSink, NoopSink, SinkError, StreamingPredictionExporter};
pub use index::{IndexCache, IndexedLabel, LabelIndex, LabelIndexer, RawLabel};
pub use model::{Model, ModelError};

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;
