//! Checkpoint cache and model construction.

use crate::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Where the trained model lives and how it is shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Name the checkpoint is cached under.
    pub name: String,
    /// Checkpoint file.
    pub path: PathBuf,
    /// Input channels.
    #[serde(default = "default_n_input")]
    pub n_input: usize,
    /// Output classes.
    #[serde(default = "default_n_labels")]
    pub n_labels: usize,
}

fn default_n_input() -> usize {
    102
}

fn default_n_labels() -> usize {
    14129
}

/// Raw checkpoint bytes.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Cache key.
    pub name: String,
    /// File it was read from.
    pub path: PathBuf,
    /// Serialized weights.
    pub bytes: Arc<Vec<u8>>,
}

/// Checkpoints keyed by model name, loaded at most once unless reloaded.
#[derive(Debug, Default)]
pub struct CheckpointCache {
    entries: HashMap<String, Arc<Checkpoint>>,
}

impl CheckpointCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpoint `name`, read from `path` on first use or when `reload` is set.
    ///
    /// A missing file is an error; there is no fallback to random weights.
    pub fn load<P: AsRef<Path>>(&mut self, name: &str, path: P, reload: bool) -> Result<Arc<Checkpoint>> {
        if !reload {
            if let Some(c) = self.entries.get(name) {
                return Ok(c.clone());
            }
        }

        let path = path.as_ref();
        if !path.is_file() {
            return Err(ExportError::MissingCheckpoint(path.to_path_buf()));
        }
        info!("Loading checkpoint from {}", path.display());
        let checkpoint = Arc::new(Checkpoint {
            name: name.to_string(),
            path: path.to_path_buf(),
            bytes: Arc::new(std::fs::read(path)?),
        });
        self.entries.insert(name.to_string(), checkpoint.clone());
        Ok(checkpoint)
    }

    /// True when `name` is cached.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Drop every cached checkpoint.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Build a model from the cached checkpoint named in `params`.
pub fn load_model<M, F>(cache: &mut CheckpointCache, params: &ModelParams, build: F) -> Result<M>
where
    F: FnOnce(&ModelParams, &Checkpoint) -> Result<M>,
{
    let checkpoint = cache.load(&params.name, &params.path, false)?;
    build(params, &checkpoint)
}
