//! Label indexing and the on-disk label index.
//!
//! Training assigns each external class id (species key) a dense internal
//! index. The model's output columns follow the internal indices, so export
//! needs the reverse mapping, stored as JSON `{"<internal>": <external>}`.

use crate::{ExportError, Result};
use sdmaps_common::ClassId;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Internal output index to external class id.
pub type LabelIndex = HashMap<usize, ClassId>;

/// Raw label of a training sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawLabel {
    /// One class.
    Single(ClassId),
    /// One class per task.
    Multi(Vec<ClassId>),
}

/// Dense index assigned to a label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexedLabel {
    /// Single-task index.
    Single(usize),
    /// One index per task.
    Multi(Vec<usize>),
}

/// Assigns dense indices to labels in order of first appearance.
#[derive(Debug, Clone)]
pub struct LabelIndexer {
    multitask: bool,
    tables: Vec<HashMap<ClassId, usize>>,
}

impl LabelIndexer {
    /// Indexer for single-task labels, or for `n_tasks` tasks when `multitask`.
    pub fn new(multitask: bool, n_tasks: usize) -> Self {
        let n = if multitask { n_tasks.max(1) } else { 1 };
        Self {
            multitask,
            tables: vec![HashMap::new(); n],
        }
    }

    /// Index `label`, assigning new indices to unseen classes.
    pub fn index(&mut self, label: &RawLabel) -> Result<IndexedLabel> {
        match (self.multitask, label) {
            (false, RawLabel::Single(class)) => Ok(IndexedLabel::Single(assign(&mut self.tables[0], *class))),
            (true, RawLabel::Multi(classes)) => {
                if classes.len() != self.tables.len() {
                    return Err(ExportError::TaskCount {
                        expected: self.tables.len(),
                        actual: classes.len(),
                    });
                }
                Ok(IndexedLabel::Multi(
                    self.tables
                        .iter_mut()
                        .zip(classes)
                        .map(|(table, class)| assign(table, *class))
                        .collect(),
                ))
            }
            (false, RawLabel::Multi(_)) => Err(ExportError::LabelKind {
                expected: "single",
                actual: "multi",
            }),
            (true, RawLabel::Single(_)) => Err(ExportError::LabelKind {
                expected: "multi",
                actual: "single",
            }),
        }
    }

    /// Number of distinct classes seen for task `column`.
    pub fn len(&self, column: usize) -> usize {
        self.tables.get(column).map_or(0, HashMap::len)
    }

    /// Internal index to class id for task `column`.
    pub fn reversed(&self, column: usize) -> LabelIndex {
        self.tables
            .get(column)
            .map(|t| t.iter().map(|(class, idx)| (*idx, *class)).collect())
            .unwrap_or_default()
    }
}

fn assign(table: &mut HashMap<ClassId, usize>, class: ClassId) -> usize {
    let next = table.len();
    *table.entry(class).or_insert(next)
}

/// Cache of the most recently loaded label index.
#[derive(Debug, Default)]
pub struct IndexCache {
    cached: Option<(PathBuf, Arc<LabelIndex>)>,
}

impl IndexCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Label index stored at `path`, or `None` when the file does not exist.
    pub fn get<P: AsRef<Path>>(&mut self, path: P) -> Result<Option<Arc<LabelIndex>>> {
        let path = path.as_ref();
        if let Some((cached_path, index)) = &self.cached {
            if cached_path == path {
                debug!("Label index {} in cache", path.display());
                return Ok(Some(index.clone()));
            }
        }

        if !path.is_file() {
            info!("Label index {} does not exist; class ids are output indices", path.display());
            return Ok(None);
        }

        info!("Loading label index {}", path.display());
        let index: LabelIndex = serde_json::from_str(&fs::read_to_string(path)?)?;
        let index = Arc::new(index);
        self.cached = Some((path.to_path_buf(), index.clone()));
        Ok(Some(index))
    }

    /// Drop the cached entry and load `path` again.
    pub fn reload<P: AsRef<Path>>(&mut self, path: P) -> Result<Option<Arc<LabelIndex>>> {
        self.invalidate();
        self.get(path)
    }

    /// Forget the cached index.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// True when an index is cached.
    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// Write `indexer`'s reversed table for `column` to `path` and cache it.
    pub fn save_reversed<P: AsRef<Path>>(
        &mut self,
        path: P,
        indexer: &LabelIndexer,
        column: usize,
    ) -> Result<Arc<LabelIndex>> {
        let path = path.as_ref();
        info!("Saving label index at {}", path.display());
        let reversed = indexer.reversed(column);
        let sorted: BTreeMap<usize, ClassId> = reversed.iter().map(|(k, v)| (*k, *v)).collect();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(&sorted)?)?;

        let index = Arc::new(reversed);
        self.cached = Some((path.to_path_buf(), index.clone()));
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_task_indexing() {
        let mut indexer = LabelIndexer::new(false, 1);
        assert_eq!(indexer.index(&RawLabel::Single(42)).unwrap(), IndexedLabel::Single(0));
        assert_eq!(indexer.index(&RawLabel::Single(7)).unwrap(), IndexedLabel::Single(1));
        assert_eq!(indexer.index(&RawLabel::Single(42)).unwrap(), IndexedLabel::Single(0));
        assert_eq!(indexer.len(0), 2);
        assert_eq!(indexer.reversed(0).get(&1), Some(&7));
    }

    #[test]
    fn test_multitask_indexing() {
        let mut indexer = LabelIndexer::new(true, 2);
        assert_eq!(
            indexer.index(&RawLabel::Multi(vec![5, 9])).unwrap(),
            IndexedLabel::Multi(vec![0, 0])
        );
        assert_eq!(
            indexer.index(&RawLabel::Multi(vec![6, 9])).unwrap(),
            IndexedLabel::Multi(vec![1, 0])
        );
        assert!(matches!(
            indexer.index(&RawLabel::Multi(vec![1])),
            Err(ExportError::TaskCount { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_label_kind_mismatch() {
        let mut single = LabelIndexer::new(false, 1);
        assert!(matches!(
            single.index(&RawLabel::Multi(vec![1])),
            Err(ExportError::LabelKind { .. })
        ));
        let mut multi = LabelIndexer::new(true, 2);
        assert!(matches!(
            multi.index(&RawLabel::Single(1)),
            Err(ExportError::LabelKind { .. })
        ));
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut cache = IndexCache::new();
        assert!(cache.get(&path).unwrap().is_none());
        assert!(!cache.is_cached());

        let mut indexer = LabelIndexer::new(false, 1);
        for class in [3000, 1000, 2000] {
            indexer.index(&RawLabel::Single(class)).unwrap();
        }
        cache.save_reversed(&path, &indexer, 0).unwrap();
        assert!(cache.is_cached());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"0":3000,"1":1000,"2":2000}"#);

        let mut fresh = IndexCache::new();
        let index = fresh.get(&path).unwrap().unwrap();
        assert_eq!(index.get(&2), Some(&2000));

        // Changes on disk are invisible until reload
        std::fs::write(&path, r#"{"0": 1}"#).unwrap();
        assert_eq!(fresh.get(&path).unwrap().unwrap().len(), 3);
        assert_eq!(fresh.reload(&path).unwrap().unwrap().len(), 1);
    }
}
