//! # sdmaps-common
//!
//! Types shared between the export, aggregation and mapping stages.

use serde::{Deserialize, Serialize};

/// Identifier of an occurrence point (the grid's record id).
pub type PointId = u64;

/// External class (species) identifier.
pub type ClassId = u32;

/// Marker written in place of a class id when the label index has no entry
/// for an internal class index.
pub const UNMAPPED_CLASS: ClassId = u32::MAX;

/// Top-ranked classes of one point, as written by the exporter.
///
/// Classes are sorted by descending probability and `classes.len() ==
/// probas.len()`. A class that could not be mapped through the label index is
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPrediction {
    /// Occurrence id.
    pub point_id: PointId,
    /// Ranked class ids.
    pub classes: Vec<Option<ClassId>>,
    /// Probabilities matching `classes`.
    pub probas: Vec<f32>,
}

impl ExportedPrediction {
    /// Create a prediction, truncating both lists to the shorter one.
    pub fn new(point_id: PointId, mut classes: Vec<Option<ClassId>>, mut probas: Vec<f32>) -> Self {
        let n = classes.len().min(probas.len());
        classes.truncate(n);
        probas.truncate(n);
        Self {
            point_id,
            classes,
            probas,
        }
    }

    /// Number of ranked classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no class was retained.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over `(class, proba)` pairs in rank order.
    pub fn pairs(&self) -> impl Iterator<Item = (Option<ClassId>, f32)> + '_ {
        self.classes.iter().copied().zip(self.probas.iter().copied())
    }
}

/// Encode an optional class id for the binary format.
pub fn encode_class(class: Option<ClassId>) -> ClassId {
    class.unwrap_or(UNMAPPED_CLASS)
}

/// Decode a class id read from the binary format.
pub fn decode_class(raw: ClassId) -> Option<ClassId> {
    if raw == UNMAPPED_CLASS {
        None
    } else {
        Some(raw)
    }
}
