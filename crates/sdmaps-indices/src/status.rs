//! Threat status table built from ground truth and model-predicted statuses.

use crate::{IndicesError, Result};
use sdmaps_common::ClassId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Statuses counted as threatened in the binary level.
pub const THREATENED: [&str; 3] = ["VU", "EN", "CR"];

/// Default status order, least to most severe.
pub fn default_statuses() -> Vec<String> {
    ["LC", "NT", "VU", "EN", "CR"].iter().map(|s| s.to_string()).collect()
}

/// True when `status` is one of [`THREATENED`].
pub fn is_threatened(status: &str) -> bool {
    THREATENED.contains(&status)
}

/// Status knowledge for one species.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesStatus {
    /// Canonical species name.
    pub species: String,
    /// Assessed status.
    pub ground_truth: Option<String>,
    /// Model prediction: threatened or not.
    pub predicted_binary: Option<bool>,
    /// Model prediction: status.
    pub predicted_status: Option<String>,
}

impl SpeciesStatus {
    /// Ground truth as threatened / not threatened.
    pub fn ground_truth_binary(&self) -> Option<bool> {
        self.ground_truth.as_deref().map(is_threatened)
    }
}

/// Which knowledge a lookup draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLookup {
    /// Assessed status only.
    GroundTruth,
    /// Prediction, only for species without an assessment.
    PredictionOnly,
    /// Prediction, only for species that do have an assessment.
    PredictionOnGroundTruth,
    /// Assessment when present, prediction otherwise.
    GroundTruthOrPrediction,
}

/// Granularity of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusLevel {
    /// Threatened or not.
    #[serde(rename = "B")]
    Binary,
    /// Full status.
    #[serde(rename = "S")]
    Status,
}

/// Named status source used for output columns and map names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    /// Assessed statuses only.
    Iucn,
    /// Assessed statuses completed with predictions.
    Comp,
}

impl StatusSource {
    /// Both sources, in output order.
    pub const ALL: [StatusSource; 2] = [StatusSource::Iucn, StatusSource::Comp];

    /// Prefix of the columns this source produces.
    pub const fn name(&self) -> &'static str {
        match self {
            StatusSource::Iucn => "iucn",
            StatusSource::Comp => "comp",
        }
    }

    /// Lookup mode behind this source.
    pub const fn lookup(&self) -> StatusLookup {
        match self {
            StatusSource::Iucn => StatusLookup::GroundTruth,
            StatusSource::Comp => StatusLookup::GroundTruthOrPrediction,
        }
    }
}

impl std::fmt::Display for StatusSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Files the status table is assembled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFiles {
    /// Species reference (`;`-separated, `speciesKey` and `canonical_name`).
    pub species_ref: PathBuf,
    /// Assessed statuses (`species`, `labels`).
    pub ground_truth: PathBuf,
    /// Binary predictions (`species`, `preds` = `Threatened`/`Not Threatened`).
    pub binary_predictions: PathBuf,
    /// Status predictions (`species`, `preds`).
    pub status_predictions: PathBuf,
}

impl StatusFiles {
    /// The conventional file names under `iucn_dir`, with `species_ref` apart.
    pub fn in_dir<P: AsRef<Path>, Q: AsRef<Path>>(iucn_dir: P, species_ref: Q) -> Self {
        let dir = iucn_dir.as_ref();
        Self {
            species_ref: species_ref.as_ref().to_path_buf(),
            ground_truth: dir.join("IUCN_GroundTruth.csv"),
            binary_predictions: dir.join("predsIUCNN_binary.csv"),
            status_predictions: dir.join("predsIUCNN_statuses.csv"),
        }
    }
}

/// Status knowledge keyed by species key.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    entries: HashMap<ClassId, SpeciesStatus>,
}

impl StatusTable {
    /// Table from entries.
    pub fn new(entries: HashMap<ClassId, SpeciesStatus>) -> Self {
        Self { entries }
    }

    /// Assemble the table from its CSV sources.
    pub fn load(files: &StatusFiles) -> Result<Self> {
        let species = read_species_ref(&files.species_ref)?;
        let ground_truth = read_by_species(&files.ground_truth, b',', "labels")?;
        let binary = read_by_species(&files.binary_predictions, b',', "preds")?;
        let status = read_by_species(&files.status_predictions, b',', "preds")?;

        let entries: HashMap<ClassId, SpeciesStatus> = species
            .into_iter()
            .map(|(key, name)| {
                let entry = SpeciesStatus {
                    ground_truth: ground_truth.get(&name).cloned(),
                    predicted_binary: binary.get(&name).map(|p| p == "Threatened"),
                    predicted_status: status.get(&name).cloned(),
                    species: name,
                };
                (key, entry)
            })
            .collect();

        info!(
            "Status table: {} species, {} assessed",
            entries.len(),
            entries.values().filter(|e| e.ground_truth.is_some()).count()
        );
        Ok(Self { entries })
    }

    /// Number of species.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `species`.
    pub fn get(&self, species: ClassId) -> Option<&SpeciesStatus> {
        self.entries.get(&species)
    }

    /// Threatened flag of `species` under `lookup`.
    pub fn binary(&self, species: ClassId, lookup: StatusLookup) -> Option<bool> {
        let e = self.entries.get(&species)?;
        let assessed = e.ground_truth.is_some();
        match lookup {
            StatusLookup::GroundTruth => e.ground_truth_binary(),
            StatusLookup::PredictionOnly => e.predicted_binary.filter(|_| !assessed),
            StatusLookup::PredictionOnGroundTruth => e.predicted_binary.filter(|_| assessed),
            StatusLookup::GroundTruthOrPrediction => e.ground_truth_binary().or(e.predicted_binary),
        }
    }

    /// Status of `species` under `lookup`.
    pub fn status(&self, species: ClassId, lookup: StatusLookup) -> Option<&str> {
        let e = self.entries.get(&species)?;
        let assessed = e.ground_truth.is_some();
        match lookup {
            StatusLookup::GroundTruth => e.ground_truth.as_deref(),
            StatusLookup::PredictionOnly => e.predicted_status.as_deref().filter(|_| !assessed),
            StatusLookup::PredictionOnGroundTruth => e.predicted_status.as_deref().filter(|_| assessed),
            StatusLookup::GroundTruthOrPrediction => e.ground_truth.as_deref().or(e.predicted_status.as_deref()),
        }
    }
}

fn column(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| IndicesError::MissingColumn {
            column: name.to_string(),
            path: path.display().to_string(),
        })
}

/// First canonical name per species key.
fn read_species_ref(path: &Path) -> Result<HashMap<ClassId, String>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b';').flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let key_col = column(&headers, "speciesKey", path)?;
    let name_col = column(&headers, "canonical_name", path)?;

    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let (Some(key), Some(name)) = (record.get(key_col), record.get(name_col)) else {
            continue;
        };
        let name = name.trim();
        let Some(key) = parse_key(key) else {
            continue;
        };
        if !name.is_empty() {
            out.entry(key).or_insert_with(|| name.to_string());
        }
    }
    Ok(out)
}

fn parse_key(s: &str) -> Option<ClassId> {
    let s = s.trim();
    s.parse::<ClassId>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= ClassId::MAX as f64)
            .map(|v| v as ClassId)
    })
}

/// `species -> value` from a CSV with a `species` column.
fn read_by_species(path: &Path, sep: u8, value: &str) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(sep).flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let species_col = column(&headers, "species", path)?;
    let value_col = column(&headers, value, path)?;

    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let species = record.get(species_col).map(str::trim).unwrap_or("");
        let v = record.get(value_col).map(str::trim).unwrap_or("");
        if !species.is_empty() && !v.is_empty() {
            out.entry(species.to_string()).or_insert_with(|| v.to_string());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StatusTable {
        let mut entries = HashMap::new();
        entries.insert(
            1,
            SpeciesStatus {
                species: "A a".to_string(),
                ground_truth: Some("EN".to_string()),
                predicted_binary: Some(false),
                predicted_status: Some("LC".to_string()),
            },
        );
        entries.insert(
            2,
            SpeciesStatus {
                species: "B b".to_string(),
                ground_truth: None,
                predicted_binary: Some(true),
                predicted_status: Some("VU".to_string()),
            },
        );
        StatusTable::new(entries)
    }

    #[test]
    fn test_lookups() {
        let t = table();
        assert_eq!(t.binary(1, StatusLookup::GroundTruth), Some(true));
        assert_eq!(t.binary(2, StatusLookup::GroundTruth), None);
        assert_eq!(t.binary(1, StatusLookup::PredictionOnly), None);
        assert_eq!(t.binary(2, StatusLookup::PredictionOnly), Some(true));
        assert_eq!(t.binary(1, StatusLookup::PredictionOnGroundTruth), Some(false));
        assert_eq!(t.binary(2, StatusLookup::PredictionOnGroundTruth), None);
        assert_eq!(t.status(1, StatusLookup::GroundTruthOrPrediction), Some("EN"));
        assert_eq!(t.status(2, StatusLookup::GroundTruthOrPrediction), Some("VU"));
        assert_eq!(t.status(3, StatusLookup::GroundTruthOrPrediction), None);
    }

    #[test]
    fn test_load_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        std::fs::write(
            d.join("ref.csv"),
            "speciesKey;canonical_name;x\n10;Orchis mascula;a\n10;Orchis other;b\n11.0;Ophrys apifera;c\n",
        )
        .unwrap();
        std::fs::write(d.join("IUCN_GroundTruth.csv"), ",species,labels\n0,Orchis mascula,NT\n").unwrap();
        std::fs::write(
            d.join("predsIUCNN_binary.csv"),
            ",species,preds\n0,Orchis mascula,Not Threatened\n1,Ophrys apifera,Threatened\n",
        )
        .unwrap();
        std::fs::write(
            d.join("predsIUCNN_statuses.csv"),
            ",species,preds\n0,Orchis mascula,LC\n1,Ophrys apifera,CR\n",
        )
        .unwrap();

        let t = StatusTable::load(&StatusFiles::in_dir(d, d.join("ref.csv"))).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(10).unwrap().species, "Orchis mascula");
        assert_eq!(t.status(10, StatusSource::Iucn.lookup()), Some("NT"));
        assert_eq!(t.binary(10, StatusSource::Comp.lookup()), Some(false));
        assert_eq!(t.status(11, StatusSource::Comp.lookup()), Some("CR"));
        assert_eq!(t.binary(11, StatusSource::Comp.lookup()), Some(true));
        assert_eq!(t.binary(11, StatusSource::Iucn.lookup()), None);
    }
}
