//! On-disk export formats.
//!
//! Binary export is two raw little-endian streams, row-major by (point, rank):
//! `<stem>_classes.bin` holds `u32` class ids (unmapped classes are
//! `u32::MAX`) and `<stem>_probas.bin` holds `f32` probabilities. There is no
//! header and no point id; ids come from the dataset order.
//!
//! CSV export is a single `<stem>.csv` with an `id,class_id,proba` header,
//! one row per (point, rank), and an empty `class_id` for unmapped classes.
//!
//! Both formats are opened in append mode so successive flushes (and
//! successive runs) accumulate.

use crate::{ExportError, Result};
use sdmaps_common::{decode_class, encode_class, ExportedPrediction, PointId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Export file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Raw `u32`/`f32` streams.
    #[default]
    Binary,
    /// Delimited text.
    Csv,
}

/// File stem `preds_size<size>_buff<buffer>[_<name>]`.
pub fn export_stem(size: usize, buffer_size: usize, name: Option<&str>) -> String {
    match name {
        Some(n) if !n.is_empty() => format!("preds_size{size}_buff{buffer_size}_{n}"),
        _ => format!("preds_size{size}_buff{buffer_size}"),
    }
}

/// Files written by an [`ExportWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPaths {
    /// Class and probability streams.
    Binary {
        /// `<stem>_classes.bin`.
        classes: PathBuf,
        /// `<stem>_probas.bin`.
        probas: PathBuf,
    },
    /// `<stem>.csv`.
    Csv(PathBuf),
}

impl ExportPaths {
    /// Paths for `stem` under `dir`.
    pub fn new(dir: &Path, stem: &str, format: ExportFormat) -> Self {
        match format {
            ExportFormat::Binary => ExportPaths::Binary {
                classes: dir.join(format!("{stem}_classes.bin")),
                probas: dir.join(format!("{stem}_probas.bin")),
            },
            ExportFormat::Csv => ExportPaths::Csv(dir.join(format!("{stem}.csv"))),
        }
    }
}

/// Append-mode writer for one export.
#[derive(Debug)]
pub enum ExportWriter {
    /// Binary streams.
    Binary {
        /// Output paths.
        paths: ExportPaths,
        /// Class stream.
        classes: BufWriter<File>,
        /// Probability stream.
        probas: BufWriter<File>,
    },
    /// CSV rows.
    Csv {
        /// Output paths.
        paths: ExportPaths,
        /// Row writer.
        writer: csv::Writer<File>,
    },
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl ExportWriter {
    /// Open (creating `dir` if needed) the export files for `stem`.
    pub fn create<P: AsRef<Path>>(dir: P, stem: &str, format: ExportFormat) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let paths = ExportPaths::new(dir, stem, format);

        Ok(match &paths {
            ExportPaths::Binary { classes, probas } => {
                let classes = BufWriter::new(open_append(classes)?);
                let probas = BufWriter::new(open_append(probas)?);
                ExportWriter::Binary {
                    paths,
                    classes,
                    probas,
                }
            }
            ExportPaths::Csv(path) => {
                let file = open_append(path)?;
                let is_new = file.metadata()?.len() == 0;
                let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
                if is_new {
                    writer.write_record(["id", "class_id", "proba"])?;
                }
                ExportWriter::Csv { paths, writer }
            }
        })
    }

    /// Output paths.
    pub fn paths(&self) -> &ExportPaths {
        match self {
            ExportWriter::Binary { paths, .. } | ExportWriter::Csv { paths, .. } => paths,
        }
    }

    /// Append rows.
    pub fn write(&mut self, rows: &[ExportedPrediction]) -> Result<()> {
        match self {
            ExportWriter::Binary { classes, probas, .. } => {
                for row in rows {
                    for (class, proba) in row.pairs() {
                        classes.write_all(&encode_class(class).to_le_bytes())?;
                        probas.write_all(&proba.to_le_bytes())?;
                    }
                }
            }
            ExportWriter::Csv { writer, .. } => {
                for row in rows {
                    let id = row.point_id.to_string();
                    for (class, proba) in row.pairs() {
                        let class = class.map(|c| c.to_string()).unwrap_or_default();
                        writer.write_record([id.as_str(), class.as_str(), proba.to_string().as_str()])?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Push buffered bytes to the files.
    pub fn flush(&mut self) -> Result<()> {
        match self {
            ExportWriter::Binary { classes, probas, .. } => {
                classes.flush()?;
                probas.flush()?;
            }
            ExportWriter::Csv { writer, .. } => writer.flush()?,
        }
        Ok(())
    }

    /// Flush and close.
    pub fn finish(mut self) -> Result<ExportPaths> {
        self.flush()?;
        Ok(self.paths().clone())
    }
}

fn read_le_words(path: &Path) -> Result<Vec<[u8; 4]>> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(ExportError::Format(format!(
            "{} is {} bytes, not a multiple of 4",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect())
}

/// Read a binary export back, attaching `ids` in order with `per_point`
/// ranks each.
pub fn read_binary_export<P: AsRef<Path>, Q: AsRef<Path>>(
    classes: P,
    probas: Q,
    ids: &[PointId],
    per_point: usize,
) -> Result<Vec<ExportedPrediction>> {
    let classes = read_le_words(classes.as_ref())?;
    let probas = read_le_words(probas.as_ref())?;
    if classes.len() != probas.len() {
        return Err(ExportError::Format(format!(
            "{} class ids but {} probabilities",
            classes.len(),
            probas.len()
        )));
    }
    if per_point == 0 || classes.len() != ids.len() * per_point {
        return Err(ExportError::Format(format!(
            "{} values do not split into {} points of {}",
            classes.len(),
            ids.len(),
            per_point
        )));
    }

    Ok(ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let range = i * per_point..(i + 1) * per_point;
            ExportedPrediction::new(
                *id,
                classes[range.clone()]
                    .iter()
                    .map(|w| decode_class(u32::from_le_bytes(*w)))
                    .collect(),
                probas[range].iter().map(|w| f32::from_le_bytes(*w)).collect(),
            )
        })
        .collect())
}

/// Read a CSV export back; consecutive rows with the same id form one point.
pub fn read_csv_export<P: AsRef<Path>>(path: P) -> Result<Vec<ExportedPrediction>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut out: Vec<ExportedPrediction> = Vec::new();

    for record in reader.records() {
        let record = record?;
        let bad = || ExportError::Format(format!("{}: malformed row {:?}", path.display(), record));
        let id: PointId = record.get(0).and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let class = match record.get(1).ok_or_else(bad)? {
            "" => None,
            s => Some(s.parse().map_err(|_| bad())?),
        };
        let proba: f32 = record.get(2).and_then(|s| s.parse().ok()).ok_or_else(bad)?;

        match out.last_mut() {
            Some(last) if last.point_id == id => {
                last.classes.push(class);
                last.probas.push(proba);
            }
            _ => out.push(ExportedPrediction::new(id, vec![class], vec![proba])),
        }
    }
    Ok(out)
}
