//! Shared-directory layout used as the round barrier and model exchange.
//!
//! ```text
//! <root>/Fairness_Metrics/iteration=<n>/<client>.txt
//! <root>/Client_Models/iteration=<n>/<client>/<layer>_kernel.csv
//! <root>/Client_Models/iteration=<n>/<client>/<layer>_bias.csv
//! <root>/AggModel/layer_<i>_kernel.csv
//! <root>/AggModel/layer_<i>_bias.csv
//! ```

use csv::{ReaderBuilder, WriterBuilder};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::AggError;
use crate::sync::RoundStore;

const FAIRNESS_DIR: &str = "Fairness_Metrics";
const MODELS_DIR: &str = "Client_Models";
const OUTPUT_DIR: &str = "AggModel";
const FAIRNESS_EXT: &str = "txt";

/// Encrypted field of a layer update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Kernel,
    Bias,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Kernel, Field::Bias];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Kernel => "kernel",
            Field::Bias => "bias",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SharedDirectory {
    root: PathBuf,
}

impl SharedDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fairness_dir(&self, iteration: u64) -> PathBuf {
        self.root
            .join(FAIRNESS_DIR)
            .join(format!("iteration={iteration}"))
    }

    pub fn fairness_path(&self, iteration: u64, client: &str) -> PathBuf {
        self.fairness_dir(iteration)
            .join(format!("{client}.{FAIRNESS_EXT}"))
    }

    pub fn model_path(&self, iteration: u64, client: &str, layer: &str, field: Field) -> PathBuf {
        self.root
            .join(MODELS_DIR)
            .join(format!("iteration={iteration}"))
            .join(client)
            .join(format!("{layer}_{field}.csv"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn output_path(&self, layer_index: usize, field: Field) -> PathBuf {
        self.output_dir()
            .join(format!("layer_{layer_index}_{field}.csv"))
    }

    /// Client names with a fairness file for `iteration`. A missing
    /// directory means no client has reported yet.
    pub fn reported_clients(&self, iteration: u64) -> Result<BTreeSet<String>, AggError> {
        let dir = self.fairness_dir(iteration);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => return Err(AggError::FileAccess { path: dir, source }),
        };
        let mut clients = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| AggError::FileAccess {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(FAIRNESS_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                clients.insert(stem.to_owned());
            }
        }
        Ok(clients)
    }
}

impl RoundStore for SharedDirectory {
    fn count_ready(&self, iteration: u64, roster: &[String]) -> Result<usize, AggError> {
        let reported = self.reported_clients(iteration)?;
        let known = roster.iter().filter(|c| reported.contains(*c)).count();
        if known < reported.len() {
            debug!(
                iteration,
                unknown = reported.len() - known,
                "ignoring fairness files from clients outside the roster"
            );
        }
        Ok(known)
    }
}

/// First whitespace-delimited token of a text file, as `f64`.
pub fn read_scalar(path: &Path) -> Result<f64, AggError> {
    let text = fs::read_to_string(path).map_err(|source| AggError::FileAccess {
        path: path.to_owned(),
        source,
    })?;
    let token = text.split_whitespace().next().ok_or_else(|| AggError::Parse {
        path: path.to_owned(),
        detail: "empty file".into(),
    })?;
    let value: f64 = token.parse().map_err(|e| AggError::Parse {
        path: path.to_owned(),
        detail: format!("{token:?}: {e}"),
    })?;
    if !value.is_finite() {
        return Err(AggError::Parse {
            path: path.to_owned(),
            detail: format!("non-finite value {value}"),
        });
    }
    Ok(value)
}

/// Headerless rectangular CSV table.
pub fn read_table(path: &Path) -> Result<DMatrix<f64>, AggError> {
    let file = fs::File::open(path).map_err(|source| AggError::FileAccess {
        path: path.to_owned(),
        source,
    })?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut values = Vec::new();
    let mut rows = 0usize;
    let mut cols = None;
    for record in rdr.records() {
        let record = record.map_err(|e| AggError::Parse {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        let width = record.len();
        if *cols.get_or_insert(width) != width {
            return Err(AggError::Parse {
                path: path.to_owned(),
                detail: format!("row {rows} has {width} fields, expected {}", cols.unwrap_or(0)),
            });
        }
        for field in record.iter() {
            let v: f64 = field.parse().map_err(|e| AggError::Parse {
                path: path.to_owned(),
                detail: format!("row {rows}: {field:?}: {e}"),
            })?;
            if !v.is_finite() {
                return Err(AggError::Parse {
                    path: path.to_owned(),
                    detail: format!("row {rows}: non-finite value {field:?}"),
                });
            }
            values.push(v);
        }
        rows += 1;
    }
    Ok(DMatrix::from_row_slice(rows, cols.unwrap_or(0), &values))
}

/// Row-major flattening, the order values are packed into slots.
pub fn flatten_row_major(table: &DMatrix<f64>) -> Vec<f64> {
    table.transpose().as_slice().to_vec()
}

/// Single CSV row, ten significant digits.
pub fn write_row(path: &Path, values: &[f64]) -> Result<(), AggError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| AggError::FileAccess {
            path: parent.to_owned(),
            source,
        })?;
    }
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(values.iter().map(|v| format_significant(*v, 10)))?;
    wtr.flush().map_err(|source| AggError::FileAccess {
        path: path.to_owned(),
        source,
    })?;
    Ok(())
}

fn format_significant(v: f64, digits: usize) -> String {
    let s = format!("{:.*e}", digits - 1, v);
    // Round-trip through f64 to drop trailing zeros of the mantissa.
    s.parse::<f64>().map_or(s, |x| x.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let dir = SharedDirectory::new("/shared");
        assert_eq!(
            dir.fairness_path(4, "Client2"),
            PathBuf::from("/shared/Fairness_Metrics/iteration=4/Client2.txt")
        );
        assert_eq!(
            dir.model_path(4, "Client2", "dense_1", Field::Bias),
            PathBuf::from("/shared/Client_Models/iteration=4/Client2/dense_1_bias.csv")
        );
        assert_eq!(
            dir.output_path(0, Field::Kernel),
            PathBuf::from("/shared/AggModel/layer_0_kernel.csv")
        );
    }

    #[test]
    fn test_read_scalar() {
        let tmp = tempdir().unwrap();
        let ok = tmp.path().join("a.txt");
        fs::write(&ok, "0.015\n").unwrap();
        assert_eq!(read_scalar(&ok).unwrap(), 0.015);

        let bad = tmp.path().join("b.txt");
        fs::write(&bad, "fair\n").unwrap();
        assert!(matches!(read_scalar(&bad), Err(AggError::Parse { .. })));

        let empty = tmp.path().join("c.txt");
        fs::write(&empty, "  \n").unwrap();
        assert!(matches!(read_scalar(&empty), Err(AggError::Parse { .. })));

        let missing = tmp.path().join("d.txt");
        let err = read_scalar(&missing).unwrap_err();
        assert!(err.is_client_scoped());
        assert!(matches!(err, AggError::FileAccess { .. }));
    }

    #[test]
    fn test_read_table_row_major() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("k.csv");
        fs::write(&path, "1,2,3\n4, 5 ,6\n").unwrap();
        let table = read_table(&path).unwrap();
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(flatten_row_major(&table), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_read_table_rejects_ragged_and_garbage() {
        let tmp = tempdir().unwrap();
        let ragged = tmp.path().join("r.csv");
        fs::write(&ragged, "1,2\n3\n").unwrap();
        assert!(matches!(read_table(&ragged), Err(AggError::Parse { .. })));

        let garbage = tmp.path().join("g.csv");
        fs::write(&garbage, "1,x\n").unwrap();
        assert!(matches!(read_table(&garbage), Err(AggError::Parse { .. })));

        for (name, text) in [("nan.csv", "nan,1\n1,1\n"), ("inf.csv", "1,-inf\n"), ("big.csv", "1e400\n")] {
            let path = tmp.path().join(name);
            fs::write(&path, text).unwrap();
            let err = read_table(&path).unwrap_err();
            assert!(matches!(err, AggError::Parse { .. }), "{name}: {err}");
            assert!(err.is_client_scoped());
        }
    }

    #[test]
    fn test_write_row_creates_parent() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("AggModel").join("layer_0_bias.csv");
        write_row(&path, &[2.9925, -0.000_012_345_678_91, 1.0]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "2.9925,-0.00001234567891,1");
    }

    #[test]
    fn test_count_ready_ignores_strangers() {
        let tmp = tempdir().unwrap();
        let dir = SharedDirectory::new(tmp.path());
        let roster = vec!["Client1".to_owned(), "Client2".to_owned()];
        assert_eq!(dir.count_ready(0, &roster).unwrap(), 0);

        let fdir = dir.fairness_dir(0);
        fs::create_dir_all(&fdir).unwrap();
        fs::write(fdir.join("Client1.txt"), "0.1").unwrap();
        fs::write(fdir.join("Intruder.txt"), "0.1").unwrap();
        fs::write(fdir.join("notes.md"), "x").unwrap();
        assert_eq!(dir.count_ready(0, &roster).unwrap(), 1);

        fs::write(fdir.join("Client2.txt"), "0.2").unwrap();
        assert_eq!(dir.count_ready(0, &roster).unwrap(), 2);
        assert_eq!(dir.count_ready(1, &roster).unwrap(), 0);
    }
}
