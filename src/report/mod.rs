//! Rate-distortion comparison reporting
//!
//! Merges the current model's single RD datapoint with reference-codec
//! curves into one comparison artifact: a column-ordered table plus a
//! renderable figure (see [`plot`]).

pub mod plot;

pub use plot::{plot_rd, LayoutOverrides, RdFigure, RdPlotLayout, RdTrace};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Marker appended to the current model's name to distinguish it from
/// reference rows
pub const CURRENT_MODEL_MARKER: char = '*';

/// The current model's RD state at evaluation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdPoint {
    /// Model name, without the marker suffix
    pub name: String,

    /// Epoch the measurement was taken at
    pub epoch: usize,

    /// Rate-distortion loss at that epoch
    pub loss: f64,

    /// Measured bitrate in bits per pixel
    pub bpp: f64,

    /// PSNR in dB against the true decoded reconstruction
    pub psnr: f64,
}

impl RdPoint {
    /// Display name carrying the current-model marker
    pub fn marked_name(&self) -> String {
        format!("{}{}", self.name, CURRENT_MODEL_MARKER)
    }
}

/// A reference codec's RD curve; point order defines the curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdSeries {
    /// Codec name, unique within one comparison
    pub name: String,

    /// Bitrates in bits per pixel
    pub x: Vec<f64>,

    /// Quality values (PSNR in dB)
    pub y: Vec<f64>,
}

impl RdSeries {
    /// Number of points on the curve
    pub fn len(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    /// Whether the curve has no points
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A table cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Numeric value
    Float(f64),
    /// Integer value (epoch indices)
    Int(i64),
    /// Text value (names)
    Str(String),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Column-ordered comparison of reference curves and the current model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonTable {
    /// Column names in output order
    pub columns: Vec<String>,

    /// One row per reference point plus one for the current model
    pub rows: Vec<HashMap<String, CellValue>>,
}

impl ComparisonTable {
    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Round to four significant digits, the precision RD reports use
pub fn sig4(x: f64) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let magnitude = x.abs().log10().floor();
    let factor = 10f64.powf(3.0 - magnitude);
    (x * factor).round() / factor
}

/// Merge reference series rows with the current-model row.
///
/// Output columns start with the deduplicated `hover_fields` (first
/// occurrence wins), followed by the remaining columns in their original
/// relative order. Row count is the sum of reference lengths plus one.
pub fn build_comparison(
    reference_series: &[RdSeries],
    current: &RdPoint,
    hover_fields: &[&str],
) -> ComparisonTable {
    let mut rows = Vec::new();
    for series in reference_series {
        for i in 0..series.len() {
            let mut row = HashMap::new();
            row.insert("name".to_string(), CellValue::Str(series.name.clone()));
            row.insert("bpp".to_string(), CellValue::Float(series.x[i]));
            row.insert("psnr".to_string(), CellValue::Float(series.y[i]));
            rows.push(row);
        }
    }

    let mut current_row = HashMap::new();
    current_row.insert("name".to_string(), CellValue::Str(current.marked_name()));
    current_row.insert("epoch".to_string(), CellValue::Int(current.epoch as i64));
    current_row.insert("loss".to_string(), CellValue::Float(sig4(current.loss)));
    current_row.insert("bpp".to_string(), CellValue::Float(sig4(current.bpp)));
    current_row.insert("psnr".to_string(), CellValue::Float(sig4(current.psnr)));
    rows.push(current_row);

    let original_order = ["name", "bpp", "psnr", "epoch", "loss"];
    let mut columns: Vec<String> = Vec::new();
    for field in hover_fields {
        if !columns.iter().any(|c| c == field) {
            columns.push((*field).to_string());
        }
    }
    for field in original_order {
        if !columns.iter().any(|c| c == field) {
            columns.push(field.to_string());
        }
    }

    ComparisonTable { columns, rows }
}

/// Source of reference-codec RD curves for a given dataset
pub trait BenchmarkStore: Send {
    /// Fetch the curve for one codec measured on one dataset
    fn series(&self, codec: &str, dataset: &str) -> Result<RdSeries>;
}

/// Benchmark store reading `<root>/<dataset>/<codec>.json` files
pub struct JsonBenchmarkStore {
    root: PathBuf,
}

impl JsonBenchmarkStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl BenchmarkStore for JsonBenchmarkStore {
    fn series(&self, codec: &str, dataset: &str) -> Result<RdSeries> {
        let path = self.root.join(dataset).join(format!("{codec}.json"));
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::benchmark(format!(
                "no reference curve for codec `{codec}` on `{dataset}` at {}: {e}",
                path.display()
            ))
        })?;
        let series: RdSeries = serde_json::from_str(&text)?;
        if series.x.len() != series.y.len() {
            return Err(Error::benchmark(format!(
                "curve for `{codec}` has {} bitrates but {} quality values",
                series.x.len(),
                series.y.len()
            )));
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(name: &str, n: usize) -> RdSeries {
        RdSeries {
            name: name.to_string(),
            x: (0..n).map(|i| 0.1 * (i + 1) as f64).collect(),
            y: (0..n).map(|i| 28.0 + i as f64).collect(),
        }
    }

    fn point() -> RdPoint {
        RdPoint {
            name: "bmshj2018-factorized".to_string(),
            epoch: 250,
            loss: 1.23456,
            bpp: 0.41237,
            psnr: 31.5678,
        }
    }

    #[test]
    fn test_row_count_is_sum_plus_one() {
        let table = build_comparison(&[series("jpeg", 5), series("webp", 7)], &point(), &[]);
        assert_eq!(table.num_rows(), 13);
    }

    #[test]
    fn test_current_row_is_marked() {
        let table = build_comparison(&[series("jpeg", 2)], &point(), &[]);
        let last = table.rows.last().unwrap();
        assert_eq!(
            last["name"],
            CellValue::Str("bmshj2018-factorized*".to_string())
        );
    }

    #[test]
    fn test_hover_fields_lead_column_order() {
        let table = build_comparison(
            &[series("jpeg", 1)],
            &point(),
            &["psnr", "bpp", "psnr", "name"],
        );
        assert_eq!(table.columns, vec!["psnr", "bpp", "name", "epoch", "loss"]);
    }

    #[test]
    fn test_no_hover_fields_keeps_original_order() {
        let table = build_comparison(&[series("jpeg", 1)], &point(), &[]);
        assert_eq!(table.columns, vec!["name", "bpp", "psnr", "epoch", "loss"]);
    }

    #[test]
    fn test_current_values_rounded_to_four_significant_digits() {
        let table = build_comparison(&[], &point(), &[]);
        let row = table.rows.last().unwrap();
        assert_eq!(row["loss"], CellValue::Float(1.235));
        assert_eq!(row["bpp"], CellValue::Float(0.4124));
        assert_eq!(row["psnr"], CellValue::Float(31.57));
    }

    #[test]
    fn test_sig4() {
        assert_relative_eq!(sig4(1234.567), 1235.0);
        assert_relative_eq!(sig4(0.00123456), 0.001235);
        assert_relative_eq!(sig4(-9.87654), -9.877);
        assert_eq!(sig4(0.0), 0.0);
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("kodak");
        std::fs::create_dir_all(&dataset_dir).unwrap();
        let curve = series("jpeg", 3);
        std::fs::write(
            dataset_dir.join("jpeg.json"),
            serde_json::to_string(&curve).unwrap(),
        )
        .unwrap();

        let store = JsonBenchmarkStore::new(dir.path());
        let loaded = store.series("jpeg", "kodak").unwrap();
        assert_eq!(loaded.name, "jpeg");
        assert_eq!(loaded.len(), 3);

        assert!(store.series("webp", "kodak").is_err());
    }
}
