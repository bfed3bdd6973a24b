//! Telemetry retrieval.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::series::TimeSeries;
use crate::time::TimeConversion;
use crate::TrendError;

pub trait TelemetrySource {
    /// Samples of `msid` between `start` and `stop` (inclusive, seconds).
    /// `stop = None` reads through the end of the available data.
    fn fetch(&self, msid: &str, start: f64, stop: Option<f64>) -> Result<TimeSeries, TrendError>;
}

#[derive(Debug, Deserialize)]
struct ArchiveRow {
    time: String,
    value: f64,
}

/// Directory of per-MSID CSV files (`<msid>.csv`, header `time,value`).
///
/// The `time` column holds CXC seconds or a `YYYY:DOY:HH:MM:SS` date.
pub struct CsvArchive<'a> {
    root: PathBuf,
    conv: &'a dyn TimeConversion,
}

impl<'a> CsvArchive<'a> {
    pub fn new(root: impl Into<PathBuf>, conv: &'a dyn TimeConversion) -> Self {
        Self {
            root: root.into(),
            conv,
        }
    }

    pub fn path_for(&self, msid: &str) -> PathBuf {
        self.root.join(format!("{}.csv", msid.to_ascii_lowercase()))
    }

    fn read_rows(&self, path: &Path) -> Result<Vec<(f64, f64)>, TrendError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| TrendError::Archive(format!("{}: {}", path.display(), e)))?;
        let mut rows = Vec::new();
        for (idx, record) in reader.deserialize::<ArchiveRow>().enumerate() {
            // Header occupies line 1.
            let line = idx + 2;
            let row = record.map_err(|e| {
                TrendError::Archive(format!("{} line {}: {}", path.display(), line, e))
            })?;
            let t = self.conv.to_secs(&row.time).map_err(|e| {
                TrendError::Archive(format!("{} line {}: {}", path.display(), line, e))
            })?;
            rows.push((t, row.value));
        }
        Ok(rows)
    }
}

impl TelemetrySource for CsvArchive<'_> {
    fn fetch(&self, msid: &str, start: f64, stop: Option<f64>) -> Result<TimeSeries, TrendError> {
        let path = self.path_for(msid);
        if !path.is_file() {
            return Err(TrendError::MissingTelemetry(format!(
                "{} ({} not found)",
                msid,
                path.display()
            )));
        }
        let mut rows = self.read_rows(&path)?;
        let total = rows.len();
        rows.retain(|&(t, _)| t >= start && stop.map_or(true, |s| t <= s));
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        if rows.is_empty() {
            return Err(TrendError::MissingTelemetry(format!(
                "{} between {} and {}",
                msid,
                self.conv.to_date(start),
                stop.map_or_else(|| "end of archive".to_string(), |s| self.conv.to_date(s))
            )));
        }
        debug!(
            "Archive {}: {} of {} rows in range",
            path.display(),
            rows.len(),
            total
        );
        let (times, values): (Vec<f64>, Vec<f64>) = rows.into_iter().unzip();
        TimeSeries::new(times, values)
    }
}
