//! Known-bad telemetry intervals, keyed by reference subsystem and category.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::Array1;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::mask::{apply_exclusion, Interval};
use crate::series::KeepMask;
use crate::time::TimeConversion;
use crate::TrendError;

pub trait BadIntervalSource {
    /// Keep flag per timestamp for the given reference subsystem and category.
    fn keep_mask(
        &self,
        times: &Array1<f64>,
        subsystem: &str,
        category: &str,
    ) -> Result<KeepMask, TrendError>;
}

/// Lookup that never discards anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBadIntervals;

impl BadIntervalSource for NoBadIntervals {
    fn keep_mask(
        &self,
        times: &Array1<f64>,
        _subsystem: &str,
        _category: &str,
    ) -> Result<KeepMask, TrendError> {
        Ok(KeepMask::all(times.len()))
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawInterval {
    start: String,
    stop: String,
}

/// Bad intervals loaded from a JSON table of the form
/// `{ "<subsystem>": { "<category>": [ { "start": "...", "stop": "..." } ] } }`.
#[derive(Clone, Debug, Default)]
pub struct BadIntervalTable {
    entries: BTreeMap<String, BTreeMap<String, Vec<Interval>>>,
}

impl BadIntervalTable {
    pub fn load(path: &Path, conv: &dyn TimeConversion) -> Result<Self, TrendError> {
        let text = fs::read_to_string(path)
            .map_err(|e| TrendError::BadIntervals(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text, conv)
    }

    pub fn from_json(text: &str, conv: &dyn TimeConversion) -> Result<Self, TrendError> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<RawInterval>>> =
            serde_json::from_str(text).map_err(|e| TrendError::BadIntervals(e.to_string()))?;
        let mut entries = BTreeMap::new();
        for (subsystem, categories) in raw {
            let mut parsed = BTreeMap::new();
            for (category, intervals) in categories {
                let mut list = Vec::with_capacity(intervals.len());
                for item in intervals {
                    list.push(Interval::new(
                        conv.to_secs(&item.start)?,
                        conv.to_secs(&item.stop)?,
                    ));
                }
                parsed.insert(category, list);
            }
            entries.insert(subsystem.to_ascii_lowercase(), parsed);
        }
        Ok(Self { entries })
    }

    pub fn intervals(&self, subsystem: &str, category: &str) -> Option<&[Interval]> {
        self.entries
            .get(&subsystem.to_ascii_lowercase())
            .and_then(|categories| categories.get(category))
            .map(Vec::as_slice)
    }
}

impl BadIntervalSource for BadIntervalTable {
    fn keep_mask(
        &self,
        times: &Array1<f64>,
        subsystem: &str,
        category: &str,
    ) -> Result<KeepMask, TrendError> {
        let Some(intervals) = self.intervals(subsystem, category) else {
            warn!(
                "No bad intervals listed for {}/{}; keeping all samples",
                subsystem, category
            );
            return Ok(KeepMask::all(times.len()));
        };
        let mut keep = KeepMask::all(times.len());
        for interval in intervals {
            keep = apply_exclusion(times, &keep, *interval)?;
        }
        debug!(
            "Bad-interval lookup {}/{}: {} of {} samples kept",
            subsystem,
            category,
            keep.kept(),
            keep.len()
        );
        Ok(keep)
    }
}
