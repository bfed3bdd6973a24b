//! Keep-mask construction: manual exclusion intervals folded over a series and
//! combined with the domain bad-interval lookup.

use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bad_intervals::BadIntervalSource;
use crate::series::KeepMask;
use crate::TrendError;

/// Span of time to exclude, open at both ends.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// `start >= end`: the open interval is empty and excludes nothing.
    pub fn is_degenerate(&self) -> bool {
        !(self.start < self.end)
    }

    pub fn contains(&self, t: f64) -> bool {
        t > self.start && t < self.end
    }
}

/// Drop samples strictly inside `interval` from `existing_keep`.
///
/// Samples exactly on either boundary are kept. A degenerate interval leaves the
/// mask unchanged.
pub fn apply_exclusion(
    times: &Array1<f64>,
    existing_keep: &KeepMask,
    interval: Interval,
) -> Result<KeepMask, TrendError> {
    if times.len() != existing_keep.len() {
        return Err(TrendError::ShapeMismatch {
            expected: times.len(),
            actual: existing_keep.len(),
        });
    }
    let keep = Zip::from(times)
        .and(existing_keep.as_array())
        .map_collect(|&t, &keep| keep && !interval.contains(t));
    Ok(KeepMask::from_array(keep))
}

/// Elementwise AND of the domain mask and the exclusion mask.
pub fn combine_masks(
    domain_mask: &KeepMask,
    exclusion_mask: &KeepMask,
) -> Result<KeepMask, TrendError> {
    domain_mask.and(exclusion_mask)
}

/// Fold every interval through [`apply_exclusion`], starting from all-true.
pub fn exclude_intervals(
    times: &Array1<f64>,
    intervals: &[Interval],
) -> Result<KeepMask, TrendError> {
    let mut keep = KeepMask::all(times.len());
    for interval in intervals {
        if interval.is_degenerate() {
            warn!(
                "Exclusion interval {} .. {} is empty (start >= end); it excludes nothing",
                interval.start, interval.end
            );
        }
        let before = keep.kept();
        keep = apply_exclusion(times, &keep, *interval)?;
        debug!(
            "Exclusion {} .. {} removed {} samples",
            interval.start,
            interval.end,
            before - keep.kept()
        );
    }
    Ok(keep)
}

/// Domain bad-interval lookup plus manually declared exclusions.
pub struct MaskBuilder<'a> {
    bad_intervals: &'a dyn BadIntervalSource,
    subsystem: Option<String>,
    category: String,
    exclusions: Vec<Interval>,
}

impl<'a> MaskBuilder<'a> {
    pub fn new(bad_intervals: &'a dyn BadIntervalSource) -> Self {
        Self {
            bad_intervals,
            subsystem: None,
            category: String::new(),
            exclusions: Vec::new(),
        }
    }

    /// Reference subsystem and category handed to the bad-interval lookup.
    pub fn with_reference(mut self, subsystem: Option<&str>, category: &str) -> Self {
        self.subsystem = subsystem.map(str::to_string);
        self.category = category.to_string();
        self
    }

    pub fn exclude(mut self, interval: Interval) -> Self {
        self.exclusions.push(interval);
        self
    }

    pub fn exclude_all<I: IntoIterator<Item = Interval>>(mut self, intervals: I) -> Self {
        self.exclusions.extend(intervals);
        self
    }

    pub fn build(&self, times: &Array1<f64>) -> Result<KeepMask, TrendError> {
        let domain = match self.subsystem.as_deref() {
            Some(subsystem) => self.bad_intervals.keep_mask(times, subsystem, &self.category)?,
            None => KeepMask::all(times.len()),
        };
        let manual = exclude_intervals(times, &self.exclusions)?;
        combine_masks(&domain, &manual)
    }
}
