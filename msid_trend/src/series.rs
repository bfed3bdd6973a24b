//! Sample containers: a time-ordered series and the boolean mask that filters it.

use ndarray::{Array1, Zip};

use crate::TrendError;

/// One MSID's samples: parallel, time-ordered times (seconds) and values.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    times: Array1<f64>,
    values: Array1<f64>,
}

impl TimeSeries {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self, TrendError> {
        if times.len() != values.len() {
            return Err(TrendError::ShapeMismatch {
                expected: times.len(),
                actual: values.len(),
            });
        }
        if let Some(idx) = times.iter().position(|t| !t.is_finite()) {
            return Err(TrendError::InvalidParameter(format!(
                "non-finite timestamp at index {}",
                idx
            )));
        }
        if let Some(idx) = times.windows(2).position(|w| w[1] < w[0]) {
            return Err(TrendError::UnorderedTimestamps(idx + 1));
        }
        Ok(Self {
            times: Array1::from_vec(times),
            values: Array1::from_vec(values),
        })
    }

    pub fn empty() -> Self {
        Self {
            times: Array1::zeros(0),
            values: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn first_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Samples whose mask entry is true, order preserved.
    pub fn select(&self, mask: &KeepMask) -> Result<TimeSeries, TrendError> {
        if mask.len() != self.len() {
            return Err(TrendError::ShapeMismatch {
                expected: self.len(),
                actual: mask.len(),
            });
        }
        let kept = mask.kept();
        let mut times = Vec::with_capacity(kept);
        let mut values = Vec::with_capacity(kept);
        for ((&t, &v), &keep) in self.times.iter().zip(self.values.iter()).zip(mask.0.iter()) {
            if keep {
                times.push(t);
                values.push(v);
            }
        }
        Ok(Self {
            times: Array1::from_vec(times),
            values: Array1::from_vec(values),
        })
    }

    /// Samples with `start <= t <= stop`.
    pub fn span(&self, start: f64, stop: f64) -> TimeSeries {
        let mask = KeepMask(self.times.mapv(|t| t >= start && t <= stop));
        // Lengths match by construction.
        self.select(&mask).unwrap_or_else(|_| Self::empty())
    }

    pub fn max_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn min_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }
}

/// Boolean keep/discard flag per sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepMask(Array1<bool>);

impl KeepMask {
    pub fn all(len: usize) -> Self {
        Self(Array1::from_elem(len, true))
    }

    pub fn from_vec(flags: Vec<bool>) -> Self {
        Self(Array1::from_vec(flags))
    }

    pub fn from_array(flags: Array1<bool>) -> Self {
        Self(flags)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of samples kept.
    pub fn kept(&self) -> usize {
        self.0.iter().filter(|&&k| k).count()
    }

    pub fn get(&self, idx: usize) -> Option<bool> {
        self.0.get(idx).copied()
    }

    pub fn as_array(&self) -> &Array1<bool> {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<bool> {
        self.0.to_vec()
    }

    /// Elementwise AND.
    pub fn and(&self, other: &KeepMask) -> Result<KeepMask, TrendError> {
        if self.len() != other.len() {
            return Err(TrendError::ShapeMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(KeepMask(
            Zip::from(&self.0)
                .and(&other.0)
                .map_collect(|&a, &b| a && b),
        ))
    }
}
