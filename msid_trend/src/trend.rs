//! Long-term trending: monthly maxima and a polynomial trend over a trailing window.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::series::{KeepMask, TimeSeries};
use crate::time::TimeConversion;
use crate::{TrendError, SECONDS_PER_YEAR};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendSettings {
    /// Standard deviations added to the fitted constant term.
    pub num_std_dev: f64,
    pub remove_outliers: bool,
    pub max_outlier_std_dev: f64,
    /// Trailing monthly entries used for the fit.
    pub trend_months: usize,
    pub poly_degree: usize,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            num_std_dev: 0.0,
            remove_outliers: true,
            max_outlier_std_dev: 5.0,
            trend_months: 36,
            poly_degree: 1,
        }
    }
}

impl TrendSettings {
    fn validate(&self) -> Result<(), TrendError> {
        if self.trend_months == 0 {
            return Err(TrendError::InvalidParameter("trend_months must be > 0".into()));
        }
        if self.remove_outliers && !(self.max_outlier_std_dev > 0.0) {
            return Err(TrendError::InvalidParameter(
                "max_outlier_std_dev must be > 0".into(),
            ));
        }
        if !self.num_std_dev.is_finite() {
            return Err(TrendError::InvalidParameter("num_std_dev must be finite".into()));
        }
        Ok(())
    }
}

/// Per-calendar-month statistics; months without samples are omitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    /// Month midpoints in seconds.
    pub times: Vec<f64>,
    pub maxes: Vec<f64>,
    pub mins: Vec<f64>,
    pub means: Vec<f64>,
    pub counts: Vec<usize>,
}

impl MonthlyAggregate {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Last `months` entries (all of them if there are fewer).
    pub fn tail(&self, months: usize) -> MonthlyAggregate {
        let from = self.len().saturating_sub(months);
        MonthlyAggregate {
            times: self.times[from..].to_vec(),
            maxes: self.maxes[from..].to_vec(),
            mins: self.mins[from..].to_vec(),
            means: self.means[from..].to_vec(),
            counts: self.counts[from..].to_vec(),
        }
    }

    fn push(&mut self, time: f64, values: &[f64]) {
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        self.times.push(time);
        self.maxes.push(max);
        self.mins.push(min);
        self.means.push(mean);
        self.counts.push(values.len());
    }
}

fn month_start(year: i32, month: u32) -> Result<NaiveDateTime, TrendError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            TrendError::InvalidParameter(format!("{:04}-{:02} is outside the calendar", year, month))
        })
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Reduce a time-ordered series to one entry per calendar month.
///
/// Every timestamp, plus the month after the last one, must map to a calendar date.
pub fn aggregate_monthly(
    series: &TimeSeries,
    conv: &dyn TimeConversion,
) -> Result<MonthlyAggregate, TrendError> {
    let mut out = MonthlyAggregate::default();
    let (Some(first), Some(last)) = (series.first_time(), series.last_time()) else {
        return Ok(out);
    };
    let out_of_range = |t: f64| {
        TrendError::InvalidParameter(format!("timestamp {} s is outside the calendar range", t))
    };
    let first_dt = conv.datetime_at(first).map_err(|_| out_of_range(first))?;
    let last_dt = conv.datetime_at(last).map_err(|_| out_of_range(last))?;
    let (ly, lm) = next_month(last_dt.year(), last_dt.month());
    month_start(ly, lm).map_err(|_| out_of_range(last))?;
    let (mut year, mut month) = (first_dt.year(), first_dt.month());
    let times = series.times();
    let values = series.values();
    let mut idx = 0;
    let mut bucket = Vec::new();
    while idx < times.len() {
        let start = conv.secs_at(month_start(year, month)?);
        let (ny, nm) = next_month(year, month);
        let end = conv.secs_at(month_start(ny, nm)?);
        bucket.clear();
        while idx < times.len() && times[idx] < end {
            bucket.push(values[idx]);
            idx += 1;
        }
        if !bucket.is_empty() {
            out.push((start + end) / 2.0, &bucket);
        }
        year = ny;
        month = nm;
    }
    Ok(out)
}

/// Drop samples further than `max_std_dev` standard deviations from the mean.
pub fn remove_outliers(series: &TimeSeries, max_std_dev: f64) -> TimeSeries {
    if series.len() < 3 {
        return series.clone();
    }
    let values = series.values();
    let mean = values.mean().unwrap_or(0.0);
    let std = values.std(0.0);
    if !(std > 0.0) {
        return series.clone();
    }
    let limit = max_std_dev * std;
    let mask = KeepMask::from_array(values.mapv(|v| (v - mean).abs() <= limit));
    series.select(&mask).unwrap_or_else(|_| series.clone())
}

/// Fitted polynomial, coefficients highest power first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    pub coefficients: Vec<f64>,
    pub residual_std: f64,
}

impl TrendFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        polyval(&self.coefficients, x)
    }
}

/// Horner evaluation, coefficients highest power first.
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
}

/// Least-squares polynomial fit, coefficients highest power first.
///
/// Solved in a centred and scaled variable, then expanded back to `x`.
pub fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Result<Vec<f64>, TrendError> {
    if xs.len() != ys.len() {
        return Err(TrendError::ShapeMismatch {
            expected: xs.len(),
            actual: ys.len(),
        });
    }
    let n = xs.len();
    let cols = degree + 1;
    if n < cols {
        return Err(TrendError::InsufficientData(format!(
            "degree {} fit needs {} points, got {}",
            degree, cols, n
        )));
    }
    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return Err(TrendError::Fit("non-finite input".into()));
    }

    let offset = xs.iter().sum::<f64>() / n as f64;
    let mut scale = xs.iter().map(|x| (x - offset).abs()).fold(0.0, f64::max);
    if scale == 0.0 {
        if degree > 0 {
            return Err(TrendError::Fit("all x values are identical".into()));
        }
        scale = 1.0;
    }

    let design = DMatrix::from_fn(n, cols, |i, j| {
        let u = (xs[i] - offset) / scale;
        u.powi((degree - j) as i32)
    });
    let target = DVector::from_column_slice(ys);
    let solution = design
        .svd(true, true)
        .solve(&target, 1e-12)
        .map_err(|e| TrendError::Fit(e.to_string()))?;

    // p(u) with u = (x - offset) / scale, expanded by Horner over polynomials in x.
    let a = 1.0 / scale;
    let b = -offset / scale;
    let mut coeffs: Vec<f64> = vec![0.0];
    for &c in solution.iter() {
        let mut next = vec![0.0; coeffs.len() + 1];
        for (k, &p) in coeffs.iter().enumerate() {
            next[k] += p * a;
            next[k + 1] += p * b;
        }
        if let Some(last) = next.last_mut() {
            *last += c;
        }
        coeffs = next;
    }
    // Leading zero from the seed polynomial.
    coeffs.remove(0);
    Ok(coeffs)
}

/// Monthly maxima trend for one MSID.
#[derive(Clone, Debug)]
pub struct MsidTrend {
    msid: String,
    settings: TrendSettings,
    monthly: MonthlyAggregate,
    outliers_removed: usize,
}

impl MsidTrend {
    pub fn new(
        msid: &str,
        series: &TimeSeries,
        settings: TrendSettings,
        conv: &dyn TimeConversion,
    ) -> Result<Self, TrendError> {
        settings.validate()?;
        if series.is_empty() {
            return Err(TrendError::InsufficientData(format!("{} has no samples", msid)));
        }
        let cleaned = if settings.remove_outliers {
            remove_outliers(series, settings.max_outlier_std_dev)
        } else {
            series.clone()
        };
        let outliers_removed = series.len() - cleaned.len();
        if outliers_removed > 0 {
            info!(
                "{}: removed {} outliers beyond {} sigma",
                msid, outliers_removed, settings.max_outlier_std_dev
            );
        }
        let monthly = aggregate_monthly(&cleaned, conv)?;
        debug!("{}: {} monthly entries", msid, monthly.len());
        Ok(Self {
            msid: msid.to_string(),
            settings,
            monthly,
            outliers_removed,
        })
    }

    pub fn msid(&self) -> &str {
        &self.msid
    }

    pub fn settings(&self) -> &TrendSettings {
        &self.settings
    }

    pub fn outliers_removed(&self) -> usize {
        self.outliers_removed
    }

    pub fn monthly(&self) -> &MonthlyAggregate {
        &self.monthly
    }

    pub fn monthly_maxes(&self) -> &[f64] {
        &self.monthly.maxes
    }

    pub fn monthly_times(&self) -> &[f64] {
        &self.monthly.times
    }

    /// Trailing `trend_months` entries.
    pub fn window(&self) -> MonthlyAggregate {
        self.monthly.tail(self.settings.trend_months)
    }

    /// Fit the trailing window of a monthly series aligned with `monthly_times`.
    pub fn fit(&self, monthly_values: &[f64]) -> Result<TrendFit, TrendError> {
        if monthly_values.len() != self.monthly.len() {
            return Err(TrendError::ShapeMismatch {
                expected: self.monthly.len(),
                actual: monthly_values.len(),
            });
        }
        let from = self.monthly.len().saturating_sub(self.settings.trend_months);
        let xs = &self.monthly.times[from..];
        let ys = &monthly_values[from..];
        let mut coefficients = polyfit(xs, ys, self.settings.poly_degree)?;
        let ssr: f64 = xs
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| (y - polyval(&coefficients, x)).powi(2))
            .sum();
        let residual_std = (ssr / xs.len() as f64).sqrt();
        if let Some(constant) = coefficients.last_mut() {
            *constant += self.settings.num_std_dev * residual_std;
        }
        info!(
            "{}: degree {} trend over {} months, residual std {:.3}",
            self.msid,
            self.settings.poly_degree,
            xs.len(),
            residual_std
        );
        Ok(TrendFit {
            coefficients,
            residual_std,
        })
    }
}

/// Fitted line sampled from the window start out past the window end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Projection {
    pub fn offset(&self, delta: f64) -> Vec<f64> {
        self.ys.iter().map(|y| y + delta).collect()
    }
}

/// Evaluate `fit` at `points` evenly spaced x from `window_start` through
/// `window_end + years` years.
pub fn project(
    fit: &TrendFit,
    window_start: f64,
    window_end: f64,
    years: f64,
    points: usize,
) -> Projection {
    let xs = Array1::linspace(window_start, window_end + years * SECONDS_PER_YEAR, points);
    let ys = xs.mapv(|x| fit.evaluate(x));
    Projection {
        xs: xs.to_vec(),
        ys: ys.to_vec(),
    }
}

/// First sampled x whose y exceeds `limit`.
pub fn first_exceedance(xs: &[f64], ys: &[f64], limit: f64) -> Option<f64> {
    xs.iter()
        .zip(ys.iter())
        .find(|(_, &y)| y > limit)
        .map(|(&x, _)| x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::CxcTime;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_polyval_horner() {
        // 2x^2 - 3x + 1
        assert_eq!(polyval(&[2.0, -3.0, 1.0], 2.0), 3.0);
        assert_eq!(polyval(&[], 5.0), 0.0);
    }

    #[test]
    fn test_polyfit_recovers_line_at_large_x() {
        let xs: Vec<f64> = (0..36).map(|i| 5.0e8 + i as f64 * 2.6e6).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 1.5e-8 * x - 3.0).collect();
        let coeffs = polyfit(&xs, &ys, 1).unwrap();
        assert_eq!(coeffs.len(), 2);
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            assert!(close(polyval(&coeffs, x), y, 1e-6));
        }
        assert!(close(coeffs[0], 1.5e-8, 1e-14));
    }

    #[test]
    fn test_polyfit_recovers_quadratic() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 - 5.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 0.5 * x * x - 2.0 * x + 7.0).collect();
        let coeffs = polyfit(&xs, &ys, 2).unwrap();
        assert!(close(coeffs[0], 0.5, 1e-9));
        assert!(close(coeffs[1], -2.0, 1e-9));
        assert!(close(coeffs[2], 7.0, 1e-9));
    }

    #[test]
    fn test_polyfit_rejects_underdetermined() {
        assert!(matches!(
            polyfit(&[1.0], &[2.0], 1),
            Err(TrendError::InsufficientData(_))
        ));
        assert!(polyfit(&[1.0, 1.0], &[2.0, 3.0], 1).is_err());
        assert!(polyfit(&[1.0, 2.0], &[2.0], 1).is_err());
    }

    #[test]
    fn test_monthly_aggregation_rejects_timestamps_past_calendar() {
        let conv = CxcTime::new();
        let series = TimeSeries::new(vec![6.0e8, 1.0e13], vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            aggregate_monthly(&series, &conv),
            Err(TrendError::InvalidParameter(_))
        ));
        let settings = TrendSettings {
            remove_outliers: false,
            ..TrendSettings::default()
        };
        assert!(matches!(
            MsidTrend::new("far", &series, settings, &conv),
            Err(TrendError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_monthly_aggregation_skips_empty_months() {
        let conv = CxcTime::new();
        let dates = [
            ("2016:001:00:00:00", 1.0),
            ("2016:015:00:00:00", 5.0),
            ("2016:031:23:59:59", 3.0),
            // February has no data
            ("2016:061:00:00:00", 2.0),
            ("2016:092:12:00:00", 9.0),
        ];
        let times: Vec<f64> = dates.iter().map(|(d, _)| conv.to_secs(d).unwrap()).collect();
        let values: Vec<f64> = dates.iter().map(|(_, v)| *v).collect();
        let series = TimeSeries::new(times, values).unwrap();
        let monthly = aggregate_monthly(&series, &conv).unwrap();
        assert_eq!(monthly.maxes, vec![5.0, 2.0, 9.0]);
        assert_eq!(monthly.mins, vec![1.0, 2.0, 9.0]);
        assert_eq!(monthly.counts, vec![3, 1, 1]);
        assert!(close(monthly.means[0], 3.0, 1e-12));
        let jan_start = conv.to_secs("2016:001").unwrap();
        let feb_start = conv.to_secs("2016:032").unwrap();
        assert!(close(monthly.times[0], (jan_start + feb_start) / 2.0, 1e-6));
    }

    #[test]
    fn test_outliers_removed_beyond_limit() {
        let mut values = vec![10.0; 50];
        values[25] = 1000.0;
        let times: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let series = TimeSeries::new(times, values).unwrap();
        let cleaned = remove_outliers(&series, 5.0);
        assert_eq!(cleaned.len(), 49);
        assert_eq!(cleaned.max_value(), Some(10.0));
        let constant = TimeSeries::new(vec![0.0, 1.0, 2.0], vec![4.0; 3]).unwrap();
        assert_eq!(remove_outliers(&constant, 1.0).len(), 3);
    }

    fn monthly_series(conv: &CxcTime, months: usize, slope_per_month: f64) -> TimeSeries {
        let mut times = Vec::new();
        let mut values = Vec::new();
        for m in 0..months {
            let year = 2010 + (m / 12) as i32;
            let month = (m % 12) as u32 + 1;
            let start = conv.secs_at(month_start(year, month).unwrap());
            for day in 0..5 {
                times.push(start + day as f64 * 86_400.0 * 5.0);
                values.push(20.0 + m as f64 * slope_per_month + day as f64 * 0.1);
            }
        }
        TimeSeries::new(times, values).unwrap()
    }

    #[test]
    fn test_window_and_fit_use_trailing_months() {
        let conv = CxcTime::new();
        let series = monthly_series(&conv, 48, 0.25);
        let settings = TrendSettings {
            trend_months: 36,
            ..TrendSettings::default()
        };
        let trend = MsidTrend::new("TEST", &series, settings, &conv).unwrap();
        assert_eq!(trend.monthly_maxes().len(), 48);
        let window = trend.window();
        assert_eq!(window.len(), 36);
        assert_eq!(window.times[0], trend.monthly_times()[12]);
        assert!(close(window.maxes[0], 20.0 + 12.0 * 0.25 + 0.4, 1e-9));

        let fit = trend.fit(trend.monthly_maxes()).unwrap();
        // Month midpoints are not evenly spaced, so allow a small residual.
        assert!(fit.residual_std < 0.05, "residual {}", fit.residual_std);
        let last = *trend.monthly_times().last().unwrap();
        let expected_last = *trend.monthly_maxes().last().unwrap();
        assert!(close(fit.evaluate(last), expected_last, 0.1));
    }

    #[test]
    fn test_num_std_dev_shifts_constant_term() {
        let conv = CxcTime::new();
        let series = monthly_series(&conv, 24, 0.1);
        let mut noisy = series.values().to_vec();
        for (i, v) in noisy.iter_mut().enumerate() {
            if i % 2 == 0 {
                *v += 1.0;
            }
        }
        let series = TimeSeries::new(series.times().to_vec(), noisy).unwrap();
        let base = MsidTrend::new("T", &series, TrendSettings::default(), &conv).unwrap();
        let shifted_settings = TrendSettings {
            num_std_dev: 2.0,
            ..TrendSettings::default()
        };
        let shifted = MsidTrend::new("T", &series, shifted_settings, &conv).unwrap();
        let f0 = base.fit(base.monthly_maxes()).unwrap();
        let f2 = shifted.fit(shifted.monthly_maxes()).unwrap();
        let x = base.monthly_times()[5];
        assert!(close(f2.evaluate(x) - f0.evaluate(x), 2.0 * f0.residual_std, 1e-6));
        assert!(base.fit(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let conv = CxcTime::new();
        let series = TimeSeries::new(vec![0.0, 1.0], vec![1.0, 2.0]).unwrap();
        let bad = TrendSettings {
            trend_months: 0,
            ..TrendSettings::default()
        };
        assert!(MsidTrend::new("T", &series, bad, &conv).is_err());
        assert!(MsidTrend::new("T", &TimeSeries::empty(), TrendSettings::default(), &conv).is_err());
    }

    #[test]
    fn test_project_spans_window_plus_years() {
        let fit = TrendFit {
            coefficients: vec![1.0e-7, 0.0],
            residual_std: 0.5,
        };
        let projection = project(&fit, 1.0e8, 2.0e8, 12.0, 10);
        assert_eq!(projection.xs.len(), 10);
        assert_eq!(projection.xs[0], 1.0e8);
        assert!(close(projection.xs[9], 2.0e8 + 12.0 * SECONDS_PER_YEAR, 1e-3));
        assert!(close(projection.ys[0], 10.0, 1e-9));
        let band = projection.offset(1.0);
        assert!(close(band[0], 11.0, 1e-9));
    }

    #[test]
    fn test_first_exceedance() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [10.0, 30.0, 38.0, 40.0];
        assert_eq!(first_exceedance(&xs, &ys, 37.5), Some(3.0));
        assert_eq!(first_exceedance(&xs, &ys, 50.0), None);
    }
}
