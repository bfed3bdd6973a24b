//! Telemetry masking and long-term trend fitting for spacecraft MSIDs.
//!
//! The crate covers the forward-only pipeline behind the trend plots: fetch one MSID
//! from an archive, drop samples that fall in known-bad or manually declared intervals,
//! reduce the survivors to monthly maxima, and fit/extrapolate a polynomial trend.
//! Rendering lives in the CLI crate.

use thiserror::Error;

pub mod archive;
pub mod axis;
pub mod bad_intervals;
pub mod mask;
pub mod pipeline;
pub mod scenario;
pub mod series;
pub mod time;
pub mod trend;

pub use archive::{CsvArchive, TelemetrySource};
pub use axis::{blank_alternate_labels, year_ticks, YearTick};
pub use bad_intervals::{BadIntervalSource, BadIntervalTable, NoBadIntervals};
pub use mask::{apply_exclusion, combine_masks, exclude_intervals, Interval, MaskBuilder};
pub use pipeline::{run_quicklook, run_trend, TrendReport};
pub use scenario::{AnchorPoint, Annotation, ChartConfig, IntervalSpec, Limits, TrendScenario};
pub use series::{KeepMask, TimeSeries};
pub use time::{CxcTime, TimeConversion};
pub use trend::{
    aggregate_monthly, first_exceedance, polyfit, polyval, project, remove_outliers,
    MonthlyAggregate, MsidTrend, Projection, TrendFit, TrendSettings,
};

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const SECONDS_PER_YEAR: f64 = 365.25 * SECONDS_PER_DAY;

#[derive(Error, Debug)]
pub enum TrendError {
    #[error("invalid time '{0}'")]
    InvalidTime(String),
    #[error("length mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("timestamps are not ordered at index {0}")]
    UnorderedTimestamps(usize),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("no telemetry for {0}")]
    MissingTelemetry(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("bad-interval table error: {0}")]
    BadIntervals(String),
    #[error("polynomial fit failed: {0}")]
    Fit(String),
    #[error("configuration error: {0}")]
    Config(String),
}
