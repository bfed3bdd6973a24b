//! Fetch → mask → trend → projection, run once per invocation.

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::TelemetrySource;
use crate::axis::{year_ticks, YearTick};
use crate::bad_intervals::BadIntervalSource;
use crate::mask::MaskBuilder;
use crate::scenario::{Limits, TrendScenario};
use crate::series::TimeSeries;
use crate::time::TimeConversion;
use crate::trend::{first_exceedance, project, MonthlyAggregate, MsidTrend, Projection, TrendFit};
use crate::TrendError;

/// Everything the trend chart draws.
#[derive(Clone, Debug, Serialize)]
pub struct TrendReport {
    pub msid: String,
    pub total_samples: usize,
    #[serde(skip)]
    pub masked: TimeSeries,
    /// Trailing monthly entries the fit used.
    pub monthly_window: MonthlyAggregate,
    pub fit: TrendFit,
    pub projection: Projection,
    /// Projection shifted by `band_std_devs` residual standard deviations.
    pub band: Vec<f64>,
    pub band_std_devs: f64,
    pub ticks: Vec<YearTick>,
    pub limits: Limits,
    /// First projected sample above the warning limit.
    pub first_crossing: Option<f64>,
}

impl TrendReport {
    pub fn kept_samples(&self) -> usize {
        self.masked.len()
    }
}

pub fn run_trend(
    scenario: &TrendScenario,
    source: &dyn TelemetrySource,
    bad_intervals: &dyn BadIntervalSource,
    conv: &dyn TimeConversion,
) -> Result<TrendReport, TrendError> {
    scenario.validate()?;
    let start = conv.to_secs(&scenario.start)?;
    let stop = conv.to_secs(&scenario.stop)?;
    let raw = source.fetch(&scenario.msid, start, Some(stop))?;
    info!(
        "Fetched {}: {} samples {} .. {}",
        scenario.msid,
        raw.len(),
        scenario.start,
        scenario.stop
    );

    let mask = MaskBuilder::new(bad_intervals)
        .with_reference(
            scenario.bad_interval_subsystem.as_deref(),
            &scenario.bad_interval_category,
        )
        .exclude_all(scenario.resolve_exclusions(conv)?)
        .build(raw.times())?;
    let masked = raw.select(&mask)?;
    info!(
        "Mask kept {} of {} samples ({} discarded)",
        masked.len(),
        raw.len(),
        raw.len() - masked.len()
    );

    let trend = MsidTrend::new(&scenario.msid, &masked, scenario.trend.clone(), conv)?;
    let window = trend.window();
    let (Some(&window_start), Some(&window_end)) = (window.times.first(), window.times.last())
    else {
        return Err(TrendError::InsufficientData(format!(
            "{} has no monthly maxima",
            scenario.msid
        )));
    };
    let fit = trend.fit(trend.monthly_maxes())?;
    let projection = project(
        &fit,
        window_start,
        window_end,
        scenario.projection_years,
        scenario.projection_points,
    );
    let band = projection.offset(scenario.band_std_devs * fit.residual_std);

    let first_crossing = first_exceedance(&projection.xs, &projection.ys, scenario.limits.warning_high);
    match first_crossing {
        Some(t) => info!(
            "Projected trend passes warning high {} near {}",
            scenario.limits.warning_high,
            conv.to_date(t)
        ),
        None => info!(
            "Projected trend stays below warning high {} through {}",
            scenario.limits.warning_high,
            projection.xs.last().map(|&t| conv.to_date(t)).unwrap_or_default()
        ),
    }

    let ticks = year_ticks(conv, scenario.chart.first_year, scenario.chart.end_year)?;
    if let Some(last) = masked.last_time() {
        if ticks.last().map_or(false, |t| t.secs < last) {
            warn!("Telemetry extends past the last year tick; it will be clipped");
        }
    }

    Ok(TrendReport {
        msid: scenario.msid.clone(),
        total_samples: raw.len(),
        masked,
        monthly_window: window,
        fit,
        projection,
        band,
        band_std_devs: scenario.band_std_devs,
        ticks,
        limits: scenario.limits.clone(),
        first_crossing,
    })
}

/// Raw series for a quick-look plot.
pub fn run_quicklook(
    msid: &str,
    start: &str,
    stop: Option<&str>,
    source: &dyn TelemetrySource,
    conv: &dyn TimeConversion,
) -> Result<TimeSeries, TrendError> {
    let start_secs = conv.to_secs(start)?;
    let stop_secs = stop.map(|s| conv.to_secs(s)).transpose()?;
    let series = source.fetch(msid, start_secs, stop_secs)?;
    info!(
        "Fetched {}: {} samples from {}",
        msid,
        series.len(),
        start
    );
    Ok(series)
}
