//! Run configuration. `TrendScenario::default()` is the 3FLCABPT demonstration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::axis::YearTick;
use crate::mask::Interval;
use crate::time::TimeConversion;
use crate::trend::TrendSettings;
use crate::{TrendError, SECONDS_PER_DAY};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub start: String,
    pub stop: String,
}

impl IntervalSpec {
    pub fn new(start: &str, stop: &str) -> Self {
        Self {
            start: start.to_string(),
            stop: stop.to_string(),
        }
    }

    pub fn resolve(&self, conv: &dyn TimeConversion) -> Result<Interval, TrendError> {
        Ok(Interval::new(conv.to_secs(&self.start)?, conv.to_secs(&self.stop)?))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub caution_high: f64,
    pub warning_high: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            caution_high: 33.0,
            warning_high: 37.5,
        }
    }
}

/// Data coordinate relative to a year tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub tick: usize,
    #[serde(default)]
    pub offset_days: f64,
    pub y: f64,
}

impl AnchorPoint {
    pub fn new(tick: usize, offset_days: f64, y: f64) -> Self {
        Self {
            tick,
            offset_days,
            y,
        }
    }

    /// `None` when the tick index is past the axis.
    pub fn resolve(&self, ticks: &[YearTick]) -> Option<(f64, f64)> {
        ticks
            .get(self.tick)
            .map(|t| (t.secs + self.offset_days * SECONDS_PER_DAY, self.y))
    }
}

/// Text at `text_at` with an arrow to `point`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub text: String,
    pub point: AnchorPoint,
    pub text_at: AnchorPoint,
    #[serde(default = "default_annotation_size")]
    pub font_size: f64,
}

fn default_annotation_size() -> f64 {
    18.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
    /// Defaults to "Example Trend Analysis (<MSID>)".
    pub title: Option<String>,
    pub y_label: String,
    pub y_min: f64,
    pub y_max: f64,
    pub y_step: f64,
    pub first_year: i32,
    pub end_year: i32,
    /// Padding after the last year tick.
    pub x_pad_days: f64,
    /// Limit text offset from the first year tick.
    pub limit_label_offset_days: f64,
    pub title_font_size: f64,
    pub label_font_size: f64,
    pub tick_font_size: f64,
    pub telemetry_color: [u8; 3],
    pub monthly_color: [u8; 3],
    pub trend_color: [u8; 3],
    pub caution_color: [u8; 3],
    pub warning_color: [u8; 3],
    /// Text before the caution value in its limit label.
    pub caution_text: String,
    pub warning_text: String,
    /// Suffix after limit values.
    pub limit_units: String,
    pub annotations: Vec<Annotation>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 800,
            title: None,
            y_label: "Temperature in C".to_string(),
            y_min: -5.0,
            y_max: 45.0,
            y_step: 5.0,
            first_year: 2000,
            end_year: 2030,
            x_pad_days: 10.0,
            limit_label_offset_days: 5.0e6 / SECONDS_PER_DAY,
            title_font_size: 22.0,
            label_font_size: 18.0,
            tick_font_size: 16.0,
            telemetry_color: [102, 153, 255],
            monthly_color: [77, 77, 204],
            trend_color: [0, 0, 255],
            caution_color: [255, 165, 0],
            warning_color: [255, 0, 0],
            caution_text: "Current Caution High (Yellow)".to_string(),
            warning_text: "Current Warning High (Red)".to_string(),
            limit_units: "C".to_string(),
            annotations: vec![
                Annotation {
                    text: "Trendline + 0\u{3c3}".to_string(),
                    point: AnchorPoint::new(24, -220.0, 30.0),
                    text_at: AnchorPoint::new(22, 0.0, 25.0),
                    font_size: 18.0,
                },
                Annotation {
                    text: "Trendline + 2\u{3c3}".to_string(),
                    point: AnchorPoint::new(20, 0.0, 30.0),
                    text_at: AnchorPoint::new(14, 0.0, 30.0),
                    font_size: 18.0,
                },
                Annotation {
                    text: "May Exceed Warning High Limit in 2027".to_string(),
                    point: AnchorPoint::new(26, 300.0, 38.0),
                    text_at: AnchorPoint::new(16, 0.0, 42.0),
                    font_size: 14.0,
                },
                Annotation {
                    text: "Telemetry\n(Light Blue)".to_string(),
                    point: AnchorPoint::new(15, 0.0, 8.0),
                    text_at: AnchorPoint::new(19, 0.0, 7.0),
                    font_size: 18.0,
                },
                Annotation {
                    text: "Monthly Maximum Data\n(Dark Blue Circles)".to_string(),
                    point: AnchorPoint::new(16, 0.0, 20.0),
                    text_at: AnchorPoint::new(18, 0.0, 16.0),
                    font_size: 18.0,
                },
            ],
        }
    }
}

impl ChartConfig {
    pub fn title_for(&self, msid: &str) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Example Trend Analysis ({})", msid.to_ascii_uppercase()))
    }

    /// Label drawn above a limit line, e.g. `Current Caution High (Yellow) = 33.0C`.
    pub fn limit_label(&self, text: &str, value: f64) -> String {
        format!("{} = {:.1}{}", text, value, self.limit_units)
    }

    /// Tick values `y_min, y_min + y_step, ..` up to `y_max`.
    pub fn y_ticks(&self) -> Vec<f64> {
        let mut ticks = Vec::new();
        if !(self.y_step > 0.0) {
            return ticks;
        }
        let mut value = self.y_min;
        while value <= self.y_max + self.y_step * 1e-9 {
            ticks.push(value);
            value += self.y_step;
        }
        ticks
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendScenario {
    pub msid: String,
    pub start: String,
    pub stop: String,
    /// Reference subsystem for the bad-interval lookup; `None` skips it.
    pub bad_interval_subsystem: Option<String>,
    pub bad_interval_category: String,
    /// Additional spans to drop, beyond the bad-interval lookup.
    pub exclusions: Vec<IntervalSpec>,
    pub trend: TrendSettings,
    /// Standard deviations between the trend line and the band line.
    pub band_std_devs: f64,
    pub projection_years: f64,
    pub projection_points: usize,
    pub limits: Limits,
    pub chart: ChartConfig,
}

impl Default for TrendScenario {
    fn default() -> Self {
        Self {
            msid: "3FLCABPT".to_string(),
            start: "2000:001:00:00:00".to_string(),
            stop: "2017:001:23:59:59.999".to_string(),
            bad_interval_subsystem: Some("1dpamyt".to_string()),
            bad_interval_category: "daily".to_string(),
            exclusions: vec![IntervalSpec::new("2015:336:00:00:00", "2015:341:00:00:00")],
            trend: TrendSettings::default(),
            band_std_devs: 2.0,
            projection_years: 12.0,
            projection_points: 10,
            limits: Limits::default(),
            chart: ChartConfig::default(),
        }
    }
}

impl TrendScenario {
    pub fn load(path: &Path) -> Result<Self, TrendError> {
        let text = fs::read_to_string(path)
            .map_err(|e| TrendError::Config(format!("{}: {}", path.display(), e)))?;
        let scenario: TrendScenario = serde_json::from_str(&text)
            .map_err(|e| TrendError::Config(format!("{}: {}", path.display(), e)))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), TrendError> {
        if self.msid.trim().is_empty() {
            return Err(TrendError::Config("msid is empty".into()));
        }
        if self.projection_points < 2 {
            return Err(TrendError::Config("projection_points must be >= 2".into()));
        }
        if !self.projection_years.is_finite() || !self.band_std_devs.is_finite() {
            return Err(TrendError::Config(
                "projection_years and band_std_devs must be finite".into(),
            ));
        }
        if self.chart.first_year >= self.chart.end_year {
            return Err(TrendError::Config(format!(
                "chart years {}..{} are empty",
                self.chart.first_year, self.chart.end_year
            )));
        }
        if !(self.chart.y_min < self.chart.y_max) {
            return Err(TrendError::Config("chart y_min must be below y_max".into()));
        }
        Ok(())
    }

    pub fn resolve_exclusions(
        &self,
        conv: &dyn TimeConversion,
    ) -> Result<Vec<Interval>, TrendError> {
        self.exclusions.iter().map(|spec| spec.resolve(conv)).collect()
    }
}
