//! Year tick positions and labels for the trend chart's time axis.

use serde::Serialize;

use crate::time::TimeConversion;
use crate::TrendError;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct YearTick {
    pub year: i32,
    /// Seconds at `YYYY:001:00:00:00`.
    pub secs: f64,
    /// Empty when blanked to avoid crowding.
    pub label: String,
}

/// Blank every other label (indices 1, 3, 5, ... short of the last one), then blank
/// the last label too when it ends in an odd digit.
pub fn blank_alternate_labels(labels: &mut [String]) {
    let last = labels.len().saturating_sub(1);
    for label in labels.iter_mut().take(last).skip(1).step_by(2) {
        label.clear();
    }
    if let Some(final_label) = labels.last_mut() {
        let odd = final_label
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .is_some_and(|d| d % 2 == 1);
        if odd {
            final_label.clear();
        }
    }
}

/// One tick per year start in `first_year..end_year`.
pub fn year_ticks(
    conv: &dyn TimeConversion,
    first_year: i32,
    end_year: i32,
) -> Result<Vec<YearTick>, TrendError> {
    if first_year >= end_year {
        return Err(TrendError::InvalidParameter(format!(
            "year range {}..{} is empty",
            first_year, end_year
        )));
    }
    let mut ticks = Vec::with_capacity((end_year - first_year) as usize);
    let mut labels = Vec::with_capacity(ticks.capacity());
    for year in first_year..end_year {
        let date = format!("{}:001:00:00:00", year);
        ticks.push(YearTick {
            year,
            secs: conv.to_secs(&date)?,
            label: String::new(),
        });
        labels.push(date[..4].to_string());
    }
    blank_alternate_labels(&mut labels);
    for (tick, label) in ticks.iter_mut().zip(labels) {
        tick.label = label;
    }
    Ok(ticks)
}
