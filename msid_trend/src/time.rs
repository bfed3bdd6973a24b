//! Date conversion between archive date strings and CXC seconds.
//!
//! CXC seconds count TT seconds since 1998-01-01T00:00:00 TT. Date strings use the
//! day-of-year form `YYYY:DOY:HH:MM:SS.fff`, with trailing fields optional.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::TrendError;

/// Unix timestamp of 1998-01-01T00:00:00Z.
const CXC_EPOCH_UNIX: i64 = 883_612_800;
/// TT - UTC at the CXC epoch.
const TT_MINUS_UTC_AT_EPOCH: f64 = 63.184;
/// UTC instants (unix seconds) at which a leap second had just been inserted.
const LEAP_SECONDS_UNIX: [i64; 6] = [
    915_148_800,   // 1999-01-01
    1_136_073_600, // 2006-01-01
    1_230_768_000, // 2009-01-01
    1_341_100_800, // 2012-07-01
    1_435_708_800, // 2015-07-01
    1_483_228_800, // 2017-01-01
];

/// Conversion capability injected into everything that turns dates into seconds.
pub trait TimeConversion {
    /// Parse a date string (or bare seconds) into seconds.
    fn to_secs(&self, date: &str) -> Result<f64, TrendError>;
    /// Format seconds as `YYYY:DOY:HH:MM:SS.fff`.
    fn to_date(&self, secs: f64) -> String;
    /// Seconds at a UTC calendar instant.
    fn secs_at(&self, when: NaiveDateTime) -> f64;
    /// UTC calendar instant for seconds. Fails outside the calendar's range.
    fn datetime_at(&self, secs: f64) -> Result<NaiveDateTime, TrendError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CxcTime;

impl CxcTime {
    pub fn new() -> Self {
        Self
    }

    fn leaps_through(unix: f64) -> f64 {
        LEAP_SECONDS_UNIX
            .iter()
            .filter(|&&leap| unix >= leap as f64)
            .count() as f64
    }

    fn parse_date(&self, input: &str) -> Result<f64, TrendError> {
        let invalid = || TrendError::InvalidTime(input.to_string());
        let parts: Vec<&str> = input.split(':').collect();
        if parts.len() < 2 || parts.len() > 5 {
            return Err(invalid());
        }
        let year: i32 = parts[0].parse().map_err(|_| invalid())?;
        let doy: u32 = parts[1].parse().map_err(|_| invalid())?;
        let hour: u32 = match parts.get(2) {
            Some(v) => v.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let minute: u32 = match parts.get(3) {
            Some(v) => v.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let seconds: f64 = match parts.get(4) {
            Some(v) => v.parse().map_err(|_| invalid())?,
            None => 0.0,
        };
        if !(0.0..61.0).contains(&seconds) {
            return Err(invalid());
        }
        let naive = NaiveDate::from_yo_opt(year, doy)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .ok_or_else(invalid)?;
        Ok(self.secs_at(naive) + seconds)
    }
}

impl TimeConversion for CxcTime {
    fn to_secs(&self, date: &str) -> Result<f64, TrendError> {
        let trimmed = date.trim();
        if trimmed.contains(':') {
            return self.parse_date(trimmed);
        }
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| TrendError::InvalidTime(date.to_string()))
    }

    fn to_date(&self, secs: f64) -> String {
        // Half a millisecond so truncation below rounds to the nearest millisecond.
        let Ok(when) = self.datetime_at(secs + 0.0005) else {
            return format!("{:.3}", secs);
        };
        format!(
            "{:04}:{:03}:{:02}:{:02}:{:02}.{:03}",
            when.year(),
            when.ordinal(),
            when.hour(),
            when.minute(),
            when.second(),
            when.nanosecond() / 1_000_000
        )
    }

    fn secs_at(&self, when: NaiveDateTime) -> f64 {
        let utc = when.and_utc();
        let unix = utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 * 1e-9;
        (unix - CXC_EPOCH_UNIX as f64) + TT_MINUS_UTC_AT_EPOCH + Self::leaps_through(unix)
    }

    fn datetime_at(&self, secs: f64) -> Result<NaiveDateTime, TrendError> {
        let base = secs - TT_MINUS_UTC_AT_EPOCH + CXC_EPOCH_UNIX as f64;
        let mut unix = base;
        for _ in 0..2 {
            unix = base - Self::leaps_through(unix);
        }
        let whole = unix.floor();
        let nanos = ((unix - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos)
            .map(|utc| utc.naive_utc())
            .ok_or_else(|| TrendError::InvalidTime(format!("{} s", secs)))
    }
}
