use std::fs;

use msid_trend::{
    run_quicklook, run_trend, BadIntervalTable, CsvArchive, CxcTime, IntervalSpec, NoBadIntervals,
    TelemetrySource, TimeConversion, TimeSeries, TrendError, TrendScenario, SECONDS_PER_DAY,
    SECONDS_PER_YEAR,
};

const SPIKE: f64 = 100.0;

struct MemorySource {
    series: TimeSeries,
}

impl TelemetrySource for MemorySource {
    fn fetch(&self, msid: &str, start: f64, stop: Option<f64>) -> Result<TimeSeries, TrendError> {
        let span = self.series.span(start, stop.unwrap_or(f64::INFINITY));
        if span.is_empty() {
            return Err(TrendError::MissingTelemetry(msid.to_string()));
        }
        Ok(span)
    }
}

/// Six-hourly samples from 2010 through 2016, offset three hours from midnight:
/// 20 C plus 1 C/year drift and a seasonal swing, with a 100 C spike during
/// 2015:336-341.
fn synthetic(conv: &CxcTime) -> TimeSeries {
    let start = conv.to_secs("2010:001").unwrap();
    let stop = conv.to_secs("2017:001").unwrap();
    let spike_start = conv.to_secs("2015:336").unwrap();
    let spike_stop = conv.to_secs("2015:341").unwrap();
    let mut times = Vec::new();
    let mut values = Vec::new();
    let mut t = start + 3.0 * 3600.0;
    while t < stop {
        let years = (t - start) / SECONDS_PER_YEAR;
        let mut value = 20.0 + years + 3.0 * (years * std::f64::consts::TAU).sin();
        if t > spike_start && t < spike_stop {
            value = SPIKE;
        }
        times.push(t);
        values.push(value);
        t += 6.0 * 3600.0;
    }
    TimeSeries::new(times, values).unwrap()
}

fn scenario() -> TrendScenario {
    let mut scenario = TrendScenario::default();
    scenario.trend.remove_outliers = false;
    scenario.bad_interval_subsystem = None;
    scenario
}

#[test]
fn manual_exclusion_removes_spike_before_trending() {
    let conv = CxcTime::new();
    let source = MemorySource {
        series: synthetic(&conv),
    };
    let report = run_trend(&scenario(), &source, &NoBadIntervals, &conv).unwrap();

    // Five days at four samples a day.
    assert_eq!(report.total_samples - report.kept_samples(), 20);
    assert!(report.masked.max_value().unwrap() < 30.0);

    assert_eq!(report.monthly_window.len(), 36);
    assert!(report.monthly_window.maxes.iter().all(|&m| m < 30.0));

    // About 1 C/year.
    let slope_per_year = report.fit.coefficients[0] * SECONDS_PER_YEAR;
    assert!((slope_per_year - 1.0).abs() < 0.5, "slope {}", slope_per_year);

    assert_eq!(report.projection.xs.len(), 10);
    assert_eq!(report.projection.xs[0], report.monthly_window.times[0]);
    let last_month = *report.monthly_window.times.last().unwrap();
    assert!((report.projection.xs[9] - last_month - 12.0 * SECONDS_PER_YEAR).abs() < 1e-3);
    for (band, y) in report.band.iter().zip(report.projection.ys.iter()) {
        assert!((band - y - 2.0 * report.fit.residual_std).abs() < 1e-9);
    }

    assert_eq!(report.ticks.len(), 30);
    assert!(report.first_crossing.is_some());
}

#[test]
fn degenerate_exclusion_keeps_everything() {
    let conv = CxcTime::new();
    let source = MemorySource {
        series: synthetic(&conv),
    };
    let mut scenario = scenario();
    scenario.exclusions = vec![IntervalSpec::new("2015:341", "2015:336")];
    let report = run_trend(&scenario, &source, &NoBadIntervals, &conv).unwrap();
    assert_eq!(report.total_samples, report.kept_samples());
    assert_eq!(report.masked.max_value(), Some(SPIKE));
    assert!(report.monthly_window.maxes.contains(&SPIKE));
}

#[test]
fn archive_and_bad_interval_table_from_disk() {
    let conv = CxcTime::new();
    let dir = tempfile::tempdir().unwrap();
    let archive_dir = dir.path().join("archive");
    fs::create_dir_all(&archive_dir).unwrap();

    let series = synthetic(&conv);
    let mut csv = String::from("time,value\n");
    for (t, v) in series.iter() {
        csv.push_str(&format!("{:.3},{}\n", t, v));
    }
    fs::write(archive_dir.join("3flcabpt.csv"), csv).unwrap();

    // The table covers the spike instead of the manual interval.
    let table_path = dir.path().join("bad.json");
    fs::write(
        &table_path,
        r#"{ "1dpamyt": { "daily": [ { "start": "2015:335", "stop": "2015:342" } ] } }"#,
    )
    .unwrap();
    let table = BadIntervalTable::load(&table_path, &conv).unwrap();

    let mut scenario = scenario();
    scenario.bad_interval_subsystem = Some("1dpamyt".to_string());
    scenario.exclusions.clear();

    let archive = CsvArchive::new(&archive_dir, &conv);
    let report = run_trend(&scenario, &archive, &table, &conv).unwrap();
    assert!(report.masked.max_value().unwrap() < 30.0);
    // 2015:335 to 2015:342 is seven days.
    assert_eq!(report.total_samples - report.kept_samples(), 28);
}

#[test]
fn missing_msid_is_fatal() {
    let conv = CxcTime::new();
    let dir = tempfile::tempdir().unwrap();
    let archive = CsvArchive::new(dir.path(), &conv);
    let err = run_trend(&scenario(), &archive, &NoBadIntervals, &conv).unwrap_err();
    assert!(matches!(err, TrendError::MissingTelemetry(_)));
}

#[test]
fn quicklook_reads_from_start_to_end_of_data() {
    let conv = CxcTime::new();
    let source = MemorySource {
        series: synthetic(&conv),
    };
    let series = run_quicklook("3flcabpt", "2016:001", None, &source, &conv).unwrap();
    let start = conv.to_secs("2016:001").unwrap();
    let first = series.first_time().unwrap();
    assert!(first >= start && first < start + 6.0 * 3600.0);
    assert!(series.last_time().unwrap() > start + 360.0 * SECONDS_PER_DAY);

    let bounded = run_quicklook("3flcabpt", "2016:001", Some("2016:002"), &source, &conv).unwrap();
    assert_eq!(bounded.len(), 4);
}
