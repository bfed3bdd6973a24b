use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use msid_trend::{
    run_quicklook, run_trend, BadIntervalSource, BadIntervalTable, CsvArchive, CxcTime,
    NoBadIntervals, TimeConversion, TrendReport, TrendScenario,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod chart;

use chart::{render_quicklook_guard, render_trend_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "MSID telemetry trend plots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mask one MSID, fit its monthly-maxima trend and plot the projection
    Trend(TrendArgs),
    /// Fetch one MSID and plot the raw telemetry
    Plot(PlotArgs),
}

#[derive(Parser, Debug)]
struct TrendArgs {
    /// Archive directory holding <msid>.csv files
    #[arg(long, value_hint = ValueHint::DirPath)]
    archive: PathBuf,

    /// Bad-interval table (JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    bad_intervals: Option<PathBuf>,

    /// Scenario JSON (defaults to the 3FLCABPT example)
    #[arg(long, value_hint = ValueHint::FilePath)]
    scenario: Option<PathBuf>,

    /// Override the scenario MSID
    #[arg(long)]
    msid: Option<String>,

    /// Override the start time (YYYY:DOY[:HH:MM:SS])
    #[arg(long)]
    start: Option<String>,

    /// Override the stop time (YYYY:DOY[:HH:MM:SS])
    #[arg(long)]
    stop: Option<String>,

    /// Override the number of trailing months in the fit
    #[arg(long)]
    trend_months: Option<usize>,

    /// Output PNG path (defaults to <msid>_trend.png)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Write monthly maxima and projection rows as CSV (`-` for stdout)
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Write the fit summary as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct PlotArgs {
    /// MSID to fetch
    msid: String,

    /// Archive directory holding <msid>.csv files
    #[arg(long, value_hint = ValueHint::DirPath)]
    archive: PathBuf,

    /// Start time (YYYY:DOY[:HH:MM:SS])
    #[arg(long, default_value = "2001:001")]
    start: String,

    /// Stop time; defaults to the end of the archive
    #[arg(long)]
    stop: Option<String>,

    /// Output PNG path (defaults to <msid>.png)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Trend(args) => args.verbose,
        Command::Plot(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Trend(args) => handle_trend(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn load_scenario(args: &TrendArgs) -> Result<TrendScenario> {
    let mut scenario = match args.scenario.as_ref() {
        Some(path) => TrendScenario::load(path)
            .with_context(|| format!("failed to load scenario {}", path.display()))?,
        None => TrendScenario::default(),
    };
    if let Some(msid) = args.msid.as_ref() {
        scenario.msid = msid.clone();
    }
    if let Some(start) = args.start.as_ref() {
        scenario.start = start.clone();
    }
    if let Some(stop) = args.stop.as_ref() {
        scenario.stop = stop.clone();
    }
    if let Some(months) = args.trend_months {
        if months == 0 {
            return Err(anyhow!("--trend-months must be > 0"));
        }
        scenario.trend.trend_months = months;
    }
    scenario.validate()?;
    Ok(scenario)
}

fn handle_trend(args: TrendArgs) -> Result<()> {
    let scenario = load_scenario(&args)?;
    let conv = CxcTime::new();

    let table = match args.bad_intervals.as_ref() {
        Some(path) => Some(
            BadIntervalTable::load(path, &conv)
                .with_context(|| format!("failed to load bad intervals {}", path.display()))?,
        ),
        None => {
            if let Some(subsystem) = scenario.bad_interval_subsystem.as_ref() {
                warn!(
                    "No bad-interval table given; {}/{} lookup keeps every sample",
                    subsystem, scenario.bad_interval_category
                );
            }
            None
        }
    };
    let bad_intervals: &dyn BadIntervalSource = match table.as_ref() {
        Some(table) => table,
        None => &NoBadIntervals,
    };

    let archive = CsvArchive::new(&args.archive, &conv);
    let t_run = Instant::now();
    let report = run_trend(&scenario, &archive, bad_intervals, &conv)
        .with_context(|| format!("trend run failed for {}", scenario.msid))?;
    if args.profile || args.verbose {
        info!(
            "Trend stage: {:.1} ms ({} samples)",
            t_run.elapsed().as_secs_f64() * 1000.0,
            report.total_samples
        );
    }
    info!(
        "Trend computed: {} monthly maxima, residual std {:.3}",
        report.monthly_window.len(),
        report.fit.residual_std
    );

    if let Some(path) = args.csv.as_ref() {
        if path.as_os_str() == "-" {
            let stdout = io::stdout();
            write_trend_rows(&report, &conv, &mut csv::Writer::from_writer(stdout.lock()))?;
        } else {
            ensure_parent(path)?;
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_trend_rows(&report, &conv, &mut csv::Writer::from_writer(file))?;
            info!("Wrote trend CSV: {}", path.display());
        }
    }

    if let Some(path) = args.report.as_ref() {
        let text = serde_json::to_string_pretty(&report)?;
        ensure_parent(path)?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote trend report: {}", path.display());
    }

    if args.no_plot {
        return Ok(());
    }

    let t_plot = Instant::now();
    let png_path = args
        .png
        .clone()
        .unwrap_or_else(|| default_plot_path(&scenario.msid, "_trend"));
    let outputs = std::iter::once((png_path, ChartKind::Png))
        .chain(args.svg.clone().map(|path| (path, ChartKind::Svg)));
    for (path, kind) in outputs {
        ensure_parent(&path)?;
        if let Err(err) = render_trend_guard(&report, &scenario, &path, kind) {
            warn!("Skipping plot render ({}): {}", path.display(), err);
        } else {
            info!("Wrote plot: {}", path.display());
        }
    }
    if args.profile || args.verbose {
        info!(
            "Plot stage: {:.1} ms",
            t_plot.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<()> {
    let conv = CxcTime::new();
    let archive = CsvArchive::new(&args.archive, &conv);
    let series = run_quicklook(&args.msid, &args.start, args.stop.as_deref(), &archive, &conv)
        .with_context(|| format!("failed to fetch {}", args.msid))?;

    let png_path = args
        .png
        .clone()
        .unwrap_or_else(|| default_plot_path(&args.msid, ""));
    let outputs = std::iter::once((png_path, ChartKind::Png))
        .chain(args.svg.clone().map(|path| (path, ChartKind::Svg)));
    for (path, kind) in outputs {
        if let Err(err) = render_quicklook_guard(&args.msid, &series, &conv, &path, kind) {
            warn!("Skipping plot render ({}): {}", path.display(), err);
        } else {
            info!("Wrote plot: {}", path.display());
        }
    }
    Ok(())
}

fn default_plot_path(msid: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}.png", msid.to_ascii_lowercase(), suffix))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "".into())
}

fn write_trend_rows<W: Write>(
    report: &TrendReport,
    conv: &dyn TimeConversion,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "kind",
        "time_s",
        "date",
        "monthly_max",
        "monthly_min",
        "monthly_mean",
        "samples",
        "trend",
        "band",
    ])?;

    let band_offset = report.band_std_devs * report.fit.residual_std;
    let window = &report.monthly_window;
    for idx in 0..window.len() {
        let t = window.times[idx];
        let trend = report.fit.evaluate(t);
        writer.write_record([
            "monthly".to_string(),
            format!("{:.3}", t),
            conv.to_date(t),
            fmt_opt(Some(window.maxes[idx])),
            fmt_opt(Some(window.mins[idx])),
            fmt_opt(Some(window.means[idx])),
            window.counts[idx].to_string(),
            fmt_opt(Some(trend)),
            fmt_opt(Some(trend + band_offset)),
        ])?;
    }

    for ((&t, &y), &band) in report
        .projection
        .xs
        .iter()
        .zip(report.projection.ys.iter())
        .zip(report.band.iter())
    {
        writer.write_record([
            "projection".to_string(),
            format!("{:.3}", t),
            conv.to_date(t),
            fmt_opt(None),
            fmt_opt(None),
            fmt_opt(None),
            String::new(),
            fmt_opt(Some(y)),
            fmt_opt(Some(band)),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plot_path() {
        assert_eq!(
            default_plot_path("3FLCABPT", "_trend"),
            PathBuf::from("3flcabpt_trend.png")
        );
        assert_eq!(default_plot_path("aacccdpt", ""), PathBuf::from("aacccdpt.png"));
    }

    #[test]
    fn test_overrides_apply_to_default_scenario() {
        let cli = Cli::parse_from([
            "msid-trend",
            "trend",
            "--archive",
            "data",
            "--msid",
            "aacccdpt",
            "--start",
            "2010:001",
            "--trend-months",
            "24",
        ]);
        let Command::Trend(args) = cli.command else {
            panic!("expected trend subcommand");
        };
        let scenario = load_scenario(&args).unwrap();
        assert_eq!(scenario.msid, "aacccdpt");
        assert_eq!(scenario.start, "2010:001");
        assert_eq!(scenario.stop, "2017:001:23:59:59.999");
        assert_eq!(scenario.trend.trend_months, 24);
    }

    #[test]
    fn test_plot_defaults() {
        let cli = Cli::parse_from(["msid-trend", "plot", "aacccdpt", "--archive", "data"]);
        let Command::Plot(args) = cli.command else {
            panic!("expected plot subcommand");
        };
        assert_eq!(args.start, "2001:001");
        assert!(args.stop.is_none());
    }

    #[test]
    fn test_zero_trend_months_rejected() {
        let cli = Cli::parse_from([
            "msid-trend",
            "trend",
            "--archive",
            "data",
            "--trend-months",
            "0",
        ]);
        let Command::Trend(args) = cli.command else {
            panic!("expected trend subcommand");
        };
        assert!(load_scenario(&args).is_err());
    }
}
