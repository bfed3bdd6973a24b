use std::panic;
use std::path::Path;

use anyhow::Result;
use msid_trend::{
    ChartConfig, MonthlyAggregate, TimeConversion, TimeSeries, TrendReport, TrendScenario,
    SECONDS_PER_DAY,
};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, FontFamily, FontStyle};
use plotters_backend::{BackendCoord, DrawingBackend};
use tracing::debug;

const QUICKLOOK_SIZE: (u32, u32) = (1280, 760);
const ARROW_HEAD_PX: f64 = 10.0;

pub enum ChartKind {
    Png,
    Svg,
}

pub fn render_trend_guard(
    report: &TrendReport,
    scenario: &TrendScenario,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let size = (scenario.chart.width, scenario.chart.height);
    let render = || -> Result<()> {
        match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, size).into_drawing_area();
                draw_trend_chart(root, report, &scenario.chart)
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, size).into_drawing_area();
                draw_trend_chart(root, report, &scenario.chart)
            }
        }
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|e| format!("plotting error: {}", e))
}

pub fn render_quicklook_guard(
    msid: &str,
    series: &TimeSeries,
    conv: &dyn TimeConversion,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<()> {
        match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, QUICKLOOK_SIZE).into_drawing_area();
                draw_quicklook_chart(root, msid, series, conv)
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, QUICKLOOK_SIZE).into_drawing_area();
                draw_quicklook_chart(root, msid, series, conv)
            }
        }
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|e| format!("plotting error: {}", e))
}

fn rgb(c: [u8; 3]) -> RGBColor {
    RGBColor(c[0], c[1], c[2])
}

fn font(size: f64) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal)
}

fn draw_trend_chart<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    report: &TrendReport,
    cfg: &ChartConfig,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let (Some(first_tick), Some(last_tick)) = (report.ticks.first(), report.ticks.last()) else {
        root.present()?;
        return Ok(());
    };
    let x_min = first_tick.secs;
    let x_max = last_tick.secs + cfg.x_pad_days * SECONDS_PER_DAY;
    let (y_min, y_max) = (cfg.y_min, cfg.y_max);

    let mut chart = ChartBuilder::on(&root)
        .caption(cfg.title_for(&report.msid), font(cfg.title_font_size))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    // Both axes get hand-placed ticks; the mesh only draws the axis lines and y caption.
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(0)
        .y_labels(0)
        .y_desc(cfg.y_label.as_str())
        .axis_desc_style(font(cfg.label_font_size))
        .label_style(font(cfg.tick_font_size))
        .draw()?;

    let grid = RGBColor(225, 225, 225);
    chart.draw_series(report.ticks.iter().map(|tick| {
        PathElement::new(vec![(tick.secs, y_min), (tick.secs, y_max)], grid.stroke_width(1))
    }))?;
    let y_ticks = y_tick_labels(cfg);
    chart.draw_series(y_ticks.iter().map(|(y, _)| {
        PathElement::new(vec![(x_min, *y), (x_max, *y)], grid.stroke_width(1))
    }))?;
    let y_tick_style =
        TextStyle::from(font(cfg.tick_font_size)).pos(Pos::new(HPos::Right, VPos::Center));
    chart.draw_series(y_ticks.iter().map(|(y, label)| {
        EmptyElement::at((x_min, *y)) + Text::new(label.clone(), (-8, 0), y_tick_style.clone())
    }))?;

    let tick_style =
        TextStyle::from(font(cfg.tick_font_size)).pos(Pos::new(HPos::Center, VPos::Top));
    chart.draw_series(
        report
            .ticks
            .iter()
            .filter(|tick| !tick.label.is_empty())
            .map(|tick| {
                EmptyElement::at((tick.secs, y_min))
                    + Text::new(tick.label.clone(), (0, 8), tick_style.clone())
            }),
    )?;

    let telemetry: Vec<(f64, f64)> = report
        .masked
        .iter()
        .filter(|(t, _)| *t >= x_min && *t <= x_max)
        .collect();
    chart.draw_series(LineSeries::new(telemetry, rgb(cfg.telemetry_color).stroke_width(1)))?;

    let monthly = rgb(cfg.monthly_color);
    let maxima = monthly_points(&report.monthly_window);
    chart.draw_series(LineSeries::new(maxima.iter().copied(), monthly.stroke_width(1)))?;
    chart.draw_series(
        maxima
            .iter()
            .map(|&point| Circle::new(point, 4, monthly.filled())),
    )?;

    let trend = rgb(cfg.trend_color);
    let projection = &report.projection;
    chart.draw_series(LineSeries::new(
        projection.xs.iter().copied().zip(projection.ys.iter().copied()),
        trend.stroke_width(2),
    ))?;
    chart.draw_series(DashedLineSeries::new(
        projection.xs.iter().copied().zip(report.band.iter().copied()),
        10,
        6,
        trend.stroke_width(2),
    ))?;

    let label_x = x_min + cfg.limit_label_offset_days * SECONDS_PER_DAY;
    let limits = [
        (&cfg.caution_text, report.limits.caution_high, rgb(cfg.caution_color)),
        (&cfg.warning_text, report.limits.warning_high, rgb(cfg.warning_color)),
    ];
    for (text, value, color) in limits {
        chart.draw_series(LineSeries::new(
            [(x_min, value), (x_max, value)],
            color.stroke_width(2),
        ))?;
        let style = TextStyle::from(font(cfg.label_font_size))
            .color(&color)
            .pos(Pos::new(HPos::Left, VPos::Bottom));
        chart.draw_series(std::iter::once(Text::new(
            cfg.limit_label(text, value),
            (label_x, value),
            style,
        )))?;
    }

    for annotation in &cfg.annotations {
        let (Some(point), Some(text_at)) = (
            annotation.point.resolve(&report.ticks),
            annotation.text_at.resolve(&report.ticks),
        ) else {
            debug!("Annotation '{}' anchors past the axis; skipped", annotation.text);
            continue;
        };

        chart.draw_series(std::iter::once(PathElement::new(
            vec![text_at, point],
            BLACK.stroke_width(1),
        )))?;
        let head = arrow_head(chart.backend_coord(&text_at), chart.backend_coord(&point));
        if head.len() == 3 {
            root.draw(&Polygon::new(head, BLACK.filled()))?;
        }

        let lines: Vec<&str> = annotation.text.lines().collect();
        let line_height = (annotation.font_size * 1.2).round() as i32;
        let top = -(line_height * lines.len() as i32) / 2;
        let style = TextStyle::from(font(annotation.font_size))
            .pos(Pos::new(HPos::Center, VPos::Top));
        chart.draw_series(lines.iter().enumerate().map(|(i, line)| {
            EmptyElement::at(text_at)
                + Text::new(line.to_string(), (0, top + i as i32 * line_height), style.clone())
        }))?;
    }

    root.present()?;
    Ok(())
}

/// Monthly maxima in time order; drawn as a line with a circle on each point.
fn monthly_points(window: &MonthlyAggregate) -> Vec<(f64, f64)> {
    window
        .times
        .iter()
        .copied()
        .zip(window.maxes.iter().copied())
        .collect()
}

/// Configured y tick values with their labels, clipped to the y range.
fn y_tick_labels(cfg: &ChartConfig) -> Vec<(f64, String)> {
    cfg.y_ticks()
        .into_iter()
        .filter(|y| *y >= cfg.y_min && *y <= cfg.y_max)
        .map(|y| (y, format!("{:.0}", y)))
        .collect()
}

/// Triangle at `to`, pointing away from `from`, in backend pixels.
fn arrow_head(from: BackendCoord, to: BackendCoord) -> Vec<BackendCoord> {
    let dx = (to.0 - from.0) as f64;
    let dy = (to.1 - from.1) as f64;
    let len = dx.hypot(dy);
    if len < 1.0 {
        return vec![to];
    }
    let (ux, uy) = (dx / len, dy / len);
    let base = (to.0 as f64 - ux * ARROW_HEAD_PX, to.1 as f64 - uy * ARROW_HEAD_PX);
    let half = ARROW_HEAD_PX / 2.5;
    vec![
        to,
        ((base.0 - uy * half).round() as i32, (base.1 + ux * half).round() as i32),
        ((base.0 + uy * half).round() as i32, (base.1 - ux * half).round() as i32),
    ]
}

fn draw_quicklook_chart<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    msid: &str,
    series: &TimeSeries,
    conv: &dyn TimeConversion,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let (Some(x_min), Some(mut x_max)) = (series.first_time(), series.last_time()) else {
        root.present()?;
        return Ok(());
    };
    if x_max <= x_min {
        x_max = x_min + SECONDS_PER_DAY;
    }
    let (Some(mut y_min), Some(mut y_max)) = (series.min_value(), series.max_value()) else {
        root.present()?;
        return Ok(());
    };
    let pad = ((y_max - y_min) * 0.05).max(0.5);
    y_min -= pad;
    y_max += pad;

    let mut chart = ChartBuilder::on(&root)
        .caption(msid.to_ascii_uppercase(), font(22.0))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let date_label = |v: &f64| conv.to_date(*v).chars().take(8).collect::<String>();
    chart
        .configure_mesh()
        .x_labels(8)
        .x_label_formatter(&date_label)
        .y_label_formatter(&|v| format!("{:.1}", v))
        .label_style(font(16.0))
        .draw()?;

    chart.draw_series(LineSeries::new(series.iter(), RGBColor(102, 153, 255)))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_head_points_at_target() {
        let head = arrow_head((0, 0), (100, 0));
        assert_eq!(head.len(), 3);
        assert_eq!(head[0], (100, 0));
        assert_eq!(head[1].0, 90);
        assert_eq!(head[2].0, 90);
        assert_eq!(head[1].1, -head[2].1);
    }

    #[test]
    fn test_monthly_points_pair_times_with_maxima() {
        let window = MonthlyAggregate {
            times: vec![10.0, 20.0, 30.0],
            maxes: vec![1.0, 3.0, 2.0],
            mins: vec![0.0; 3],
            means: vec![0.5; 3],
            counts: vec![4; 3],
        };
        assert_eq!(
            monthly_points(&window),
            vec![(10.0, 1.0), (20.0, 3.0), (30.0, 2.0)]
        );
        assert!(monthly_points(&MonthlyAggregate::default()).is_empty());
    }

    #[test]
    fn test_y_ticks_follow_config() {
        let cfg = ChartConfig::default();
        let ticks = y_tick_labels(&cfg);
        assert_eq!(ticks.len(), 11);
        assert_eq!(ticks[0], (-5.0, "-5".to_string()));
        assert_eq!(ticks[1], (0.0, "0".to_string()));
        assert_eq!(ticks[10], (45.0, "45".to_string()));

        let coarse = ChartConfig {
            y_min: 0.0,
            y_max: 20.0,
            y_step: 10.0,
            ..ChartConfig::default()
        };
        let labels: Vec<String> = y_tick_labels(&coarse).into_iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["0", "10", "20"]);
    }

    #[test]
    fn test_arrow_head_degenerate() {
        assert_eq!(arrow_head((5, 5), (5, 5)), vec![(5, 5)]);
    }
}
