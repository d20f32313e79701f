//! SVG chart rendering from figure specifications.
//!
//! Candidate programs describe charts declaratively through the frozen `plt`
//! module; the host renders the description here with `plotters` so the
//! sandboxed code never touches the filesystem.

use std::path::Path;

use plotters::prelude::*;
use serde::{Deserialize, Serialize};

/// One figure recorded by a candidate program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureSpec {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub series: Vec<SeriesSpec>,
}

/// One plotted series within a figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SeriesSpec {
    Line {
        x: Vec<f64>,
        y: Vec<f64>,
        #[serde(default)]
        label: String,
    },
    Scatter {
        x: Vec<f64>,
        y: Vec<f64>,
        #[serde(default)]
        label: String,
    },
    Bar {
        labels: Vec<String>,
        values: Vec<f64>,
    },
    Hist {
        values: Vec<f64>,
        #[serde(default = "default_bins")]
        bins: usize,
    },
}

fn default_bins() -> usize {
    10
}

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("figure has no drawable series")]
    Empty,
    #[error("chart backend error: {0}")]
    Backend(String),
}

const CHART_WIDTH: u32 = 800;
const CHART_HEIGHT: u32 = 600;

struct Bounds {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

fn widen(min: f64, max: f64) -> (f64, f64) {
    if min == max {
        (min - 1.0, max + 1.0)
    } else {
        let pad = (max - min) * 0.05;
        (min - pad, max + pad)
    }
}

/// Histogram bin edges and counts for `values` over `bins` equal-width bins.
fn bin_values(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    let bins = bins.max(1);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };
    let mut counts = vec![0usize; bins];
    for &v in values {
        let mut idx = ((v - min) / width) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| (min + i as f64 * width, min + (i + 1) as f64 * width, c))
        .collect()
}

fn bounds_of(spec: &FigureSpec) -> Option<Bounds> {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    let mut any = false;

    for series in &spec.series {
        match series {
            SeriesSpec::Line { x, y, .. } | SeriesSpec::Scatter { x, y, .. } => {
                for &v in x {
                    x_min = x_min.min(v);
                    x_max = x_max.max(v);
                    any = true;
                }
                for &v in y {
                    y_min = y_min.min(v);
                    y_max = y_max.max(v);
                }
            }
            SeriesSpec::Bar { labels, values } => {
                if !values.is_empty() {
                    x_min = x_min.min(-0.5);
                    x_max = x_max.max(labels.len() as f64 - 0.5);
                    y_min = y_min.min(0.0);
                    for &v in values {
                        y_min = y_min.min(v);
                        y_max = y_max.max(v);
                    }
                    any = true;
                }
            }
            SeriesSpec::Hist { values, bins } => {
                if !values.is_empty() {
                    for (lo, hi, count) in bin_values(values, *bins) {
                        x_min = x_min.min(lo);
                        x_max = x_max.max(hi);
                        y_max = y_max.max(count as f64);
                    }
                    y_min = y_min.min(0.0);
                    any = true;
                }
            }
        }
    }

    if !any || !x_min.is_finite() || !y_max.is_finite() {
        return None;
    }
    let (x_min, x_max) = widen(x_min, x_max);
    let (y_min, y_max) = widen(y_min, y_max);
    Some(Bounds {
        x_min,
        x_max,
        y_min,
        y_max,
    })
}

const PALETTE: [RGBColor; 5] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
];

/// Renders `spec` as an SVG file at `path`.
pub fn render_svg(spec: &FigureSpec, path: &Path) -> Result<(), ChartError> {
    let bounds = bounds_of(spec).ok_or(ChartError::Empty)?;

    // Bar labels are shared across all bar series of the figure; the x axis
    // is indexed by bar position.
    let bar_labels: Vec<String> = spec
        .series
        .iter()
        .find_map(|s| match s {
            SeriesSpec::Bar { labels, .. } => Some(labels.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let root = SVGBackend::new(path, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| ChartError::Backend(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&spec.title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(bounds.x_min..bounds.x_max, bounds.y_min..bounds.y_max)
        .map_err(|e| ChartError::Backend(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc(&spec.xlabel)
        .y_desc(&spec.ylabel)
        .x_label_formatter(&|x: &f64| {
            if bar_labels.is_empty() {
                format!("{:.1}", x)
            } else {
                let idx = x.round() as i64;
                if (x - idx as f64).abs() < 0.05 && idx >= 0 && (idx as usize) < bar_labels.len() {
                    bar_labels[idx as usize].clone()
                } else {
                    String::new()
                }
            }
        })
        .draw()
        .map_err(|e| ChartError::Backend(e.to_string()))?;

    for (idx, series) in spec.series.iter().enumerate() {
        let color = PALETTE[idx % PALETTE.len()];
        match series {
            SeriesSpec::Line { x, y, .. } => {
                let points: Vec<(f64, f64)> =
                    x.iter().cloned().zip(y.iter().cloned()).collect();
                chart
                    .draw_series(LineSeries::new(points, color.stroke_width(2)))
                    .map_err(|e| ChartError::Backend(e.to_string()))?;
            }
            SeriesSpec::Scatter { x, y, .. } => {
                let points: Vec<(f64, f64)> =
                    x.iter().cloned().zip(y.iter().cloned()).collect();
                chart
                    .draw_series(
                        points
                            .into_iter()
                            .map(|p| Circle::new(p, 4, color.filled())),
                    )
                    .map_err(|e| ChartError::Backend(e.to_string()))?;
            }
            SeriesSpec::Bar { values, .. } => {
                chart
                    .draw_series(values.iter().enumerate().map(|(i, &v)| {
                        let x0 = i as f64 - 0.35;
                        let x1 = i as f64 + 0.35;
                        Rectangle::new([(x0, 0.0), (x1, v)], color.filled())
                    }))
                    .map_err(|e| ChartError::Backend(e.to_string()))?;
            }
            SeriesSpec::Hist { values, bins } => {
                if values.is_empty() {
                    continue;
                }
                chart
                    .draw_series(bin_values(values, *bins).into_iter().map(
                        |(lo, hi, count)| {
                            Rectangle::new([(lo, 0.0), (hi, count as f64)], color.filled())
                        },
                    ))
                    .map_err(|e| ChartError::Backend(e.to_string()))?;
            }
        }
    }

    root.present()
        .map_err(|e| ChartError::Backend(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_line_figure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("line.svg");
        let spec = FigureSpec {
            title: "trend".into(),
            xlabel: "x".into(),
            ylabel: "y".into(),
            series: vec![SeriesSpec::Line {
                x: vec![0.0, 1.0, 2.0],
                y: vec![3.0, 1.0, 4.0],
                label: "series".into(),
            }],
        };
        render_svg(&spec, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("trend"));
    }

    #[test]
    fn test_render_bar_figure_with_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.svg");
        let spec = FigureSpec {
            title: "sales by region".into(),
            series: vec![SeriesSpec::Bar {
                labels: vec!["North".into(), "South".into()],
                values: vec![1200.0, 900.0],
            }],
            ..Default::default()
        };
        render_svg(&spec, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("North"));
    }

    #[test]
    fn test_empty_figure_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.svg");
        let spec = FigureSpec::default();
        match render_svg(&spec, &path) {
            Err(ChartError::Empty) => {}
            other => panic!("expected Empty, got {:?}", other),
        }
    }

    #[test]
    fn test_figure_spec_parses_from_vm_json() {
        let json = r#"{
            "title": "t",
            "xlabel": "",
            "ylabel": "",
            "series": [
                {"kind": "hist", "values": [1.0, 1.5, 2.0, 2.0]},
                {"kind": "scatter", "x": [1.0], "y": [2.0]}
            ]
        }"#;
        let spec: FigureSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.series.len(), 2);
        match &spec.series[0] {
            SeriesSpec::Hist { bins, .. } => assert_eq!(*bins, 10),
            other => panic!("expected hist, got {:?}", other),
        }
    }

    #[test]
    fn test_bin_values_cover_range() {
        let bins = bin_values(&[0.0, 5.0, 10.0], 2);
        assert_eq!(bins.len(), 2);
        let total: usize = bins.iter().map(|b| b.2).sum();
        assert_eq!(total, 3);
    }
}
