//! SVG curves of a finished run
//!
//! Two charts per run: losses (training plus both test groups) and
//! accuracies on the two test groups, each against the round number.

use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::error::{FedError, Result};
use crate::record::RunRecord;

const PLOT_SIZE: (u32, u32) = (900, 540);

/// Files written by [`render`]
#[derive(Debug, Clone, PartialEq)]
pub struct PlotPaths {
    pub loss: PathBuf,
    pub accuracy: PathBuf,
}

impl PlotPaths {
    pub fn for_record(dir: &Path, record: &RunRecord) -> Self {
        Self {
            loss: dir.join(format!("fed_{}_loss.svg", record.key)),
            accuracy: dir.join(format!("fed_{}_acc.svg", record.key)),
        }
    }
}

fn plot_err<E: std::fmt::Display>(err: E) -> FedError {
    FedError::Plot(err.to_string())
}

/// Render both charts for `record` into `dir`
pub fn render(record: &RunRecord, dir: &Path) -> Result<PlotPaths> {
    std::fs::create_dir_all(dir)?;
    let paths = PlotPaths::for_record(dir, record);

    draw_curves(
        &paths.loss,
        "Loss per round",
        "Loss",
        &[
            ("train", &record.train_loss, RED),
            ("group 1", &record.loss_1, BLUE),
            ("group 2", &record.loss_2, GREEN),
        ],
    )?;
    draw_curves(
        &paths.accuracy,
        "Accuracy per round",
        "Accuracy",
        &[("group 1", &record.acc_1, BLUE), ("group 2", &record.acc_2, GREEN)],
    )?;
    Ok(paths)
}

fn draw_curves(path: &Path, caption: &str, y_desc: &str, series: &[(&str, &Vec<f32>, RGBColor)]) -> Result<()> {
    let rounds = series.iter().map(|(_, values, _)| values.len()).max().unwrap_or(0);
    let y_max = series
        .iter()
        .flat_map(|(_, values, _)| values.iter().copied())
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-3);

    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(1usize..rounds.max(2), 0f32..y_max * 1.05)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Round")
        .y_desc(y_desc)
        .draw()
        .map_err(plot_err)?;

    for &(label, values, color) in series {
        let points: Vec<(usize, f32)> = values.iter().enumerate().map(|(i, &v)| (i + 1, v)).collect();
        chart
            .draw_series(LineSeries::new(points, color))
            .map_err(plot_err)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}
