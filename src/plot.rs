//! Cluster assignment traces (SVG output)
use std::path::Path;

use plotters::prelude::*;

use crate::clustering::ClusterTable;
use crate::error::{Error, Result};

/// Plot the cluster label of every frame, one line per replicate.
pub fn plot_assignments(path: &Path, tables: &[ClusterTable]) -> Result<()> {
    draw_assignments(path, tables).map_err(|e| Error::Plot {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

type DrawResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn draw_assignments(path: &Path, tables: &[ClusterTable]) -> DrawResult<()> {
    let root = SVGBackend::new(path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let frames = tables.iter().map(|t| t.assignments.len()).max().unwrap_or(0);
    let clusters = tables.iter().map(ClusterTable::len).max().unwrap_or(0);

    if frames == 0 || tables.iter().all(ClusterTable::is_empty) {
        root.draw(&Text::new(
            "No cluster assignments",
            (450, 250),
            ("sans-serif", 20).into_font().color(&BLACK),
        ))?;
        root.present()?;
        return Ok(());
    }

    let mut chart = ChartBuilder::on(&root)
        .caption("Cluster assignment per frame", ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0usize..frames, -0.5f64..clusters as f64 - 0.5)?;

    chart
        .configure_mesh()
        .x_desc("Frame")
        .y_desc("Cluster")
        .y_labels(clusters)
        .draw()?;

    for (replicate, table) in tables.iter().enumerate() {
        let color = Palette99::pick(replicate).to_rgba();
        // offset replicates slightly so overlapping traces stay visible
        let offset = replicate as f64 * 0.05;
        chart
            .draw_series(LineSeries::new(
                table
                    .assignments
                    .iter()
                    .enumerate()
                    .map(|(frame, &label)| (frame, label as f64 + offset)),
                &color,
            ))?
            .label(format!("replicate {replicate}"))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
