use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use cirelay::{Pipeline, PipelineStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn status_cell(status: PipelineStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        PipelineStatus::Success => cell.fg(TableColor::Green),
        PipelineStatus::Failure | PipelineStatus::Cancelled => cell.fg(TableColor::Red),
        PipelineStatus::Pending | PipelineStatus::Running => cell.fg(TableColor::Yellow),
        PipelineStatus::Unknown => cell,
    }
}

pub fn color_coded_duration_cell(seconds: i64) -> Cell {
    let minutes = seconds as f64 / 60.0;
    let text = format!("{minutes:.1}min");
    if minutes <= 10.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if minutes <= 15.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

/// One row per run: identity, status, trigger, commit and duration.
pub fn pipelines_table(pipelines: &[Pipeline]) -> Table {
    let mut table = create_table();
    table.set_header(cyan_header(&[
        "Run", "Pipeline", "Status", "Trigger", "Commit", "Started", "Duration",
    ]));

    for pipeline in pipelines {
        let commit = pipeline
            .commit_sha
            .as_deref()
            .map_or_else(|| "-".to_string(), |sha| sha.chars().take(10).collect());
        let started = pipeline
            .started_at
            .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string());
        let duration = match (pipeline.started_at, pipeline.finished_at) {
            (Some(start), Some(end)) => color_coded_duration_cell((end - start).num_seconds()),
            _ => Cell::new("-"),
        };

        table.add_row(vec![
            Cell::new(pipeline.id.to_string()),
            Cell::new(&pipeline.name),
            status_cell(pipeline.status),
            Cell::new(pipeline.trigger),
            Cell::new(commit),
            Cell::new(started),
            duration,
        ]);
    }

    table
}
