use anyhow::Context;
use incore_scan::FileReport;
use serde_json::{Map, Value};

use crate::columns::Column;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Column-aligned table.
    Table,
    /// Space-separated, unaligned.
    Raw,
    /// `{"incore": [ ... ]}` via serde_json.
    Json,
}

#[derive(Debug)]
pub struct OutputOptions {
    pub columns: Vec<Column>,
    pub format: OutputFormat,
    /// Print RES and SIZE as exact byte counts instead of suffixed sizes.
    pub bytes: bool,
    pub noheadings: bool,
}

/// One successfully scanned file, ready for rendering.
#[derive(Debug)]
pub struct Row {
    pub name: String,
    pub report: FileReport,
}

/// Human-readable size with a one-letter binary suffix, fincore-style:
/// "0B", "512B", "4K", "1.5M".
pub fn human_size(bytes: u64) -> String {
    const SUFFIXES: [&str; 7] = ["B", "K", "M", "G", "T", "P", "E"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64;
    let mut suffix = 0;
    while value >= 1024.0 && suffix < SUFFIXES.len() - 1 {
        value /= 1024.0;
        suffix += 1;
    }
    if value < 10.0 {
        format!("{:.1}{}", value, SUFFIXES[suffix])
    } else {
        format!("{:.0}{}", value, SUFFIXES[suffix])
    }
}

/// Node distribution cell: `[0]=12 [1]=3`, empty when nothing resolved.
fn nodes_cell(report: &FileReport) -> String {
    report
        .nodes
        .iter()
        .map(|(node, count)| format!("[{}]={}", node, count))
        .collect::<Vec<_>>()
        .join(" ")
}

fn size_cell(bytes_mode: bool, value: u64) -> String {
    if bytes_mode {
        value.to_string()
    } else {
        human_size(value)
    }
}

fn cell(column: Column, row: &Row, opts: &OutputOptions, page_size: usize) -> String {
    match column {
        Column::Res => size_cell(opts.bytes, row.report.resident_bytes(page_size)),
        Column::Pages => row.report.resident_pages.to_string(),
        Column::Size => size_cell(opts.bytes, row.report.size),
        Column::File => row.name.clone(),
        Column::Nodes => nodes_cell(&row.report),
    }
}

fn json_value(column: Column, row: &Row, opts: &OutputOptions, page_size: usize) -> Value {
    match column {
        Column::File => Value::from(row.name.as_str()),
        Column::Pages => Value::from(row.report.resident_pages),
        Column::Res if opts.bytes => Value::from(row.report.resident_bytes(page_size)),
        Column::Size if opts.bytes => Value::from(row.report.size),
        Column::Res | Column::Size => Value::from(cell(column, row, opts, page_size)),
        Column::Nodes => Value::from(nodes_cell(&row.report)),
    }
}

fn render_json(rows: &[Row], opts: &OutputOptions, page_size: usize) -> anyhow::Result<String> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut obj = Map::new();
        for &column in &opts.columns {
            // The breakdown is entirely absent when no page resolved to a
            // node, mirroring the sparse counter model.
            if column == Column::Nodes && row.report.nodes.is_empty() {
                continue;
            }
            obj.insert(
                column.name().to_ascii_lowercase(),
                json_value(column, row, opts, page_size),
            );
        }
        out.push(Value::Object(obj));
    }
    let doc = serde_json::json!({ "incore": out });
    let mut text =
        serde_json::to_string_pretty(&doc).context("failed to render JSON output")?;
    text.push('\n');
    Ok(text)
}

fn render_raw(rows: &[Row], opts: &OutputOptions, page_size: usize) -> String {
    let mut out = String::new();
    if !opts.noheadings {
        let names: Vec<_> = opts.columns.iter().map(|c| c.name()).collect();
        out.push_str(&names.join(" "));
        out.push('\n');
    }
    for row in rows {
        let cells: Vec<_> = opts
            .columns
            .iter()
            .map(|&c| cell(c, row, opts, page_size))
            .collect();
        out.push_str(&cells.join(" "));
        out.push('\n');
    }
    out
}

fn render_table(rows: &[Row], opts: &OutputOptions, page_size: usize) -> String {
    let ncols = opts.columns.len();
    let mut widths: Vec<usize> = if opts.noheadings {
        vec![0; ncols]
    } else {
        opts.columns.iter().map(|c| c.name().len()).collect()
    };
    let mut grid: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for row in rows {
        let cells: Vec<String> = opts
            .columns
            .iter()
            .map(|&c| cell(c, row, opts, page_size))
            .collect();
        for (width, text) in widths.iter_mut().zip(&cells) {
            *width = (*width).max(text.len());
        }
        grid.push(cells);
    }

    let mut out = String::new();
    let mut emit_line = |cells: &[String]| {
        let mut line = String::new();
        for (i, (text, &width)) in cells.iter().zip(&widths).enumerate() {
            if i > 0 {
                line.push(' ');
            }
            let last = i == ncols - 1;
            if opts.columns[i].right_aligned() {
                line.push_str(&format!("{:>width$}", text, width = width));
            } else if last {
                // No trailing padding on the final column.
                line.push_str(text);
            } else {
                line.push_str(&format!("{:<width$}", text, width = width));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    };

    if !opts.noheadings {
        let names: Vec<String> = opts.columns.iter().map(|c| c.name().to_string()).collect();
        emit_line(&names);
    }
    for cells in &grid {
        emit_line(cells);
    }
    out
}

/// Renders all rows in the selected format.
pub fn render(rows: &[Row], opts: &OutputOptions, page_size: usize) -> anyhow::Result<String> {
    match opts.format {
        OutputFormat::Json => render_json(rows, opts, page_size),
        OutputFormat::Raw => Ok(render_raw(rows, opts, page_size)),
        OutputFormat::Table => Ok(render_table(rows, opts, page_size)),
    }
}
