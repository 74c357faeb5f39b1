//! incore: count file pages resident in the page cache.

mod columns;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use columns::Column;
use incore_scan::{
    MovePagesResolver, ResidencyScanner, ScanConfig, ScanOutcome,
};
use render::{OutputFormat, OutputOptions, Row};

#[derive(Parser, Debug)]
#[command(
    name = "incore",
    version,
    about = "Count pages of file contents resident in the page cache"
)]
struct Args {
    /// Print sizes in bytes rather than in human-readable format.
    #[arg(short, long)]
    bytes: bool,

    /// Try to drop each file's cached pages before counting.
    #[arg(short, long)]
    drop: bool,

    /// Don't print a header line.
    #[arg(short, long)]
    noheadings: bool,

    /// Comma-separated list of output columns: RES, PAGES, SIZE, FILE, NODES.
    /// Selecting NODES enables the per-NUMA-node breakdown.
    #[arg(short, long, value_delimiter = ',', value_parser = columns::parse)]
    output: Option<Vec<Column>>,

    /// Use JSON output format.
    #[arg(short = 'J', long)]
    json: bool,

    /// Use raw (unaligned) output format.
    #[arg(short, long)]
    raw: bool,

    /// Files to inspect.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

/// Columns given with `-o` extend the default set rather than replacing it,
/// as in classic fincore.
fn selected_columns(args: &Args) -> Vec<Column> {
    let mut cols = columns::default_columns();
    if let Some(extra) = &args.output {
        cols.extend(extra.iter().copied());
    }
    cols
}

fn scanner_for(args: &Args, want_nodes: bool) -> ResidencyScanner {
    let mut cfg = ScanConfig::detect();
    cfg.drop_cache = args.drop;
    if want_nodes {
        let resolver = MovePagesResolver::new(cfg.pages_per_window);
        ResidencyScanner::with_resolver(cfg, Box::new(resolver))
    } else {
        ResidencyScanner::new(cfg)
    }
}

/// Scans every argument in order. Directories are skipped silently; a file
/// that fails produces no row and flips the failure flag, and the remaining
/// arguments are still processed.
fn scan_all(scanner: &mut ResidencyScanner, files: &[PathBuf]) -> (Vec<Row>, bool) {
    let mut rows = Vec::with_capacity(files.len());
    let mut failed = false;
    for path in files {
        match scanner.scan_path(path) {
            Ok(ScanOutcome::Scanned(report)) => rows.push(Row {
                name: path.display().to_string(),
                report,
            }),
            Ok(ScanOutcome::SkippedDirectory) => {}
            Err(err) => {
                error!("{}", err);
                failed = true;
            }
        }
    }
    (rows, failed)
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let cols = selected_columns(&args);
    let want_nodes = cols.contains(&Column::Nodes);

    let mut scanner = scanner_for(&args, want_nodes);
    let page_size = scanner.config().page_size;
    let (rows, failed) = scan_all(&mut scanner, &args.files);

    let format = if args.json {
        OutputFormat::Json
    } else if args.raw {
        OutputFormat::Raw
    } else {
        OutputFormat::Table
    };
    let opts = OutputOptions {
        columns: cols,
        format,
        bytes: args.bytes,
        noheadings: args.noheadings,
    };
    print!("{}", render::render(&rows, &opts, page_size)?);

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
