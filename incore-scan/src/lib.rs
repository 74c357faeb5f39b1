//! incore-scan: windowed page-cache residency scanning.
//!
//! Maps each file in bounded-size windows, queries per-page residency with
//! `mincore(2)`, and accumulates per-file totals; optionally attributes
//! resident pages to NUMA nodes with one batched `move_pages(2)` query per
//! window, and optionally evicts a file's pages before measuring.

pub mod advise;
pub mod mmap;
pub mod numa;
pub mod report;
pub mod scan;
pub mod window;

// Re-exports for the CLI and other consumers.
pub use numa::{MovePagesResolver, NodeCounters, NodeResolver, NoopResolver};
pub use report::FileReport;
pub use scan::{
    MmapWindowMapper, ResidencyScanner, ScanConfig, ScanError, ScanOutcome, WindowMapper,
    DEFAULT_PAGES_PER_WINDOW,
};
pub use window::{Window, WindowIter};
