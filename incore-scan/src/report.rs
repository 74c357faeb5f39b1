use crate::numa::NodeCounters;

/// Final per-file totals handed to the output layer.
///
/// Pure aggregate: no behavior beyond carrying these values across the
/// output boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// File size in bytes at scan time.
    pub size: u64,
    /// Pages of the file currently resident in the page cache. A partial
    /// trailing page counts as one full page when resident.
    pub resident_pages: u64,
    /// Per-node breakdown. Empty when node attribution was off or no page
    /// resolved to a valid node; its total never exceeds `resident_pages`.
    pub nodes: NodeCounters,
}

impl FileReport {
    pub fn resident_bytes(&self, page_size: usize) -> u64 {
        self.resident_pages * page_size as u64
    }
}
