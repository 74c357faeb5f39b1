/// Output columns. Selecting `Nodes` is what switches on per-node
/// attribution in the scanner; every other column is pure rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// File data resident in memory, in bytes.
    Res,
    /// File data resident in memory, in pages.
    Pages,
    /// Size of the file.
    Size,
    /// File name.
    File,
    /// Resident-page distribution across NUMA nodes.
    Nodes,
}

pub const ALL_COLUMNS: [Column; 5] = [
    Column::Res,
    Column::Pages,
    Column::Size,
    Column::File,
    Column::Nodes,
];

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Res => "RES",
            Column::Pages => "PAGES",
            Column::Size => "SIZE",
            Column::File => "FILE",
            Column::Nodes => "NODES",
        }
    }

    /// Numeric columns are right-aligned in table output.
    pub fn right_aligned(self) -> bool {
        matches!(self, Column::Res | Column::Pages | Column::Size)
    }
}

/// Default selection when `-o` is not given.
pub fn default_columns() -> Vec<Column> {
    vec![Column::Res, Column::Pages, Column::Size, Column::File]
}

/// clap value parser for `-o/--output` items; case-insensitive.
pub fn parse(name: &str) -> Result<Column, String> {
    ALL_COLUMNS
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| format!("unknown column: {}", name))
}
