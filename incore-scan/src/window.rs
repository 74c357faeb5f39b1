/// A contiguous byte range of a file, mapped and scanned as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Byte offset of the window within the file.
    pub offset: u64,
    /// Window length in bytes. Always > 0, at most the configured maximum.
    pub len: usize,
}

impl Window {
    /// Number of pages covered by this window; a trailing partial page
    /// counts as a whole page.
    pub fn page_count(&self, page_size: usize) -> usize {
        self.len / page_size + usize::from(self.len % page_size != 0)
    }
}

/// Splits `[0, file_size)` into ascending, contiguous, non-overlapping
/// windows of at most `window_size` bytes, the final one trimmed to the
/// file-size remainder.
///
/// A zero-size file yields no windows at all.
pub struct WindowIter {
    file_size: u64,
    window_size: u64,
    offset: u64,
}

impl WindowIter {
    /// `window_size` must be a nonzero multiple of the page size; the
    /// scanner configuration guarantees this by construction.
    pub fn new(file_size: u64, window_size: u64) -> Self {
        debug_assert!(window_size > 0);
        Self {
            file_size,
            window_size,
            offset: 0,
        }
    }
}

impl Iterator for WindowIter {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.offset >= self.file_size {
            return None;
        }
        let len = (self.file_size - self.offset).min(self.window_size) as usize;
        let window = Window {
            offset: self.offset,
            len,
        };
        self.offset += len as u64;
        Some(window)
    }
}
