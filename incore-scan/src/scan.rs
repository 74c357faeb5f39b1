use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use libc::c_void;
use log::{debug, warn};
use nix::sys::mman::ProtFlags;
use thiserror::Error;

use crate::advise;
use crate::mmap::MappedWindow;
use crate::numa::{NodeCounters, NodeResolver};
use crate::report::FileReport;
use crate::window::{Window, WindowIter};

/// Default window size in pages: 128 MiB of file per mapping on 4 KiB pages.
pub const DEFAULT_PAGES_PER_WINDOW: usize = 32 * 1024;

/// Scanner configuration, fixed for the lifetime of one scanner.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// System page size; process-wide constant fixed at startup.
    pub page_size: usize,
    /// Maximum pages mapped at once. Window length is always this many
    /// pages except for a file's trimmed final window.
    pub pages_per_window: usize,
    /// Issue a cache-eviction advisory before scanning each file.
    pub drop_cache: bool,
}

impl ScanConfig {
    /// Detects the page size and applies defaults.
    pub fn detect() -> Self {
        // SAFETY: sysconf with a valid name.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if raw <= 0 {
            warn!("failed to detect page size via sysconf, assuming 4096");
            4096
        } else {
            raw as usize
        };
        Self {
            page_size,
            pages_per_window: DEFAULT_PAGES_PER_WINDOW,
            drop_cache: false,
        }
    }

    pub fn window_size(&self) -> u64 {
        (self.page_size * self.pages_per_window) as u64
    }
}

/// A scan failure intrinsic to one file. The file's row is suppressed and
/// the run is marked failed; other files are unaffected.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to stat {path}: {source}")]
    Stat { path: PathBuf, source: io::Error },

    #[error("failed to map window at offset {offset} of {path}: {source}")]
    Map {
        path: PathBuf,
        offset: u64,
        source: nix::errno::Errno,
    },

    #[error("residency query failed at offset {offset} of {path}: {source}")]
    ResidencyQuery {
        path: PathBuf,
        offset: u64,
        source: io::Error,
    },
}

/// Maps one window of a file.
///
/// The production mapper is plain mmap; like [`NodeResolver`], this is a
/// seam so tests can make a chosen window fail to map and exercise the
/// abandonment path.
pub trait WindowMapper {
    fn map(&mut self, file: &File, window: Window, prot: ProtFlags)
        -> nix::Result<MappedWindow>;
}

/// Default mapper: mmap the window as-is.
pub struct MmapWindowMapper;

impl WindowMapper for MmapWindowMapper {
    fn map(
        &mut self,
        file: &File,
        window: Window,
        prot: ProtFlags,
    ) -> nix::Result<MappedWindow> {
        MappedWindow::map(file, window, prot)
    }
}

/// Outcome of scanning one path.
#[derive(Debug)]
pub enum ScanOutcome {
    /// File scanned to completion.
    Scanned(FileReport),
    /// Path is a directory: no row, not an error.
    SkippedDirectory,
}

/// Windowed page-cache residency scanner.
///
/// Maps each file in bounded windows, queries per-page residency with
/// `mincore(2)`, and folds the result into a running count. Scratch buffers
/// are owned here, sized once from the configuration, and reused across
/// windows and files; the window iterator never produces a window larger
/// than they can hold.
pub struct ResidencyScanner {
    cfg: ScanConfig,
    /// mincore residency vector, one byte per page of the current window.
    incore: Vec<u8>,
    /// Addresses of resident pages in the current window, consumed by the
    /// node resolver in one batched call.
    pending: Vec<*const c_void>,
    resolver: Option<Box<dyn NodeResolver>>,
    mapper: Box<dyn WindowMapper>,
}

impl ResidencyScanner {
    /// Scanner without node attribution.
    pub fn new(cfg: ScanConfig) -> Self {
        Self::build(cfg, None, Box::new(MmapWindowMapper))
    }

    /// Scanner with per-node breakdown via the given resolver.
    pub fn with_resolver(cfg: ScanConfig, resolver: Box<dyn NodeResolver>) -> Self {
        Self::build(cfg, Some(resolver), Box::new(MmapWindowMapper))
    }

    /// Scanner with a substitute window mapper.
    pub fn with_mapper(cfg: ScanConfig, mapper: Box<dyn WindowMapper>) -> Self {
        Self::build(cfg, None, mapper)
    }

    fn build(
        cfg: ScanConfig,
        resolver: Option<Box<dyn NodeResolver>>,
        mapper: Box<dyn WindowMapper>,
    ) -> Self {
        let max_pages = cfg.pages_per_window;
        Self {
            cfg,
            incore: vec![0; max_pages],
            pending: Vec::with_capacity(max_pages),
            resolver,
            mapper,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.cfg
    }

    /// Scans one path to completion or failure.
    ///
    /// Directories are skipped, zero-byte files report zero resident pages
    /// without mapping anything. The file handle and every window mapping
    /// are released on all exit paths.
    pub fn scan_path(&mut self, path: &Path) -> Result<ScanOutcome, ScanError> {
        let file = File::open(path).map_err(|source| ScanError::Open {
            path: path.to_owned(),
            source,
        })?;
        let meta = file.metadata().map_err(|source| ScanError::Stat {
            path: path.to_owned(),
            source,
        })?;
        if meta.is_dir() {
            return Ok(ScanOutcome::SkippedDirectory);
        }
        let size = meta.len();

        if self.cfg.drop_cache {
            advise::drop_cache(&file, size, path);
        }

        let mut resident_pages = 0u64;
        let mut nodes = NodeCounters::default();
        for window in WindowIter::new(size, self.cfg.window_size()) {
            self.scan_window(&file, path, window, &mut resident_pages, &mut nodes)?;
        }

        debug!(
            "{}: {} of {} bytes resident ({} pages)",
            path.display(),
            resident_pages * self.cfg.page_size as u64,
            size,
            resident_pages
        );
        Ok(ScanOutcome::Scanned(FileReport {
            size,
            resident_pages,
            nodes,
        }))
    }

    /// One scan step: map the window, query residency, fold the bit vector
    /// into the running count, and hand resident pages to the resolver.
    fn scan_window(
        &mut self,
        file: &File,
        path: &Path,
        window: Window,
        resident_pages: &mut u64,
        nodes: &mut NodeCounters,
    ) -> Result<(), ScanError> {
        // The touch step below needs a readable mapping; residency alone
        // does not.
        let prot = if self.resolver.is_some() {
            ProtFlags::PROT_READ
        } else {
            ProtFlags::PROT_NONE
        };
        let mapping = self
            .mapper
            .map(file, window, prot)
            .map_err(|source| ScanError::Map {
                path: path.to_owned(),
                offset: window.offset,
                source,
            })?;

        let pages = window.page_count(self.cfg.page_size);
        // SAFETY: the mapping covers window.len bytes and the scratch vector
        // holds one byte per page of the largest allowed window.
        let rc = unsafe { libc::mincore(mapping.as_ptr(), window.len, self.incore.as_mut_ptr()) };
        if rc < 0 {
            return Err(ScanError::ResidencyQuery {
                path: path.to_owned(),
                offset: window.offset,
                source: io::Error::last_os_error(),
            });
        }

        self.pending.clear();
        let collect_nodes = self.resolver.is_some();
        for (index, &flags) in self.incore[..pages].iter().enumerate() {
            if flags & 0x1 == 0 {
                continue;
            }
            *resident_pages += 1;
            if collect_nodes {
                let addr = mapping.page_addr(index, self.cfg.page_size);
                // A cache-resident page is not necessarily mapped into this
                // process yet, and move_pages only attributes pages we have
                // faulted in. Touch the page first; the fault is satisfied
                // from the cache, no disk I/O.
                // SAFETY: addr lies within this window's PROT_READ mapping.
                unsafe {
                    std::ptr::read_volatile(addr);
                }
                self.pending.push(addr as *const c_void);
            }
        }

        if let Some(resolver) = self.resolver.as_mut() {
            if let Err(err) = resolver.resolve(&self.pending, nodes) {
                // Non-fatal: the overall count stands, only this window's
                // node attribution is lost.
                warn!(
                    "node lookup failed for {} at offset {}: {}",
                    path.display(),
                    window.offset,
                    err
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;
    use std::rc::Rc;

    fn page_size() -> usize {
        ScanConfig::detect().page_size
    }

    fn scratch_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("incore-scan-test-{}-{}", std::process::id(), tag));
        path
    }

    fn write_pages(tag: &str, pages: usize, extra_bytes: usize) -> PathBuf {
        let path = scratch_path(tag);
        let mut f = File::create(&path).unwrap();
        f.write_all(&vec![0xa5; pages * page_size() + extra_bytes])
            .unwrap();
        f.sync_all().unwrap();
        path
    }

    /// Attributes every page it is handed to node 0 and counts invocations.
    struct CountingResolver {
        calls: Rc<Cell<usize>>,
        fail: bool,
    }

    impl NodeResolver for CountingResolver {
        fn resolve(
            &mut self,
            pages: &[*const c_void],
            counters: &mut NodeCounters,
        ) -> io::Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(io::Error::from(io::ErrorKind::Unsupported));
            }
            for _ in pages {
                counters.record(0);
            }
            Ok(())
        }
    }

    #[test]
    fn zero_byte_file_scans_no_windows() {
        let path = scratch_path("zero");
        File::create(&path).unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut scanner = ResidencyScanner::with_resolver(
            ScanConfig::detect(),
            Box::new(CountingResolver {
                calls: Rc::clone(&calls),
                fail: false,
            }),
        );
        match scanner.scan_path(&path).unwrap() {
            ScanOutcome::Scanned(report) => {
                assert_eq!(report.size, 0);
                assert_eq!(report.resident_pages, 0);
                assert!(report.nodes.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.get(), 0, "no window may be scanned for an empty file");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn directories_are_skipped_not_failed() {
        let mut scanner = ResidencyScanner::new(ScanConfig::detect());
        match scanner.scan_path(&std::env::temp_dir()).unwrap() {
            ScanOutcome::SkippedDirectory => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let mut scanner = ResidencyScanner::new(ScanConfig::detect());
        let err = scanner
            .scan_path(Path::new("/nonexistent/incore-scan-test"))
            .unwrap_err();
        assert!(matches!(err, ScanError::Open { .. }));
    }

    #[test]
    fn freshly_written_file_is_fully_resident() {
        let path = write_pages("fresh", 3, 0);
        let mut scanner = ResidencyScanner::new(ScanConfig::detect());
        match scanner.scan_path(&path).unwrap() {
            ScanOutcome::Scanned(report) => {
                assert_eq!(report.size, 3 * page_size() as u64);
                assert_eq!(report.resident_pages, 3);
                assert_eq!(
                    report.resident_bytes(page_size()),
                    report.resident_pages * page_size() as u64
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn partial_trailing_page_counts_as_a_whole_page() {
        let path = write_pages("ragged", 2, 1);
        let mut scanner = ResidencyScanner::new(ScanConfig::detect());
        match scanner.scan_path(&path).unwrap() {
            ScanOutcome::Scanned(report) => {
                assert_eq!(report.size, 2 * page_size() as u64 + 1);
                assert_eq!(report.resident_pages, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn one_resolver_call_per_window() {
        let path = write_pages("windows", 5, 0);
        let calls = Rc::new(Cell::new(0));
        let cfg = ScanConfig {
            pages_per_window: 2,
            ..ScanConfig::detect()
        };
        let mut scanner = ResidencyScanner::with_resolver(
            cfg,
            Box::new(CountingResolver {
                calls: Rc::clone(&calls),
                fail: false,
            }),
        );
        match scanner.scan_path(&path).unwrap() {
            ScanOutcome::Scanned(report) => {
                // 5 pages over 2-page windows: 2 + 2 + 1.
                assert_eq!(calls.get(), 3);
                assert_eq!(report.resident_pages, 5);
                assert_eq!(report.nodes.total(), report.resident_pages);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn failing_node_query_is_non_fatal() {
        let path = write_pages("nodefail", 2, 0);
        let calls = Rc::new(Cell::new(0));
        let mut scanner = ResidencyScanner::with_resolver(
            ScanConfig::detect(),
            Box::new(CountingResolver {
                calls: Rc::clone(&calls),
                fail: true,
            }),
        );
        match scanner.scan_path(&path).unwrap() {
            ScanOutcome::Scanned(report) => {
                assert_eq!(report.resident_pages, 2);
                assert!(report.nodes.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.get(), 1);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn node_total_never_exceeds_resident_pages() {
        let path = write_pages("bounded", 4, 0);
        let calls = Rc::new(Cell::new(0));
        let mut scanner = ResidencyScanner::with_resolver(
            ScanConfig::detect(),
            Box::new(CountingResolver {
                calls,
                fail: false,
            }),
        );
        if let ScanOutcome::Scanned(report) = scanner.scan_path(&path).unwrap() {
            assert!(report.nodes.total() <= report.resident_pages);
        }
        std::fs::remove_file(&path).unwrap();
    }

    /// Maps windows normally until `fail_from` bytes into the file, then
    /// refuses every later window.
    struct TruncatingMapper {
        fail_from: u64,
    }

    impl WindowMapper for TruncatingMapper {
        fn map(
            &mut self,
            file: &File,
            window: Window,
            prot: ProtFlags,
        ) -> nix::Result<MappedWindow> {
            if window.offset >= self.fail_from {
                return Err(nix::errno::Errno::ENOMEM);
            }
            MappedWindow::map(file, window, prot)
        }
    }

    #[test]
    fn map_failure_abandons_the_rest_of_the_file() {
        let path = write_pages("mapfail", 3, 0);
        let cfg = ScanConfig {
            pages_per_window: 2,
            ..ScanConfig::detect()
        };
        let fail_from = cfg.window_size();
        let mut scanner = ResidencyScanner::with_mapper(
            cfg,
            Box::new(TruncatingMapper { fail_from }),
        );
        // First window scans, the second fails to map, and the file is
        // abandoned there rather than reported as a complete count.
        let err = scanner.scan_path(&path).unwrap_err();
        match err {
            ScanError::Map { offset, .. } => assert_eq!(offset, fail_from),
            other => panic!("unexpected error: {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn scanner_recovers_after_a_failed_file() {
        let good = write_pages("after-fail", 2, 0);
        let bad = write_pages("fails", 3, 0);
        let cfg = ScanConfig {
            pages_per_window: 2,
            ..ScanConfig::detect()
        };
        let fail_from = cfg.window_size();
        let mut scanner = ResidencyScanner::with_mapper(
            cfg,
            Box::new(TruncatingMapper { fail_from }),
        );
        assert!(scanner.scan_path(&bad).is_err());
        // The next file fits in one window and scans normally.
        match scanner.scan_path(&good).unwrap() {
            ScanOutcome::Scanned(report) => assert_eq!(report.resident_pages, 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        std::fs::remove_file(&good).unwrap();
        std::fs::remove_file(&bad).unwrap();
    }

    #[test]
    fn drop_then_scan_still_reports_consistent_totals() {
        let path = write_pages("drop", 3, 0);
        let cfg = ScanConfig {
            drop_cache: true,
            ..ScanConfig::detect()
        };
        let mut scanner = ResidencyScanner::new(cfg);
        match scanner.scan_path(&path).unwrap() {
            ScanOutcome::Scanned(report) => {
                // Eviction is advisory (and a no-op on tmpfs), so only the
                // invariants are checked, not an exact count.
                assert_eq!(report.size, 3 * page_size() as u64);
                assert!(report.resident_pages <= 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();
    }
}
