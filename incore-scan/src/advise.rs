use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use log::warn;

/// Asks the kernel to evict `file`'s cached pages before a scan.
///
/// Best effort only: the advisory may be ignored or fail outright, and the
/// scan proceeds unconditionally either way.
pub fn drop_cache(file: &File, len: u64, path: &Path) {
    // posix_fadvise reports its error as the return value, not via errno.
    // SAFETY: plain fcntl-style call on an open descriptor.
    let rc = unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            0,
            len as libc::off_t,
            libc::POSIX_FADV_DONTNEED,
        )
    };
    if rc != 0 {
        warn!(
            "failed to drop cached pages for {}: {}",
            path.display(),
            io::Error::from_raw_os_error(rc)
        );
    }
}
