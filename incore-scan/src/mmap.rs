use std::fs::File;
use std::num::NonZeroUsize;

use libc::c_void;
use log::warn;
use nix::errno::Errno;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::window::Window;

/// One file window mapped into the address space.
///
/// The mapping is a scoped resource: it is acquired immediately before a
/// window is scanned and released when this value drops, so every exit path
/// out of a scan step, including early error returns, unmaps cleanly.
pub struct MappedWindow {
    addr: *mut c_void,
    len: usize,
}

impl MappedWindow {
    /// Maps `window` of `file` with the given protection.
    ///
    /// `PROT_NONE` is enough for the residency query itself; node
    /// attribution needs `PROT_READ` so resident pages can be touched.
    pub fn map(file: &File, window: Window, prot: ProtFlags) -> nix::Result<Self> {
        let len = NonZeroUsize::new(window.len).ok_or(Errno::EINVAL)?;
        // SAFETY: shared file-backed mapping with the kernel choosing the
        // address; nothing else aliases it for the lifetime of this value.
        let addr = unsafe {
            mmap(
                None,
                len,
                prot,
                MapFlags::MAP_SHARED,
                Some(file),
                window.offset as libc::off_t,
            )?
        };
        Ok(Self {
            addr,
            len: window.len,
        })
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the page at `index` within the window.
    ///
    /// Callers keep `index` below the window's page count; the scanner
    /// derives it from the mincore vector, which is sized from this mapping.
    pub fn page_addr(&self, index: usize, page_size: usize) -> *const u8 {
        // SAFETY: the offset stays inside the mapped region per the
        // documented bound on `index`.
        unsafe { (self.addr as *const u8).add(index * page_size) }
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        // SAFETY: addr/len come from a successful mmap and are unmapped
        // exactly once, here.
        if let Err(err) = unsafe { munmap(self.addr, self.len) } {
            warn!("failed to unmap {} byte window: {}", self.len, err);
        }
    }
}
