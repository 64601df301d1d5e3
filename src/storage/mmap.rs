//! # Scoped Memory-Mapped File Views
//!
//! This module implements `MappedRegion` and `MappedRegionMut`, short-lived
//! memory-mapped views over exact byte ranges of a file. They are the only
//! way the storage layer touches data-file and intent-log bytes.
//!
//! ## Scope Discipline
//!
//! Unlike a whole-file mapping held for the lifetime of the store, every
//! read or write operation in revdb acquires a mapping sized to exactly the
//! bytes it touches and releases it when the operation ends. The mapping is
//! an RAII value: dropping it unmaps, on success and error paths alike.
//! This keeps the address-space footprint proportional to one operation and
//! means a growing file never invalidates an outstanding view.
//!
//! ## Alignment Handling
//!
//! `mmap(2)` only accepts file offsets that are multiples of the OS page
//! size, but page records live at 8- and 256-byte alignment. The region
//! internally aligns the mapping start down to the OS page boundary and
//! exposes only the requested `[offset, offset + len)` window:
//!
//! ```text
//! file:    ...|----OS page----|----OS page----|...
//!                    ^offset            ^offset+len
//! mapping: [==============================]
//!           ^aligned          window ^^^^^^
//! ```
//!
//! ## Durability
//!
//! `MappedRegionMut::flush()` delegates to `msync` and must complete before
//! the writer publishes any coordinate that makes the bytes reachable.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` with the file range being
//! mapped, so an out-of-range or permission failure names the exact bytes
//! involved.

use std::fs::File;

use eyre::{ensure, Result, WrapErr};
use memmap2::{Mmap, MmapMut, MmapOptions};

fn os_page_size() -> u64 {
    // SAFETY: sysconf(_SC_PAGESIZE) reads a static configuration value and
    // has no failure mode relevant here; a non-positive return falls back
    // to the conventional 4096.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw > 0 {
        raw as u64
    } else {
        4096
    }
}

/// A read-only mapped view over `[offset, offset + len)` of a file.
pub struct MappedRegion {
    mmap: Mmap,
    window_start: usize,
    window_len: usize,
}

impl MappedRegion {
    /// Maps exactly `len` bytes starting at `offset`. The range must lie
    /// within the current file length.
    pub fn map(file: &File, offset: u64, len: usize) -> Result<Self> {
        ensure!(len > 0, "cannot map an empty region");

        let file_len = file
            .metadata()
            .wrap_err("failed to stat file before mapping")?
            .len();

        ensure!(
            offset + len as u64 <= file_len,
            "mapped range [{}, {}) exceeds file length {}",
            offset,
            offset + len as u64,
            file_len
        );

        let page = os_page_size();
        let aligned = offset - (offset % page);
        let window_start = (offset - aligned) as usize;

        // SAFETY: the file is opened by this process and revdb's append-only
        // discipline means already-written ranges are never mutated, so the
        // mapped bytes are stable for the lifetime of the view. The range
        // was bounds-checked against the file length above.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(window_start + len)
                .map(file)
                .wrap_err_with(|| format!("failed to map range [{}, {})", offset, offset + len as u64))?
        };

        Ok(Self {
            mmap,
            window_start,
            window_len: len,
        })
    }

    /// The requested window as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[self.window_start..self.window_start + self.window_len]
    }
}

/// A writable mapped view over `[offset, offset + len)` of a file.
///
/// The caller must have extended the file to cover the range (`set_len`)
/// before mapping; mapping does not grow the file.
pub struct MappedRegionMut {
    mmap: MmapMut,
    window_start: usize,
    window_len: usize,
}

impl MappedRegionMut {
    pub fn map(file: &File, offset: u64, len: usize) -> Result<Self> {
        ensure!(len > 0, "cannot map an empty region");

        let file_len = file
            .metadata()
            .wrap_err("failed to stat file before mapping")?
            .len();

        ensure!(
            offset + len as u64 <= file_len,
            "writable range [{}, {}) exceeds file length {}; extend the file first",
            offset,
            offset + len as u64,
            file_len
        );

        let page = os_page_size();
        let aligned = offset - (offset % page);
        let window_start = (offset - aligned) as usize;

        // SAFETY: the single-writer discipline guarantees no other mapping
        // of this range is live for writing, and the range was bounds-checked
        // against the file length above. The view is dropped (unmapped) at
        // the end of the owning operation on every exit path.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(window_start + len)
                .map_mut(file)
                .wrap_err_with(|| {
                    format!("failed to map writable range [{}, {})", offset, offset + len as u64)
                })?
        };

        Ok(Self {
            mmap,
            window_start,
            window_len: len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[self.window_start..self.window_start + self.window_len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[self.window_start..self.window_start + self.window_len]
    }

    /// Syncs the mapped window to disk. Must complete before the bytes'
    /// coordinates are published anywhere.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mapped region")
    }
}
