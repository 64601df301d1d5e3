//! # Revision Offset File
//!
//! The side file `revisions.ofs` maps revision numbers to data-file
//! offsets for O(1) revision lookup. Entry `i` is the 8-byte little-endian
//! absolute offset of revision `i + 1`'s revision-root page record, so the
//! file length is always `committed_revisions * 8`.
//!
//! The file is advisory: losing it degrades revision lookup to the
//! backward uber-page chain walk, it never loses data. The writer appends
//! an entry only after the revision's pages are flushed, so a reader that
//! trusts an entry will find valid bytes at the offset.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use crate::config::REVISION_OFFSET_ENTRY_SIZE;

/// Append-only handle over the revision offset side file.
#[derive(Debug)]
pub struct RevisionOffsetFile {
    file: File,
}

impl RevisionOffsetFile {
    /// Opens (or creates) the offset file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open revision offset file {}", path.display()))?;

        let len = file.metadata()?.len();
        ensure!(
            len % REVISION_OFFSET_ENTRY_SIZE == 0,
            "revision offset file {} has torn length {}",
            path.display(),
            len
        );

        Ok(Self { file })
    }

    /// Number of revisions the file covers.
    pub fn count(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len() / REVISION_OFFSET_ENTRY_SIZE)
    }

    /// Records the revision-root offset of the next revision. Must be
    /// called in revision order; revision `count() + 1` is the only one
    /// this can describe.
    pub fn append(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file
            .write_all(&offset.to_le_bytes())
            .wrap_err("failed to append revision offset entry")?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Returns the revision-root offset of `revision`, or `None` if the
    /// file does not cover it. Revision numbering starts at 1.
    pub fn get(&mut self, revision: u64) -> Result<Option<u64>> {
        if revision == 0 || revision > self.count()? {
            return Ok(None);
        }
        let pos = (revision - 1) * REVISION_OFFSET_ENTRY_SIZE;
        self.file.seek(SeekFrom::Start(pos))?;
        let mut buf = [0u8; 8];
        self.file
            .read_exact(&mut buf)
            .wrap_err_with(|| format!("failed to read offset entry for revision {}", revision))?;
        Ok(Some(u64::from_le_bytes(buf)))
    }

    /// Discards entries for revisions above `revision`.
    pub fn truncate_to(&mut self, revision: u64) -> Result<()> {
        let keep = revision * REVISION_OFFSET_ENTRY_SIZE;
        let len = self.file.metadata()?.len();
        ensure!(
            keep <= len,
            "cannot truncate offset file to revision {}: only {} entries exist",
            revision,
            len / REVISION_OFFSET_ENTRY_SIZE
        );
        self.file.set_len(keep)?;
        self.file.sync_data()?;
        Ok(())
    }
}
