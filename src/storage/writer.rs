//! # Page Writer
//!
//! Append side of the storage engine. A page travels through exactly one
//! path to disk:
//!
//! ```text
//! Page ── codec ──> bytes ── CRC64 ──> hash
//!                     │
//!                     ├── align (data file only) ──> padded offset
//!                     │
//!                     └── frame [u32 LE length][bytes] ── mmap+flush
//!                                                            │
//!                               publish coordinates <────────┘
//! ```
//!
//! Coordinates (offset, length, hash) are written into the caller's
//! [`PageReference`] only after `flush()` returns, so a reference that
//! carries an offset always points at durable bytes.
//!
//! ## Alignment
//!
//! In the data file, revision-root records are aligned to
//! [`REVISION_ROOT_ALIGN`] and all other records to
//! [`PAGE_FRAGMENT_ALIGN`]; padding gaps stay zeroed. The intent log is a
//! pure append stream with no alignment at all.
//!
//! ## The Bootstrap Slot
//!
//! The 8 bytes at offset 0 hold the offset of the latest uber page, or 0
//! while no commit has happened. Rewriting this slot is the single atomic
//! publication point of a commit.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, eyre, Result, WrapErr};
use tracing::debug;

use crate::config::{
    BOOTSTRAP_SLOT_OFFSET, BOOTSTRAP_SLOT_SIZE, DATA_FILE_NAME, FIRST_BEACON,
    INTENT_LOG_FILE_NAME, LENGTH_PREFIX_SIZE, PAGE_FRAGMENT_ALIGN, REVISION_OFFSET_FILE_NAME,
    REVISION_ROOT_ALIGN,
};
use crate::page::{encode_page, PageReference};

use super::mmap::MappedRegionMut;
use super::offsets::RevisionOffsetFile;
use super::page_hash;

/// Which file a page record is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    /// The durable data file, with alignment and bootstrap slot.
    Data,
    /// The per-transaction intent log, a plain append stream.
    TransactionIntentLog,
}

/// Exclusive append handle over one resource's files.
///
/// There is at most one `PageWriter` per resource at a time; the
/// transaction layer enforces the single-writer rule.
pub struct PageWriter {
    data: File,
    intent_log: File,
    offsets: RevisionOffsetFile,
}

impl PageWriter {
    /// Opens the writer over `resource_dir`, creating and initializing the
    /// files on first use.
    pub fn open(resource_dir: &Path) -> Result<Self> {
        let data_path = resource_dir.join(DATA_FILE_NAME);
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)
            .wrap_err_with(|| format!("failed to open data file {}", data_path.display()))?;

        if data.metadata()?.len() < FIRST_BEACON {
            // Fresh resource: zeroed bootstrap slot, first record at the
            // beacon offset.
            data.set_len(FIRST_BEACON)?;
            data.sync_all()?;
        }

        let intent_path = resource_dir.join(INTENT_LOG_FILE_NAME);
        let intent_log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&intent_path)
            .wrap_err_with(|| format!("failed to open intent log {}", intent_path.display()))?;

        let offsets = RevisionOffsetFile::open(&resource_dir.join(REVISION_OFFSET_FILE_NAME))?;

        Ok(Self {
            data,
            intent_log,
            offsets,
        })
    }

    /// Serializes the page held by `reference`, appends it to `target`,
    /// and publishes the resulting coordinates into `reference`.
    pub fn write_page(
        &mut self,
        reference: &mut PageReference,
        target: StoreTarget,
    ) -> Result<()> {
        let page = reference
            .page()
            .ok_or_else(|| eyre!("cannot persist a reference with no resident page"))?;
        let is_revision_root = page.is_revision_root();
        let bytes = encode_page(page)?;
        let hash = page_hash(&bytes);

        let (file, offset) = match target {
            StoreTarget::Data => {
                let align = if is_revision_root {
                    REVISION_ROOT_ALIGN
                } else {
                    PAGE_FRAGMENT_ALIGN
                };
                let end = self.data.metadata()?.len();
                (&self.data, end.next_multiple_of(align))
            }
            StoreTarget::TransactionIntentLog => {
                (&self.intent_log, self.intent_log.metadata()?.len())
            }
        };

        let frame_len = LENGTH_PREFIX_SIZE as usize + bytes.len();
        file.set_len(offset + frame_len as u64)?;

        let mut region = MappedRegionMut::map(file, offset, frame_len)?;
        let window = region.as_mut_slice();
        window[..LENGTH_PREFIX_SIZE as usize].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        window[LENGTH_PREFIX_SIZE as usize..].copy_from_slice(&bytes);
        region.flush()?;

        // A revision root's offset goes into the side file before the
        // reference learns its coordinates, so a chain that resolves through
        // the reference can always be reproduced from the side file.
        if is_revision_root && target == StoreTarget::Data {
            self.offsets.append(offset)?;
        }

        match target {
            StoreTarget::Data => reference.set_offset(offset),
            StoreTarget::TransactionIntentLog => reference.set_persistent_log_offset(offset),
        }
        reference.set_length(frame_len as u32);
        reference.set_hash(hash);

        debug!(offset, len = frame_len, ?target, "page record written");
        Ok(())
    }

    /// Persists an uber page and atomically publishes it as the latest by
    /// rewriting the bootstrap slot. This is the commit point.
    pub fn write_uber_page_reference(&mut self, reference: &mut PageReference) -> Result<()> {
        ensure!(
            reference
                .page()
                .is_some_and(|p| matches!(p, crate::page::Page::Uber(_))),
            "bootstrap slot can only publish an uber page"
        );
        self.write_page(reference, StoreTarget::Data)?;

        // INVARIANT: write_page flushed the record before returning, so
        // the slot never points at unflushed bytes.
        let offset = reference
            .offset()
            .ok_or_else(|| eyre!("uber page reference has no offset after write"))?;
        self.set_bootstrap_slot(offset)?;
        Ok(())
    }

    fn set_bootstrap_slot(&mut self, offset: u64) -> Result<()> {
        let mut slot = MappedRegionMut::map(
            &self.data,
            BOOTSTRAP_SLOT_OFFSET,
            BOOTSTRAP_SLOT_SIZE as usize,
        )?;
        slot.as_mut_slice().copy_from_slice(&offset.to_le_bytes());
        slot.flush()?;
        Ok(())
    }

    /// Rolls the resource back so `revision` is the latest.
    ///
    /// `uber` must be the persisted reference of `revision`'s uber page.
    /// The data file is cut immediately after that uber record, the
    /// bootstrap slot is repointed at it, and later offset entries are
    /// dropped. Since later revisions only ever appended bytes above the
    /// cut, the surviving revisions are byte-identical afterwards.
    pub fn truncate_to(&mut self, revision: u64, uber: &PageReference) -> Result<()> {
        let offset = uber
            .offset()
            .ok_or_else(|| eyre!("cannot truncate to an unpersisted uber page"))?;
        let end = offset + uber.length() as u64;
        let len = self.data.metadata()?.len();
        ensure!(
            end <= len,
            "truncation target [{}, {}) exceeds data file length {}",
            offset,
            end,
            len
        );

        self.data.set_len(end)?;
        self.data.sync_all()?;
        self.set_bootstrap_slot(offset)?;
        self.offsets.truncate_to(revision)?;

        debug!(revision, end, "resource truncated");
        Ok(())
    }

    /// Discards all staged intent-log records.
    pub fn clear_intent_log(&mut self) -> Result<()> {
        self.intent_log.set_len(0)?;
        Ok(())
    }

    /// Flushes file metadata and releases the handles.
    pub fn close(self) -> Result<()> {
        self.data.sync_all()?;
        self.intent_log.sync_all()?;
        Ok(())
    }
}
