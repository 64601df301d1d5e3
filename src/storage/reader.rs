//! # Page Reader
//!
//! Read side of the storage engine. Readers never see partial state: the
//! bootstrap slot only ever points at a fully flushed uber page, and every
//! record a committed page references was flushed before the slot moved.
//! Any number of readers may run concurrently with the single writer.
//!
//! ## Revision Lookup
//!
//! Revision `r`'s root is found on the fast path through `revisions.ofs`
//! (entry `r - 1`). If the side file does not cover the revision, the
//! reader falls back to walking the backward uber-page chain from the
//! bootstrap slot. Both paths agree because the writer appends the side
//! file in the same commit that extends the chain.
//!
//! ## Verification
//!
//! Every load recomputes the CRC64 digest over the record body and
//! compares it against the reference's stored hash; a mismatch or an
//! implausible length prefix surfaces as `StorageError::Corruption` with
//! the byte offset involved.

use std::fs::File;
use std::path::Path;

use eyre::{eyre, Result, WrapErr};
use tracing::debug;

use crate::config::{
    BOOTSTRAP_SLOT_OFFSET, BOOTSTRAP_SLOT_SIZE, DATA_FILE_NAME, INTENT_LOG_FILE_NAME,
    LENGTH_PREFIX_SIZE, PAGE_FRAGMENT_ALIGN, REVISION_OFFSET_FILE_NAME,
};
use crate::error::StorageError;
use crate::page::{decode_page, Page, PageReference, RevisionRootPage, UberPage};

use super::mmap::MappedRegion;
use super::offsets::RevisionOffsetFile;
use super::page_hash;

/// Read-only handle over one resource's files.
#[derive(Debug)]
pub struct PageReader {
    data: File,
    intent_log: File,
    offsets: RevisionOffsetFile,
}

impl PageReader {
    pub fn open(resource_dir: &Path) -> Result<Self> {
        let data_path = resource_dir.join(DATA_FILE_NAME);
        let data = File::open(&data_path)
            .wrap_err_with(|| format!("failed to open data file {}", data_path.display()))?;
        let intent_path = resource_dir.join(INTENT_LOG_FILE_NAME);
        let intent_log = File::open(&intent_path)
            .wrap_err_with(|| format!("failed to open intent log {}", intent_path.display()))?;
        let offsets = RevisionOffsetFile::open(&resource_dir.join(REVISION_OFFSET_FILE_NAME))?;

        Ok(Self {
            data,
            intent_log,
            offsets,
        })
    }

    /// Loads and verifies the data-file record `reference` points at.
    pub fn read(&self, reference: &PageReference) -> Result<Page> {
        let offset = reference
            .offset()
            .ok_or_else(|| eyre!("cannot read a reference with no data-file offset"))?;
        if offset % PAGE_FRAGMENT_ALIGN != 0 {
            return Err(StorageError::AlignmentViolation {
                offset,
                align: PAGE_FRAGMENT_ALIGN,
            }
            .into());
        }
        self.read_frame(&self.data, offset, reference.hash())
    }

    /// Loads a record staged in the intent log. Staged records carry no
    /// alignment guarantee.
    pub fn read_staged(&self, reference: &PageReference) -> Result<Page> {
        let offset = reference
            .persistent_log_offset()
            .ok_or_else(|| eyre!("cannot read a reference with no intent-log offset"))?;
        self.read_frame(&self.intent_log, offset, reference.hash())
    }

    fn read_frame(&self, file: &File, offset: u64, expected_hash: Option<u64>) -> Result<Page> {
        let file_len = file.metadata()?.len();
        let body_start = offset + LENGTH_PREFIX_SIZE;
        if body_start > file_len {
            return Err(StorageError::corruption(offset, "record prefix past end of file").into());
        }

        let prefix = MappedRegion::map(file, offset, LENGTH_PREFIX_SIZE as usize)?;
        let len_bytes: [u8; 4] = prefix.as_slice().try_into().map_err(|_| {
            StorageError::corruption(offset, "short length prefix")
        })?;
        let body_len = u32::from_le_bytes(len_bytes) as u64;
        if body_len == 0 || body_start + body_len > file_len {
            return Err(StorageError::corruption(
                offset,
                format!("implausible record length {}", body_len),
            )
            .into());
        }

        let body = MappedRegion::map(file, body_start, body_len as usize)?;
        let bytes = body.as_slice();

        if let Some(expected) = expected_hash {
            let actual = page_hash(bytes);
            if actual != expected {
                return Err(StorageError::corruption(
                    offset,
                    format!("hash mismatch: stored {:#018x}, computed {:#018x}", expected, actual),
                )
                .into());
            }
        }

        decode_page(bytes)
    }

    /// Reads the bootstrap slot. Returns `None` for a resource with no
    /// committed revision yet.
    pub fn read_uber_page_reference(&self) -> Result<Option<PageReference>> {
        let slot = MappedRegion::map(
            &self.data,
            BOOTSTRAP_SLOT_OFFSET,
            BOOTSTRAP_SLOT_SIZE as usize,
        )?;
        let slot_bytes: [u8; 8] = slot
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::corruption(BOOTSTRAP_SLOT_OFFSET, "short bootstrap slot"))?;
        let offset = u64::from_le_bytes(slot_bytes);
        if offset == 0 {
            return Ok(None);
        }
        Ok(Some(PageReference::at_offset(offset)))
    }

    /// The latest committed revision number, or 0 for a fresh resource.
    pub fn latest_revision(&self) -> Result<u64> {
        match self.read_latest_uber()? {
            Some(uber) => Ok(uber.revision_number),
            None => Ok(crate::config::BASE_REVISION),
        }
    }

    fn read_latest_uber(&self) -> Result<Option<UberPage>> {
        let Some(reference) = self.read_uber_page_reference()? else {
            return Ok(None);
        };
        match self.read(&reference)? {
            Page::Uber(uber) => Ok(Some(uber)),
            other => Err(StorageError::corruption(
                reference.offset().unwrap_or(0),
                format!("bootstrap slot points at a {:?} page", other.kind()),
            )
            .into()),
        }
    }

    /// Loads revision `revision`'s root page, via the offset side file
    /// when it covers the revision and the backward uber chain otherwise.
    pub fn read_revision_root(&mut self, revision: u64) -> Result<RevisionRootPage> {
        let latest = self.latest_revision()?;
        if revision == 0 || revision > latest {
            return Err(StorageError::RevisionNotFound { revision, latest }.into());
        }

        if let Some(offset) = self.offsets.get(revision)? {
            let root = self.read_root_at(offset)?;
            if root.revision_number != revision {
                return Err(StorageError::corruption(
                    offset,
                    format!(
                        "offset file entry for revision {} points at revision {}",
                        revision, root.revision_number
                    ),
                )
                .into());
            }
            return Ok(root);
        }

        debug!(revision, "offset file miss, walking uber chain");
        self.chain_walk(revision, latest)
    }

    fn read_root_at(&self, offset: u64) -> Result<RevisionRootPage> {
        match self.read_frame(&self.data, offset, None)? {
            Page::RevisionRoot(root) => Ok(root),
            other => Err(StorageError::corruption(
                offset,
                format!("expected a revision root, found {:?}", other.kind()),
            )
            .into()),
        }
    }

    fn chain_walk(&self, revision: u64, latest: u64) -> Result<RevisionRootPage> {
        let (offset, uber) = self.walk_to_uber(revision, latest)?;
        let root_offset = uber.root_ref.offset().ok_or_else(|| {
            StorageError::corruption(offset, "uber page carries no revision-root offset")
        })?;
        self.read_root_at(root_offset)
    }

    fn walk_to_uber(&self, revision: u64, latest: u64) -> Result<(u64, UberPage)> {
        let mut reference = self
            .read_uber_page_reference()?
            .ok_or(StorageError::RevisionNotFound { revision, latest })?;

        loop {
            let offset = reference.offset().unwrap_or(0);
            let uber = match self.read(&reference)? {
                Page::Uber(uber) => uber,
                other => {
                    return Err(StorageError::corruption(
                        offset,
                        format!("uber chain reached a {:?} page", other.kind()),
                    )
                    .into())
                }
            };

            if uber.revision_number == revision {
                return Ok((offset, uber));
            }

            match uber.previous_uber_page_offset {
                Some(previous) if uber.revision_number > revision => {
                    reference = PageReference::at_offset(previous);
                }
                _ => return Err(StorageError::RevisionNotFound { revision, latest }.into()),
            }
        }
    }

    /// Resolves the persisted reference of `revision`'s uber page, with
    /// offset and frame length filled in. Used by rollback, which must
    /// know where the uber record ends.
    pub fn uber_reference_for(&self, revision: u64) -> Result<PageReference> {
        let latest = self.latest_revision()?;
        if revision == 0 || revision > latest {
            return Err(StorageError::RevisionNotFound { revision, latest }.into());
        }

        let (offset, _) = self.walk_to_uber(revision, latest)?;
        let prefix = MappedRegion::map(&self.data, offset, LENGTH_PREFIX_SIZE as usize)?;
        let len_bytes: [u8; 4] = prefix
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::corruption(offset, "short length prefix"))?;
        let body_len = u32::from_le_bytes(len_bytes);

        let mut reference = PageReference::at_offset(offset);
        reference.set_length(LENGTH_PREFIX_SIZE as u32 + body_len);
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::writer::{PageWriter, StoreTarget};
    use crate::page::KeyValuePage;
    use tempfile::TempDir;

    fn kv_reference(records: &[(u64, &[u8])]) -> PageReference {
        let mut page = KeyValuePage::new();
        for (key, value) in records {
            page.insert(*key, value.to_vec());
        }
        PageReference::with_page(Page::KeyValue(page))
    }

    /// Commits `count` minimal revisions and returns the written uber refs.
    fn commit_chain(writer: &mut PageWriter, count: u64) -> Vec<PageReference> {
        let mut ubers = Vec::new();
        let mut previous = None;
        for revision in 1..=count {
            let mut data = kv_reference(&[(revision, format!("rev{}", revision).as_bytes())]);
            writer.write_page(&mut data, StoreTarget::Data).unwrap();

            let mut root_page = RevisionRootPage::new(revision, 1_700_000_000_000 + revision);
            root_page.max_record_key = revision;
            root_page.data_ref = data.clone();
            let mut root = PageReference::with_page(Page::RevisionRoot(root_page));
            writer.write_page(&mut root, StoreTarget::Data).unwrap();

            let mut uber_page = UberPage::new(revision, previous);
            uber_page.root_ref = root.clone();
            let mut uber = PageReference::with_page(Page::Uber(uber_page));
            writer.write_uber_page_reference(&mut uber).unwrap();

            previous = uber.offset();
            ubers.push(uber);
        }
        ubers
    }

    #[test]
    fn fresh_resource_has_no_uber_and_revision_zero() {
        let dir = TempDir::new().unwrap();
        PageWriter::open(dir.path()).unwrap().close().unwrap();

        let reader = PageReader::open(dir.path()).unwrap();
        assert!(reader.read_uber_page_reference().unwrap().is_none());
        assert_eq!(reader.latest_revision().unwrap(), 0);
    }

    #[test]
    fn round_trip_with_hash_verification() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        let mut reference = kv_reference(&[(7, b"payload")]);
        writer.write_page(&mut reference, StoreTarget::Data).unwrap();

        let reader = PageReader::open(dir.path()).unwrap();
        match reader.read(&reference).unwrap() {
            Page::KeyValue(page) => assert_eq!(page.get(7), Some(b"payload".as_slice())),
            other => panic!("unexpected page {:?}", other.kind()),
        }
    }

    #[test]
    fn corrupted_body_is_detected() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        let mut reference = kv_reference(&[(7, b"payload")]);
        writer.write_page(&mut reference, StoreTarget::Data).unwrap();
        writer.close().unwrap();

        // Flip one byte inside the record body.
        let path = dir.path().join(DATA_FILE_NAME);
        let mut raw = std::fs::read(&path).unwrap();
        let victim = reference.offset().unwrap() as usize + LENGTH_PREFIX_SIZE as usize + 2;
        raw[victim] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let reader = PageReader::open(dir.path()).unwrap();
        let err = reader.read(&reference).unwrap_err();
        let storage = err.downcast_ref::<StorageError>().unwrap();
        assert!(storage.is_corruption());
    }

    #[test]
    fn misaligned_reference_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        let mut reference = kv_reference(&[(1, b"x")]);
        writer.write_page(&mut reference, StoreTarget::Data).unwrap();

        let reader = PageReader::open(dir.path()).unwrap();
        let mut crooked = reference.clone();
        crooked.set_offset(reference.offset().unwrap() + 3);
        let err = reader.read(&crooked).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::AlignmentViolation { align: 8, .. })
        ));
    }

    #[test]
    fn staged_records_read_back_from_the_intent_log() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        let mut reference = kv_reference(&[(3, b"staged")]);
        writer
            .write_page(&mut reference, StoreTarget::TransactionIntentLog)
            .unwrap();

        let reader = PageReader::open(dir.path()).unwrap();
        match reader.read_staged(&reference).unwrap() {
            Page::KeyValue(page) => assert_eq!(page.get(3), Some(b"staged".as_slice())),
            other => panic!("unexpected page {:?}", other.kind()),
        }
        // The record never reached the data file.
        assert!(reference.offset().is_none());
    }

    #[test]
    fn revision_lookup_fast_path_and_chain_walk_agree() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        commit_chain(&mut writer, 4);
        writer.close().unwrap();

        let mut reader = PageReader::open(dir.path()).unwrap();
        assert_eq!(reader.latest_revision().unwrap(), 4);
        let via_offsets = reader.read_revision_root(2).unwrap();
        assert_eq!(via_offsets.revision_number, 2);
        assert_eq!(via_offsets.max_record_key, 2);

        // Remove the side file so lookup must walk the chain.
        drop(reader);
        std::fs::write(dir.path().join("revisions.ofs"), []).unwrap();
        let mut reader = PageReader::open(dir.path()).unwrap();
        let via_chain = reader.read_revision_root(2).unwrap();
        assert_eq!(via_chain, via_offsets);
    }

    #[test]
    fn missing_revisions_report_the_latest() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        commit_chain(&mut writer, 2);

        let mut reader = PageReader::open(dir.path()).unwrap();
        for bad in [0u64, 3, 99] {
            let err = reader.read_revision_root(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StorageError>(),
                Some(StorageError::RevisionNotFound {
                    revision,
                    latest: 2
                }) if *revision == bad
            ));
        }
    }

    #[test]
    fn uber_reference_resolution_matches_the_writer() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        let ubers = commit_chain(&mut writer, 3);

        let reader = PageReader::open(dir.path()).unwrap();
        for (i, written) in ubers.iter().enumerate() {
            let resolved = reader.uber_reference_for(i as u64 + 1).unwrap();
            assert_eq!(resolved.offset(), written.offset());
            assert_eq!(resolved.length(), written.length());
        }
    }

    #[test]
    fn truncation_leaves_survivors_readable() {
        let dir = TempDir::new().unwrap();
        let mut writer = PageWriter::open(dir.path()).unwrap();
        let ubers = commit_chain(&mut writer, 5);

        let mut reader = PageReader::open(dir.path()).unwrap();
        let before = reader.read_revision_root(2).unwrap();
        drop(reader);

        writer.truncate_to(2, &ubers[1]).unwrap();
        writer.close().unwrap();

        let mut reader = PageReader::open(dir.path()).unwrap();
        assert_eq!(reader.latest_revision().unwrap(), 2);
        assert_eq!(reader.read_revision_root(2).unwrap(), before);
        let err = reader.read_revision_root(3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::RevisionNotFound { revision: 3, latest: 2 })
        ));
    }
}
