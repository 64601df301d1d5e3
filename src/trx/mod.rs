//! # Transaction Module
//!
//! Copy-on-write transactions over one resource.
//!
//! ## Concurrency Model
//!
//! ```text
//!            Resource
//!           /        \
//!   PageWriteTrx   PageReadTrx (any number, any revision)
//!   (at most one)
//! ```
//!
//! A write transaction mutates private working copies of the record page
//! and any touched index pages; nothing it does is visible until `commit`
//! appends the new pages and repoints the bootstrap slot. Read
//! transactions bind to a committed revision at open time and observe it
//! immutably forever, including across later commits and truncations (the
//! mapped bytes below the cut never change).
//!
//! ## Commit Ordering
//!
//! `commit` persists bottom-up so every published reference points at
//! flushed bytes: record page, index pages, revision root, uber page,
//! bootstrap slot. The working pages are first staged to the intent log,
//! so a crash mid-commit leaves the previous revision's slot intact and
//! the staged bytes inert.

pub mod cache;

pub use cache::ReadTrxCache;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::{debug, info};

use crate::config::{BASE_REVISION, DATA_FILE_NAME};
use crate::index::avltree::{AvlTreeReader, AvlTreeWriter};
use crate::index::builder::IndexBuilder;
use crate::index::listener::{Change, IndexListener};
use crate::index::{DocumentSnapshot, IndexDef, PathFilter};
use crate::page::{
    AvlIndexPage, IndexSlot, KeyValuePage, Page, PageReference, RevisionRootPage, UberPage,
};
use crate::storage::{PageReader, PageWriter, StoreTarget};

/// A versioned store rooted at one directory.
///
/// The resource hands out transactions and enforces the single-writer
/// rule; it holds no file handles itself.
pub struct Resource {
    dir: PathBuf,
    write_lock: Arc<AtomicBool>,
    cache: ReadTrxCache,
}

impl Resource {
    /// Creates the resource directory and its initial empty files. The
    /// fresh resource is at revision 0 with nothing committed.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create resource directory {}", dir.display()))?;
        PageWriter::open(&dir)?.close()?;
        info!(dir = %dir.display(), "resource created");
        Ok(Self::handle(dir))
    }

    /// Opens an existing resource.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        ensure!(
            dir.join(DATA_FILE_NAME).exists(),
            "no resource at {}",
            dir.display()
        );
        Ok(Self::handle(dir))
    }

    fn handle(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Arc::new(AtomicBool::new(false)),
            cache: ReadTrxCache::new(),
        }
    }

    pub fn latest_revision(&self) -> Result<u64> {
        PageReader::open(&self.dir)?.latest_revision()
    }

    /// Begins the write transaction. Fails if one is already active.
    pub fn begin(&self) -> Result<PageWriteTrx> {
        ensure!(
            self.write_lock
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "a write transaction is already active on {}",
            self.dir.display()
        );
        PageWriteTrx::begin(&self.dir, Arc::clone(&self.write_lock)).inspect_err(|_| {
            self.write_lock.store(false, Ordering::Release);
        })
    }

    /// Opens a read transaction bound to `revision`.
    pub fn read(&self, revision: u64) -> Result<PageReadTrx> {
        PageReadTrx::open(&self.dir, revision)
    }

    /// Opens a read transaction bound to the latest committed revision.
    pub fn read_latest(&self) -> Result<PageReadTrx> {
        let latest = self.latest_revision()?;
        ensure!(
            latest > BASE_REVISION,
            "resource at {} has no committed revision to read",
            self.dir.display()
        );
        self.read(latest)
    }

    /// Shared variant of [`read`](Self::read); repeated calls for one
    /// revision reuse the cached transaction.
    pub fn read_shared(&self, revision: u64) -> Result<Arc<PageReadTrx>> {
        self.cache
            .get_or_open(revision, || PageReadTrx::open(&self.dir, revision))
    }

    /// Rolls the resource back so `revision` becomes the latest. Every
    /// later revision is discarded; `revision` itself (and everything
    /// below it) survives byte-identical.
    pub fn truncate_to(&self, revision: u64) -> Result<()> {
        ensure!(
            self.write_lock
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "cannot truncate while a write transaction is active"
        );
        let result = (|| -> Result<()> {
            let uber = PageReader::open(&self.dir)?.uber_reference_for(revision)?;
            let mut writer = PageWriter::open(&self.dir)?;
            writer.truncate_to(revision, &uber)?;
            writer.close()?;
            self.cache.close_all();
            Ok(())
        })();
        self.write_lock.store(false, Ordering::Release);
        result
    }
}

/// An immutable view of one committed revision.
#[derive(Debug)]
pub struct PageReadTrx {
    reader: PageReader,
    root: RevisionRootPage,
    records: KeyValuePage,
}

impl PageReadTrx {
    fn open(dir: &Path, revision: u64) -> Result<Self> {
        let mut reader = PageReader::open(dir)?;
        let root = reader.read_revision_root(revision)?;

        let records = match reader.read(&root.data_ref)? {
            Page::KeyValue(page) => page,
            other => bail!(
                "revision {} data reference points at a {:?} page",
                revision,
                other.kind()
            ),
        };

        Ok(Self {
            reader,
            root,
            records,
        })
    }

    pub fn revision(&self) -> u64 {
        self.root.revision_number
    }

    pub fn commit_timestamp_millis(&self) -> u64 {
        self.root.commit_timestamp_millis
    }

    pub fn max_record_key(&self) -> u64 {
        self.root.max_record_key
    }

    pub fn record(&self, record_key: u64) -> Option<&[u8]> {
        self.records.get(record_key)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Loads the index tree `index_def` had as of this revision.
    pub fn index_reader(&self, index_def: IndexDef) -> Result<AvlTreeReader> {
        let slot = self.root.slot(index_def.id).ok_or_else(|| {
            eyre!(
                "index {} does not exist in revision {}",
                index_def.id,
                self.root.revision_number
            )
        })?;
        match self.reader.read(&slot.reference)? {
            Page::AvlIndex(page) => Ok(AvlTreeReader::new(page)),
            other => bail!(
                "index slot {} points at a {:?} page",
                index_def.id,
                other.kind()
            ),
        }
    }

    /// Number of distinct keys in `index_def` as of this revision, from
    /// the slot metadata without loading the tree.
    pub fn index_entry_count(&self, index_def: IndexDef) -> Option<u64> {
        self.root.slot(index_def.id).map(|slot| slot.entry_count)
    }
}

struct WorkingIndex {
    def: IndexDef,
    page: AvlIndexPage,
}

/// The single write transaction, holding private working copies of every
/// page it touches.
pub struct PageWriteTrx {
    writer: PageWriter,
    reader: PageReader,
    base_revision: u64,
    previous_uber_offset: Option<u64>,
    base_slots: Vec<IndexSlot>,
    records: KeyValuePage,
    max_record_key: u64,
    indexes: BTreeMap<u32, WorkingIndex>,
    listeners: Vec<IndexListener>,
    lock: Arc<AtomicBool>,
    finished: bool,
}

impl PageWriteTrx {
    fn begin(dir: &Path, lock: Arc<AtomicBool>) -> Result<Self> {
        let writer = PageWriter::open(dir)?;
        let mut reader = PageReader::open(dir)?;

        let base_revision = reader.latest_revision()?;
        let (records, max_record_key, base_slots, previous_uber_offset) =
            if base_revision > BASE_REVISION {
                let uber = reader
                    .read_uber_page_reference()?
                    .ok_or_else(|| eyre!("latest revision {} has no uber page", base_revision))?;
                let root = reader.read_revision_root(base_revision)?;
                let records = match reader.read(&root.data_ref)? {
                    Page::KeyValue(page) => page,
                    other => bail!("data reference points at a {:?} page", other.kind()),
                };
                (records, root.max_record_key, root.index_slots, uber.offset())
            } else {
                (KeyValuePage::new(), 0, Vec::new(), None)
            };

        debug!(base_revision, "write transaction opened");
        Ok(Self {
            writer,
            reader,
            base_revision,
            previous_uber_offset,
            base_slots,
            records,
            max_record_key,
            indexes: BTreeMap::new(),
            listeners: Vec::new(),
            lock,
            finished: false,
        })
    }

    /// The revision this transaction forked from.
    pub fn base_revision(&self) -> u64 {
        self.base_revision
    }

    pub fn insert_record(&mut self, record_key: u64, value: Vec<u8>) {
        self.max_record_key = self.max_record_key.max(record_key);
        self.records.insert(record_key, value);
    }

    pub fn remove_record(&mut self, record_key: u64) -> bool {
        self.records.remove(record_key)
    }

    /// Reads through the working copy, so the transaction sees its own
    /// uncommitted changes.
    pub fn record(&self, record_key: u64) -> Option<&[u8]> {
        self.records.get(record_key)
    }

    /// Materializes a new index over `snapshot` and registers a listener
    /// to maintain it for the rest of this transaction.
    pub fn create_index(
        &mut self,
        index_def: IndexDef,
        filter: PathFilter,
        snapshot: &dyn DocumentSnapshot,
    ) -> Result<u64> {
        ensure!(
            !self.indexes.contains_key(&index_def.id)
                && self.base_slots.iter().all(|s| s.index_id != index_def.id),
            "index {} already exists",
            index_def.id
        );

        let mut page = AvlIndexPage::new();
        let indexed = IndexBuilder::new(index_def, filter.clone()).build(snapshot, &mut page)?;
        self.indexes
            .insert(index_def.id, WorkingIndex { def: index_def, page });
        self.listeners.push(IndexListener::new(index_def, filter));
        Ok(indexed)
    }

    /// Registers a listener maintaining an index that already exists in
    /// the base revision.
    pub fn register_listener(&mut self, index_def: IndexDef, filter: PathFilter) -> Result<()> {
        ensure!(
            self.listeners
                .iter()
                .all(|l| l.index_def().id != index_def.id),
            "index {} already has a listener",
            index_def.id
        );
        self.ensure_working_page(index_def)?;
        self.listeners.push(IndexListener::new(index_def, filter));
        Ok(())
    }

    /// Reports one document mutation to every registered listener.
    pub fn apply_change(&mut self, change: &Change) -> Result<()> {
        for listener in &self.listeners {
            let working = self
                .indexes
                .get_mut(&listener.index_def().id)
                .ok_or_else(|| {
                    eyre!("listener for index {} has no working page", listener.index_def().id)
                })?;
            listener.listen(change, &mut working.page)?;
        }
        Ok(())
    }

    /// Direct mutation handle on one index's working tree.
    pub fn index_writer(&mut self, index_def: IndexDef) -> Result<AvlTreeWriter<'_>> {
        self.ensure_working_page(index_def)?;
        // INVARIANT: ensure_working_page inserted the entry above.
        let working = self.indexes.get_mut(&index_def.id).unwrap();
        Ok(AvlTreeWriter::new(&mut working.page))
    }

    /// Seeds the working copy of `index_def`'s tree: the base revision's
    /// page if the index exists there, an empty tree otherwise.
    fn ensure_working_page(&mut self, index_def: IndexDef) -> Result<()> {
        if self.indexes.contains_key(&index_def.id) {
            return Ok(());
        }

        let page = match self.base_slots.iter().find(|s| s.index_id == index_def.id) {
            Some(slot) => match self.reader.read(&slot.reference)? {
                Page::AvlIndex(page) => page,
                other => bail!(
                    "index slot {} points at a {:?} page",
                    index_def.id,
                    other.kind()
                ),
            },
            None => AvlIndexPage::new(),
        };
        self.indexes
            .insert(index_def.id, WorkingIndex { def: index_def, page });
        Ok(())
    }

    /// Persists the working state as revision `base_revision + 1` and
    /// publishes it through the bootstrap slot. Consumes the transaction;
    /// the new revision number is returned.
    pub fn commit(mut self) -> Result<u64> {
        let revision = self.base_revision + 1;

        let mut data_ref = PageReference::with_page(Page::KeyValue(self.records.clone()));
        let mut index_refs: Vec<(IndexDef, u64, PageReference)> = Vec::new();
        for (_, working) in std::mem::take(&mut self.indexes) {
            let entry_count = working.page.len() as u64;
            let reference = PageReference::with_page(Page::AvlIndex(working.page));
            index_refs.push((working.def, entry_count, reference));
        }

        // Stage everything to the intent log before touching the data
        // file; a crash from here on leaves the bootstrap slot on the old
        // revision and the staged bytes unreachable.
        self.writer
            .write_page(&mut data_ref, StoreTarget::TransactionIntentLog)?;
        for (_, _, reference) in &mut index_refs {
            self.writer
                .write_page(reference, StoreTarget::TransactionIntentLog)?;
        }

        self.writer.write_page(&mut data_ref, StoreTarget::Data)?;
        let mut index_slots: Vec<IndexSlot> = self
            .base_slots
            .iter()
            .filter(|slot| {
                index_refs
                    .iter()
                    .all(|(def, _, _)| def.id != slot.index_id)
            })
            .cloned()
            .collect();
        for (def, entry_count, mut reference) in index_refs {
            self.writer.write_page(&mut reference, StoreTarget::Data)?;
            index_slots.push(IndexSlot {
                index_id: def.id,
                reference: reference.clone(),
                entry_count,
            });
        }
        index_slots.sort_by_key(|slot| slot.index_id);

        let root_page = RevisionRootPage {
            revision_number: revision,
            commit_timestamp_millis: unix_millis(),
            max_record_key: self.max_record_key,
            data_ref: data_ref.clone(),
            index_slots,
        };
        let mut root_ref = PageReference::with_page(Page::RevisionRoot(root_page));
        self.writer.write_page(&mut root_ref, StoreTarget::Data)?;

        let mut uber_page = UberPage::new(revision, self.previous_uber_offset);
        uber_page.root_ref = root_ref.clone();
        let mut uber_ref = PageReference::with_page(Page::Uber(uber_page));
        self.writer.write_uber_page_reference(&mut uber_ref)?;

        self.writer.clear_intent_log()?;
        self.finished = true;
        self.lock.store(false, Ordering::Release);
        info!(revision, "revision committed");
        Ok(revision)
    }

    /// Discards the working state. The resource stays at the base
    /// revision as if this transaction had never existed.
    pub fn abort(mut self) -> Result<()> {
        self.writer.clear_intent_log()?;
        self.finished = true;
        self.lock.store(false, Ordering::Release);
        debug!(base_revision = self.base_revision, "write transaction aborted");
        Ok(())
    }
}

impl Drop for PageWriteTrx {
    fn drop(&mut self) {
        if !self.finished {
            self.lock.store(false, Ordering::Release);
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
