//! # Storage Module
//!
//! The on-disk layer: append-only page records in a data file, an
//! advisory revision offset side file, and a per-transaction intent log.
//!
//! ## File Layout
//!
//! ```text
//! <resource dir>/
//!   data.rdb        [bootstrap slot: 8B LE uber offset][page records...]
//!   revisions.ofs   [8B LE revision-root offset per revision]
//!   intent.log      [unaligned staged page records]
//! ```
//!
//! Every page record is `[u32 LE length][codec bytes]`. Records in the
//! data file are never rewritten; commits append and then repoint the
//! bootstrap slot. All byte access goes through scoped mmap views
//! ([`mmap::MappedRegion`] / [`mmap::MappedRegionMut`]).
//!
//! ## Integrity
//!
//! Each persisted page's CRC64 digest travels in its [`PageReference`];
//! the reader recomputes it on every load and surfaces a mismatch as
//! [`StorageError::Corruption`](crate::error::StorageError).

pub mod mmap;
pub mod offsets;
pub mod reader;
pub mod writer;

pub use offsets::RevisionOffsetFile;
pub use reader::PageReader;
pub use writer::{PageWriter, StoreTarget};

use crc::{Crc, CRC_64_ECMA_182};

const PAGE_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Integrity digest over a page's serialized bytes.
pub(crate) fn page_hash(bytes: &[u8]) -> u64 {
    PAGE_CRC.checksum(bytes)
}
