//! # Page References
//!
//! A [`PageReference`] is the addressable handle for one page: its on-disk
//! coordinates, framed length, integrity hash, and (if resident) the
//! deserialized page object. Every page instance has exactly one owner, the
//! reference that was used to fetch or create it; references are never
//! shared between pages.
//!
//! ## Coordinate Fields
//!
//! Exactly one of `offset` / `persistent_log_offset` is meaningful,
//! depending on which store wrote the page: the primary data file records
//! `offset`, the transaction-intent log records `persistent_log_offset`.
//! Both start out unset and are published by the writer only after the
//! framed bytes are durably on disk.
//!
//! ## On-Disk Representation
//!
//! When a reference is embedded inside another page (an uber page's root
//! reference, a revision root's data and index references) it is serialized
//! as the fixed 20-byte [`RefRepr`]:
//!
//! ```text
//! Offset  Size  Field   Description
//! ------  ----  ------  -------------------------------------
//! 0       8     offset  absolute data-file offset (LE)
//! 8       4     length  framed length: serialized + 4 (LE)
//! 12      8     hash    CRC64 over the serialized bytes (LE)
//! ```
//!
//! Only data-file coordinates are ever embedded; intent-log records are
//! staging artifacts and their coordinates die with the transaction.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::Page;

/// Sentinel for an absent offset in the on-disk representation.
const NO_OFFSET: u64 = u64::MAX;

/// Size of the embedded on-disk representation.
pub const REF_REPR_SIZE: usize = 20;

/// Addressable handle for one page.
#[derive(Debug, Default)]
pub struct PageReference {
    offset: Option<u64>,
    persistent_log_offset: Option<u64>,
    length: u32,
    hash: Option<u64>,
    page: Option<Box<Page>>,
}

impl PageReference {
    /// An empty reference: no coordinates, no resident page.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reference owning a freshly created, not-yet-written page.
    pub fn with_page(page: Page) -> Self {
        Self {
            page: Some(Box::new(page)),
            ..Self::default()
        }
    }

    /// A reference to a known data-file coordinate (used for chain walks
    /// where only the offset is known; length and hash are then taken from
    /// the frame itself).
    pub fn at_offset(offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..Self::default()
        }
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    pub fn persistent_log_offset(&self) -> Option<u64> {
        self.persistent_log_offset
    }

    pub fn set_persistent_log_offset(&mut self, offset: u64) {
        self.persistent_log_offset = Some(offset);
    }

    /// Framed length: serialized length plus the 4-byte prefix.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn set_length(&mut self, length: u32) {
        self.length = length;
    }

    pub fn hash(&self) -> Option<u64> {
        self.hash
    }

    pub fn set_hash(&mut self, hash: u64) {
        self.hash = Some(hash);
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_deref()
    }

    pub fn page_mut(&mut self) -> Option<&mut Page> {
        self.page.as_deref_mut()
    }

    pub fn set_page(&mut self, page: Page) {
        self.page = Some(Box::new(page));
    }

    /// Detaches the resident page, leaving the coordinates in place.
    pub fn take_page(&mut self) -> Option<Page> {
        self.page.take().map(|boxed| *boxed)
    }

    /// True once the writer has published a coordinate for either target.
    pub fn is_persisted(&self) -> bool {
        self.offset.is_some() || self.persistent_log_offset.is_some()
    }

    /// Serializes the data-file coordinates into the embedded form.
    /// Fails if the page behind this reference was never written.
    pub fn to_repr(&self) -> Result<RefRepr> {
        let offset = self.offset.ok_or_else(|| {
            eyre::eyre!("cannot embed a page reference that has no data-file offset")
        })?;
        ensure!(
            self.hash.is_some() && self.length > 0,
            "cannot embed a page reference before its frame is written"
        );

        Ok(RefRepr {
            offset: U64::new(offset),
            length: U32::new(self.length),
            hash: U64::new(self.hash.unwrap_or(0)),
        })
    }

    /// Rebuilds a reference from its embedded form.
    pub fn from_repr(repr: &RefRepr) -> Self {
        let offset = repr.offset.get();
        Self {
            offset: (offset != NO_OFFSET).then_some(offset),
            persistent_log_offset: None,
            length: repr.length.get(),
            hash: Some(repr.hash.get()),
            page: None,
        }
    }
}

/// Coordinates compare; the resident page does not. Two references to the
/// same frame are equal whether or not one of them currently holds the
/// deserialized page.
impl PartialEq for PageReference {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.persistent_log_offset == other.persistent_log_offset
            && self.length == other.length
            && self.hash == other.hash
    }
}

impl Eq for PageReference {}

impl Clone for PageReference {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            persistent_log_offset: self.persistent_log_offset,
            length: self.length,
            hash: self.hash,
            page: None,
        }
    }
}

/// Fixed-width embedded representation of a data-file page reference.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RefRepr {
    offset: U64,
    length: U32,
    hash: U64,
}

const _: () = assert!(std::mem::size_of::<RefRepr>() == REF_REPR_SIZE);

impl RefRepr {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= REF_REPR_SIZE,
            "buffer too small for RefRepr: {} < {}",
            bytes.len(),
            REF_REPR_SIZE
        );

        Self::ref_from_bytes(&bytes[..REF_REPR_SIZE])
            .map_err(|e| eyre::eyre!("failed to read RefRepr: {:?}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn repr_is_20_bytes() {
        assert_eq!(std::mem::size_of::<RefRepr>(), REF_REPR_SIZE);
    }

    #[test]
    fn repr_round_trip() {
        let mut reference = PageReference::new();
        reference.set_offset(4096);
        reference.set_length(132);
        reference.set_hash(0xDEAD_BEEF_CAFE_F00D);

        let repr = reference.to_repr().unwrap();
        let bytes = repr.as_bytes().to_vec();
        let parsed = RefRepr::from_bytes(&bytes).unwrap();
        let rebuilt = PageReference::from_repr(parsed);

        assert_eq!(rebuilt, reference);
    }

    #[test]
    fn unwritten_reference_cannot_be_embedded() {
        let reference = PageReference::new();
        assert!(reference.to_repr().is_err());

        let mut with_offset = PageReference::at_offset(256);
        assert!(with_offset.to_repr().is_err());
        with_offset.set_length(40);
        with_offset.set_hash(7);
        assert!(with_offset.to_repr().is_ok());
    }

    #[test]
    fn equality_ignores_resident_page() {
        let mut a = PageReference::at_offset(512);
        a.set_length(16);
        a.set_hash(1);

        let mut b = a.clone();
        b.set_page(Page::KeyValue(crate::page::KeyValuePage::new()));

        assert_eq!(a, b);
        assert!(b.page().is_some());
        assert!(a.page().is_none());
    }

    #[test]
    fn take_page_leaves_coordinates() {
        let mut reference = PageReference::with_page(Page::KeyValue(
            crate::page::KeyValuePage::new(),
        ));
        reference.set_offset(768);

        let page = reference.take_page();
        assert!(page.is_some());
        assert!(reference.page().is_none());
        assert_eq!(reference.offset(), Some(768));
    }
}
