//! # revdb Layout Constants
//!
//! This module centralizes the on-disk layout constants, grouping
//! interdependent values together and documenting their relationships.
//! Constants that depend on each other are co-located to prevent mismatch
//! bugs between the writer and the reader.
//!
//! ## Dependency Graph
//!
//! ```text
//! BOOTSTRAP_SLOT_SIZE (8 bytes at offset 0)
//!       │
//!       └─> FIRST_BEACON (must be > BOOTSTRAP_SLOT_SIZE)
//!             The first page record begins here; anything below this
//!             offset is reserved for the bootstrap slot.
//!
//! PAGE_FRAGMENT_ALIGN (8)
//!       │
//!       ├─> FIRST_BEACON (must be a multiple; the first record is a
//!       │     page fragment like any other)
//!       │
//!       └─> REVISION_ROOT_ALIGN (256, must be a multiple of 8 so a
//!             revision-root offset also satisfies the fragment rule)
//!
//! LENGTH_PREFIX_SIZE (4)
//!       │
//!       └─> PageReference::length = serialized_len + LENGTH_PREFIX_SIZE
//!
//! REVISION_OFFSET_ENTRY_SIZE (8)
//!       │
//!       └─> revisions.ofs entry i  <->  revision i + 1
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `FIRST_BEACON > BOOTSTRAP_SLOT_SIZE` (first record never overlaps
//!    the bootstrap slot)
//! 2. `FIRST_BEACON % PAGE_FRAGMENT_ALIGN == 0` (the first record is
//!    already aligned; the writer never pads at offset FIRST_BEACON)
//! 3. `REVISION_ROOT_ALIGN % PAGE_FRAGMENT_ALIGN == 0` (revision-root
//!    alignment implies fragment alignment)
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{FIRST_BEACON, REVISION_ROOT_ALIGN};
//! ```

// ============================================================================
// DATA FILE LAYOUT
// These define the fundamental byte layout of the primary data file
// ============================================================================

/// Byte offset of the bootstrap slot in the data file.
/// The slot holds the absolute offset of the latest uber page, little-endian.
pub const BOOTSTRAP_SLOT_OFFSET: u64 = 0;

/// Size of the bootstrap slot in bytes.
pub const BOOTSTRAP_SLOT_SIZE: u64 = 8;

/// Offset at which the first page record begins.
/// Chosen above the bootstrap slot and aligned to PAGE_FRAGMENT_ALIGN so the
/// writer never needs to pad the very first record.
pub const FIRST_BEACON: u64 = 16;

/// Alignment for revision-root page records in the data file.
/// Revision roots are the entry points of the backward chain walk; the
/// coarser alignment keeps their offsets recognizable and allows the layout
/// to evolve without moving them.
pub const REVISION_ROOT_ALIGN: u64 = 256;

/// Alignment for every other page record in the data file.
pub const PAGE_FRAGMENT_ALIGN: u64 = 8;

/// Size of the length prefix framing each page record.
/// Each record is `[u32 little-endian length][length bytes of codec output]`.
pub const LENGTH_PREFIX_SIZE: u64 = 4;

const _: () = assert!(
    FIRST_BEACON > BOOTSTRAP_SLOT_SIZE,
    "FIRST_BEACON must leave room for the bootstrap slot"
);

const _: () = assert!(
    FIRST_BEACON % PAGE_FRAGMENT_ALIGN == 0,
    "FIRST_BEACON must satisfy page-fragment alignment"
);

const _: () = assert!(
    REVISION_ROOT_ALIGN % PAGE_FRAGMENT_ALIGN == 0,
    "revision-root alignment must imply page-fragment alignment"
);

// ============================================================================
// REVISION OFFSET FILE
// ============================================================================

/// Size of one entry in the revision offset file.
/// Entry `i` holds the absolute data-file offset of revision `i + 1`'s
/// revision-root page record.
pub const REVISION_OFFSET_ENTRY_SIZE: u64 = 8;

// ============================================================================
// RESOURCE FILE NAMES
// A resource is a directory holding exactly these three files
// ============================================================================

/// Primary data file: bootstrap slot + appended page records.
pub const DATA_FILE_NAME: &str = "data.rdb";

/// Revision offset side file: one 8-byte offset per committed revision.
pub const REVISION_OFFSET_FILE_NAME: &str = "revisions.ofs";

/// Transaction-intent log: unaligned page records staged before commit.
pub const INTENT_LOG_FILE_NAME: &str = "intent.log";

// ============================================================================
// REVISION NUMBERING
// ============================================================================

/// The revision number of the empty, pre-commit state.
/// The first commit produces revision BASE_REVISION + 1.
pub const BASE_REVISION: u64 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_beacon_clears_bootstrap_slot() {
        assert!(FIRST_BEACON >= BOOTSTRAP_SLOT_OFFSET + BOOTSTRAP_SLOT_SIZE);
    }

    #[test]
    fn alignments_are_powers_of_two() {
        assert!(REVISION_ROOT_ALIGN.is_power_of_two());
        assert!(PAGE_FRAGMENT_ALIGN.is_power_of_two());
    }

    #[test]
    fn revision_root_alignment_implies_fragment_alignment() {
        assert_eq!(REVISION_ROOT_ALIGN % PAGE_FRAGMENT_ALIGN, 0);
    }
}
