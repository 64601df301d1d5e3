//! Storage error taxonomy.
//!
//! revdb surfaces failures through `eyre::Report` like the rest of the crate,
//! but the storage layer attaches a typed [`StorageError`] as the root cause
//! so callers can distinguish the classes that matter operationally:
//! corruption, a missing revision, and plain I/O failure. Tests and embedders
//! recover the typed value with `report.downcast_ref::<StorageError>()`.
//!
//! The `AlignmentViolation` and `TreeInvariant` variants are defensive: they
//! mark conditions the design rules out by construction, and firing one means
//! a bug in this crate rather than bad input.

use std::io;
use thiserror::Error;

/// Errors that can occur in the page store and index tree.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying read, write, or map operation failed.
    #[error("storage I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Length-prefix or hash mismatch while reading a page record.
    #[error("corrupted page record at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    /// The revision chain was exhausted without finding the target revision.
    #[error("revision {revision} not found (latest is {latest})")]
    RevisionNotFound { revision: u64, latest: u64 },

    /// A page record offset violates the alignment rules of its kind.
    #[error("offset {offset} violates {align}-byte alignment")]
    AlignmentViolation { offset: u64, align: u64 },

    /// The AVL tree violated its ordering or balance invariant.
    #[error("index tree invariant violated: {reason}")]
    TreeInvariant { reason: String },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a tree-invariant error.
    pub fn tree_invariant(reason: impl Into<String>) -> Self {
        Self::TreeInvariant {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::AlignmentViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        let err = StorageError::corruption(256, "hash mismatch");
        assert!(err.is_corruption());

        let err = StorageError::AlignmentViolation {
            offset: 13,
            align: 8,
        };
        assert!(err.is_corruption());

        let err = StorageError::RevisionNotFound {
            revision: 9,
            latest: 3,
        };
        assert!(!err.is_corruption());
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no data file");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[test]
    fn downcast_through_eyre() {
        let report: eyre::Report = StorageError::RevisionNotFound {
            revision: 4,
            latest: 2,
        }
        .into();

        let inner = report.downcast_ref::<StorageError>().unwrap();
        assert!(matches!(
            inner,
            StorageError::RevisionNotFound {
                revision: 4,
                latest: 2
            }
        ));
    }
}
