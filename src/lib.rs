//! # revdb - Versioned Embedded Page Store
//!
//! revdb is an embedded storage engine that never overwrites committed
//! data. Every commit appends a new revision built from copy-on-write
//! pages; any historical revision stays readable forever (or until an
//! explicit rollback cuts it away). This implementation prioritizes:
//!
//! - **Append-only durability**: committed bytes are immutable; a commit
//!   is published by one 8-byte bootstrap-slot rewrite
//! - **Scoped I/O**: every read and write maps exactly the bytes it
//!   touches, so address-space use tracks one operation, not the file
//! - **Verified reads**: every page record carries a CRC64 digest checked
//!   on load
//!
//! ## Quick Start
//!
//! ```ignore
//! use revdb::trx::Resource;
//!
//! let resource = Resource::create("./mydb")?;
//!
//! let mut trx = resource.begin()?;
//! trx.insert_record(1, b"alice".to_vec());
//! let revision = trx.commit()?;
//!
//! let read = resource.read(revision)?;
//! assert_eq!(read.record(1), Some(b"alice".as_ref()));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Resource (trx lifecycle)          │
//! ├─────────────────────────────────────────┤
//! │ PageWriteTrx (one) │ PageReadTrx (many)  │
//! ├────────────────────┴────────────────────┤
//! │  Secondary Indexes (persistent AVL)      │
//! ├─────────────────────────────────────────┤
//! │  Page Model + Codec (zerocopy headers)   │
//! ├─────────────────────────────────────────┤
//! │  PageWriter / PageReader (CRC, align)    │
//! ├─────────────────────────────────────────┤
//! │  Scoped Memory-Mapped File Views         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A resource is a directory of three files:
//!
//! ```text
//! resource_dir/
//! ├── data.rdb        # bootstrap slot + append-only page records
//! ├── revisions.ofs   # revision number -> root offset side file
//! └── intent.log      # staged records of the in-flight transaction
//! ```
//!
//! Revisions form a backward chain of uber pages through the data file;
//! the bootstrap slot at offset 0 names the latest one.

pub mod config;
pub mod encoding;
pub mod error;
pub mod index;
pub mod page;
pub mod storage;
pub mod trx;

pub use error::StorageError;
pub use index::{open_index, IndexDef, IndexKind, SearchMode};
pub use trx::{PageReadTrx, PageWriteTrx, Resource};
