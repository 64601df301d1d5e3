//! Cache of open read transactions, keyed by revision.
//!
//! Opening a read transaction loads the revision root and its record page;
//! callers that repeatedly consult the same historical revision share one
//! [`PageReadTrx`] through this cache instead of paying that cost per
//! lookup. Committed revisions are immutable, so a cached transaction
//! never goes stale; truncation is the one event that invalidates entries,
//! and the resource drains the cache before cutting the file.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use super::PageReadTrx;

#[derive(Default)]
pub struct ReadTrxCache {
    inner: Mutex<HashMap<u64, Arc<PageReadTrx>>>,
}

impl ReadTrxCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached transaction for `revision`, opening one through
    /// `open` on a miss.
    pub fn get_or_open(
        &self,
        revision: u64,
        open: impl FnOnce() -> Result<PageReadTrx>,
    ) -> Result<Arc<PageReadTrx>> {
        if let Some(trx) = self.inner.lock().get(&revision) {
            return Ok(Arc::clone(trx));
        }

        // The open happens outside the lock so a slow disk never blocks
        // hits on other revisions. Two racers may both open; the second
        // insert wins and the loser's copy just drops.
        let trx = Arc::new(open()?);
        self.inner.lock().insert(revision, Arc::clone(&trx));
        Ok(trx)
    }

    /// Drops every cached transaction. Readers still holding an `Arc`
    /// keep their snapshot alive until they finish.
    pub fn close_all(&self) {
        self.inner.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
