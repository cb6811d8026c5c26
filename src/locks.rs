//! Per-fiscal-book mutation locks.
//!
//! Every mutation touching a fiscal book's snapshots or its live ledger runs
//! while holding that book's lock. Locks for different books are independent.

use crate::error::{Result, SnapshotError};
use crate::types::FiscalBookId;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Guard held for the duration of a per-book mutation.
pub type BookGuard = parking_lot::lock_api::ArcMutexGuard<RawMutex, ()>;

/// Lazily created mutex per fiscal book.
#[derive(Default)]
pub struct BookLocks {
    locks: Mutex<HashMap<FiscalBookId, Arc<Mutex<()>>>>,
}

impl BookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `book`, waiting at most `timeout`.
    pub fn acquire(&self, book: &FiscalBookId, timeout: Duration) -> Result<BookGuard> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(book.clone()).or_default())
        };

        match lock.try_lock_arc_for(timeout) {
            Some(guard) => Ok(guard),
            None => {
                debug!(book = %book, ?timeout, "fiscal book lock wait expired");
                Err(SnapshotError::timeout(
                    format!("lock for fiscal book {}", book),
                    timeout,
                ))
            }
        }
    }

    /// Number of books that have had a lock created.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
