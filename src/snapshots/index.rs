//! In-memory snapshot index.
//!
//! Holds a [`SnapshotSummary`] per snapshot so listing, tag filtering and
//! retention decisions never load captured transactions. Rebuilt from the
//! snapshot files when the store opens.

use crate::types::{FiscalBookId, Sequence, SnapshotId, SnapshotSummary};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::HashMap;

#[derive(Default)]
struct IndexInner {
    /// Snapshot ID to summary.
    by_id: HashMap<SnapshotId, SnapshotSummary>,

    /// Fiscal book to its snapshot IDs.
    by_book: HashMap<FiscalBookId, Vec<SnapshotId>>,

    /// Next sequence to assign.
    next_sequence: Sequence,
}

/// Index of snapshot summaries by id and fiscal book.
pub struct SnapshotIndex {
    inner: RwLock<IndexInner>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                next_sequence: Sequence(1),
                ..Default::default()
            }),
        }
    }

    /// Add or replace a summary.
    pub fn insert(&self, summary: SnapshotSummary) {
        let mut inner = self.inner.write();

        if summary.sequence >= inner.next_sequence {
            inner.next_sequence = summary.sequence.next();
        }

        if inner.by_id.contains_key(&summary.id) {
            inner.by_id.insert(summary.id.clone(), summary);
            return;
        }

        inner
            .by_book
            .entry(summary.fiscal_book_id.clone())
            .or_default()
            .push(summary.id.clone());
        inner.by_id.insert(summary.id.clone(), summary);
    }

    /// Remove a summary, returning it if present.
    pub fn remove(&self, id: &SnapshotId) -> Option<SnapshotSummary> {
        let mut inner = self.inner.write();
        let summary = inner.by_id.remove(id)?;

        if let Some(ids) = inner.by_book.get_mut(&summary.fiscal_book_id) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                inner.by_book.remove(&summary.fiscal_book_id);
            }
        }

        Some(summary)
    }

    pub fn get(&self, id: &SnapshotId) -> Option<SnapshotSummary> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Summaries for a fiscal book, newest first.
    pub fn list_book(&self, book: &FiscalBookId) -> Vec<SnapshotSummary> {
        let inner = self.inner.read();
        let mut summaries: Vec<SnapshotSummary> = inner
            .by_book
            .get(book)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        summaries.sort_by_key(|s| Reverse(s.order_key()));
        summaries
    }

    /// Reserve the next creation sequence.
    pub fn next_sequence(&self) -> Sequence {
        let mut inner = self.inner.write();
        let seq = inner.next_sequence;
        inner.next_sequence = seq.next();
        seq
    }

    pub fn count(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn book_count(&self) -> usize {
        self.inner.read().by_book.len()
    }

    pub fn protected_count(&self) -> usize {
        self.inner
            .read()
            .by_id
            .values()
            .filter(|s| s.is_protected)
            .count()
    }
}

impl Default for SnapshotIndex {
    fn default() -> Self {
        Self::new()
    }
}
