//! Snapshot comparison against the live ledger.
//!
//! Comparison is read-only: it takes no fiscal book lock and never writes.
//! The ledger read is a point-in-time read; a concurrent ledger mutation may
//! or may not be reflected.

mod diff;

pub use diff::{
    diff_transactions, field_changes, FieldChange, ModifiedTransaction, TransactionDiff,
    EMPTY_MARKER,
};

use crate::error::Result;
use crate::snapshots::SnapshotManager;
use crate::types::{check_amounts, FiscalBookId, SnapshotId, SnapshotStatistics, Transaction};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Cardinalities of the four diff categories.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

/// Signed deltas, `current - snapshot`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDifferences {
    pub transaction_count_diff: i64,
    pub net_amount_diff: i64,
}

/// Aggregates of both sides and their differences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub snapshot: SnapshotStatistics,
    pub current: SnapshotStatistics,
    pub differences: SummaryDifferences,
}

impl ComparisonSummary {
    pub fn new(snapshot: SnapshotStatistics, current: SnapshotStatistics) -> Self {
        Self {
            snapshot,
            current,
            differences: SummaryDifferences {
                transaction_count_diff: current.transaction_count as i64
                    - snapshot.transaction_count as i64,
                net_amount_diff: current.net_amount.saturating_sub(snapshot.net_amount),
            },
        }
    }
}

/// Result of comparing a snapshot with the live ledger. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub snapshot_id: SnapshotId,
    pub snapshot_name: String,
    pub fiscal_book_id: FiscalBookId,
    pub added: Vec<Transaction>,
    pub removed: Vec<Transaction>,
    pub modified: Vec<ModifiedTransaction>,
    pub unchanged: Vec<Transaction>,
    pub counts: DiffCounts,
    pub summary: ComparisonSummary,
}

impl ComparisonResult {
    /// True when the live ledger matches the snapshot exactly.
    pub fn is_identical(&self) -> bool {
        self.counts.added == 0 && self.counts.removed == 0 && self.counts.modified == 0
    }
}

/// Compare snapshot `id` with the live ledger of its fiscal book.
pub fn compare_snapshot(
    manager: &SnapshotManager,
    id: &SnapshotId,
    timeout: Duration,
) -> Result<ComparisonResult> {
    let snapshot = manager.get(id)?;
    let current = manager
        .collaborators()
        .get_transactions(&snapshot.fiscal_book_id, timeout)?;
    check_amounts(&current)?;

    let diff = diff_transactions(&snapshot.captured_transactions, &current);
    let counts = DiffCounts {
        added: diff.added.len(),
        removed: diff.removed.len(),
        modified: diff.modified.len(),
        unchanged: diff.unchanged.len(),
    };
    let summary = ComparisonSummary::new(
        snapshot.statistics,
        SnapshotStatistics::from_transactions(&current),
    );

    debug!(
        snapshot = %id,
        added = counts.added,
        removed = counts.removed,
        modified = counts.modified,
        "snapshot compared"
    );

    Ok(ComparisonResult {
        snapshot_id: snapshot.id,
        snapshot_name: snapshot.name,
        fiscal_book_id: snapshot.fiscal_book_id,
        added: diff.added,
        removed: diff.removed,
        modified: diff.modified,
        unchanged: diff.unchanged,
        counts,
        summary,
    })
}
