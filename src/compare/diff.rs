//! Key-based transaction diff.
//!
//! Matches transactions by their persisted id and compares matched pairs
//! field by field:
//! - ids only in the live ledger are `added`
//! - ids only in the snapshot are `removed`
//! - ids in both with differing fields are `modified`
//! - everything else is `unchanged`

use crate::types::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Rendered in place of an absent field value.
pub const EMPTY_MARKER: &str = "(empty)";

/// One differing field of a modified transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: String,
    pub new_value: String,
}

/// A transaction present on both sides with at least one differing field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedTransaction {
    pub transaction_id: String,
    /// Version captured in the snapshot.
    pub snapshot: Transaction,
    /// Version in the live ledger.
    pub current: Transaction,
    pub changes: Vec<FieldChange>,
}

/// Four-way partition of two transaction sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDiff {
    pub added: Vec<Transaction>,
    pub removed: Vec<Transaction>,
    pub modified: Vec<ModifiedTransaction>,
    pub unchanged: Vec<Transaction>,
}

impl TransactionDiff {
    /// True when the live ledger matches the snapshot exactly.
    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Field-by-field differences between two versions of a transaction.
pub fn field_changes(old: &Transaction, new: &Transaction) -> Vec<FieldChange> {
    old.display_fields()
        .into_iter()
        .zip(new.display_fields())
        .filter(|((_, old_value), (_, new_value))| old_value != new_value)
        .map(|((field, old_value), (_, new_value))| FieldChange {
            field: field.to_string(),
            old_value: old_value.unwrap_or_else(|| EMPTY_MARKER.to_string()),
            new_value: new_value.unwrap_or_else(|| EMPTY_MARKER.to_string()),
        })
        .collect()
}

/// Diff snapshot transactions against the live ledger.
///
/// `added` keeps ledger order; the other sets keep snapshot order. Repeated
/// ids are paired in order of occurrence; copies without a partner on the
/// other side are reported as added or removed.
pub fn diff_transactions(snapshot: &[Transaction], current: &[Transaction]) -> TransactionDiff {
    let mut current_by_id: HashMap<&str, VecDeque<usize>> = HashMap::with_capacity(current.len());
    for (pos, tx) in current.iter().enumerate() {
        current_by_id.entry(tx.id.as_str()).or_default().push_back(pos);
    }

    let mut matched = vec![false; current.len()];
    let mut diff = TransactionDiff::default();

    for old in snapshot {
        let counterpart = current_by_id
            .get_mut(old.id.as_str())
            .and_then(VecDeque::pop_front);

        match counterpart {
            Some(pos) => {
                matched[pos] = true;
                let new = &current[pos];
                let changes = field_changes(old, new);
                if changes.is_empty() {
                    diff.unchanged.push(old.clone());
                } else {
                    diff.modified.push(ModifiedTransaction {
                        transaction_id: old.id.clone(),
                        snapshot: old.clone(),
                        current: new.clone(),
                        changes,
                    });
                }
            }
            None => diff.removed.push(old.clone()),
        }
    }

    diff.added = current
        .iter()
        .zip(matched)
        .filter(|(_, was_matched)| !was_matched)
        .map(|(tx, _)| tx.clone())
        .collect();

    diff
}
