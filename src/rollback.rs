//! Rollback of a fiscal book to a snapshot.
//!
//! A rollback attempt moves through
//! `Idle -> Confirming -> BackingUp (optional) -> Restoring -> Done | Failed`.
//!
//! - Confirming: the caller's confirmation text must equal the fiscal book's
//!   display name, ignoring case and surrounding whitespace. Nothing is read
//!   under lock or written before this passes.
//! - BackingUp: a `pre-rollback` snapshot of the live ledger is written and
//!   fsynced. If that fails the rollback stops.
//! - Restoring: the live transactions are replaced wholesale by the
//!   snapshot's captured transactions, plus its metadata when it carries any.
//!   Writes are waited on until they finish, lock held. A write that lands
//!   past the timeout is undone and the rollback fails with `Timeout`, so the
//!   ledger always ends either fully restored or as it was.
//!
//! Everything after confirmation runs under the fiscal book's lock.
//! Rollbacks are never retried automatically.

use crate::error::{Result, SnapshotError};
use crate::snapshots::{CaptureRequest, SnapshotManager};
use crate::types::{CreationSource, FiscalBook, FiscalBookId, FiscalBookMetadata, SnapshotId};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tag put on every pre-rollback backup.
pub const PRE_ROLLBACK_TAG: &str = "pre-rollback";

/// Status given to clones of snapshots whose book metadata is unavailable.
pub const DEFAULT_CLONE_STATUS: &str = "Aberto";

/// Phase of a rollback attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackPhase {
    Idle,
    Confirming,
    BackingUp,
    Restoring,
    Done,
    Failed,
}

/// Options for a rollback.
#[derive(Clone, Debug)]
pub struct RollbackOptions {
    /// Must match the fiscal book's display name, case-insensitively.
    pub confirmation: String,
    /// Write a backup snapshot before restoring. Defaults to true.
    pub create_pre_rollback_snapshot: bool,
    /// Bound on each collaborator call (store default when `None`).
    pub timeout: Option<Duration>,
}

impl RollbackOptions {
    pub fn confirmed(confirmation: impl Into<String>) -> Self {
        Self {
            confirmation: confirmation.into(),
            create_pre_rollback_snapshot: true,
            timeout: None,
        }
    }

    /// Skip the pre-rollback backup.
    pub fn without_backup(mut self) -> Self {
        self.create_pre_rollback_snapshot = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a completed rollback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub restored_transaction_count: usize,
    /// The pre-rollback backup, when one was requested.
    pub backup_snapshot_id: Option<SnapshotId>,
    /// Phases visited, in order.
    pub phases: Vec<RollbackPhase>,
}

/// Overrides for a fiscal book cloned from a snapshot.
#[derive(Clone, Debug, Default)]
pub struct CloneOverrides {
    pub name: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
}

/// Case-insensitive, whitespace-trimmed exact match.
pub fn confirmation_matches(confirmation: &str, display_name: &str) -> bool {
    let confirmation = confirmation.trim();
    !confirmation.is_empty() && confirmation.to_lowercase() == display_name.trim().to_lowercase()
}

struct Attempt {
    snapshot: SnapshotId,
    phases: Vec<RollbackPhase>,
}

impl Attempt {
    fn new(snapshot: &SnapshotId) -> Self {
        Self {
            snapshot: snapshot.clone(),
            phases: vec![RollbackPhase::Idle],
        }
    }

    fn enter(&mut self, phase: RollbackPhase) {
        debug!(snapshot = %self.snapshot, ?phase, "rollback phase");
        self.phases.push(phase);
    }
}

/// Restores fiscal books from snapshots.
pub struct RollbackCoordinator<'a> {
    manager: &'a SnapshotManager,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(manager: &'a SnapshotManager) -> Self {
        Self { manager }
    }

    /// Roll the snapshot's fiscal book back to the snapshot.
    pub fn rollback(&self, id: &SnapshotId, options: RollbackOptions) -> Result<RollbackOutcome> {
        let mut attempt = Attempt::new(id);
        match self.run(id, &options, &mut attempt) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                attempt.enter(RollbackPhase::Failed);
                warn!(snapshot = %id, phases = ?attempt.phases, error = %e, "rollback failed");
                Err(e)
            }
        }
    }

    fn run(
        &self,
        id: &SnapshotId,
        options: &RollbackOptions,
        attempt: &mut Attempt,
    ) -> Result<RollbackOutcome> {
        let timeout = options.timeout.unwrap_or(self.manager.io_timeout());
        let collaborators = self.manager.collaborators();

        let book = self
            .manager
            .summary(id)
            .ok_or_else(|| SnapshotError::SnapshotNotFound(id.clone()))?
            .fiscal_book_id;

        attempt.enter(RollbackPhase::Confirming);
        let display_name = collaborators.display_name(&book, timeout)?;
        if !confirmation_matches(&options.confirmation, &display_name) {
            return Err(SnapshotError::ConfirmationMismatch(book));
        }

        let guard = self.manager.lock_book(&book)?;

        // May have been deleted between confirmation and now.
        let target = self.manager.get(id)?;

        let backup = if options.create_pre_rollback_snapshot {
            attempt.enter(RollbackPhase::BackingUp);
            let started = self.manager.clock().now();
            Some(self.manager.capture_locked(
                &guard,
                &book,
                CaptureRequest {
                    name: Some(format!(
                        "Pre-rollback backup {}",
                        started.to_rfc3339_opts(SecondsFormat::Secs, true)
                    )),
                    description: Some(format!(
                        "Ledger state before rolling back to '{}'",
                        target.name
                    )),
                    tags: vec![PRE_ROLLBACK_TAG.to_string()],
                    source: CreationSource::PreRollback,
                    capture_metadata: target.book_metadata.is_some(),
                    timeout,
                    created_at: Some(started),
                },
            )?)
        } else {
            None
        };

        attempt.enter(RollbackPhase::Restoring);

        // What the ledger holds now, to put back if the restore overruns.
        let previous_metadata = match target.book_metadata {
            Some(_) => Some(collaborators.metadata(&book, timeout)?),
            None => None,
        };
        let (backup_snapshot_id, previous_transactions) = match backup {
            Some(backup) => (Some(backup.id), backup.captured_transactions),
            None => (None, collaborators.get_transactions(&book, timeout)?),
        };

        if let Some(metadata) = &target.book_metadata {
            let settled = collaborators.update_metadata(&book, metadata.clone(), timeout);
            settled.result?;
            if settled.overran {
                self.revert_metadata(&book, previous_metadata, timeout);
                return Err(SnapshotError::timeout("update_metadata", timeout));
            }
        }

        let restored_transaction_count = target.captured_transactions.len();
        let settled =
            collaborators.replace_transactions(&book, target.captured_transactions, timeout);
        match settled.result {
            Ok(()) if settled.overran => {
                // Restored, but past the deadline: put the previous ledger back
                // so the reported Timeout holds.
                let undo = collaborators.replace_transactions(&book, previous_transactions, timeout);
                match undo.result {
                    Ok(()) => {
                        self.revert_metadata(&book, previous_metadata, timeout);
                        return Err(SnapshotError::timeout("replace_transactions", timeout));
                    }
                    Err(e) => {
                        warn!(
                            book = %book,
                            error = %e,
                            "could not undo a late restore, keeping the restored ledger"
                        );
                    }
                }
            }
            Ok(()) => {}
            Err(e) => {
                self.revert_metadata(&book, previous_metadata, timeout);
                return Err(e);
            }
        }

        attempt.enter(RollbackPhase::Done);
        drop(guard);

        info!(
            snapshot = %id,
            book = %book,
            restored = restored_transaction_count,
            backup = ?backup_snapshot_id,
            "rollback complete"
        );

        Ok(RollbackOutcome {
            restored_transaction_count,
            backup_snapshot_id,
            phases: attempt.phases.clone(),
        })
    }

    /// Put back the metadata replaced during Restoring. Waits for the write.
    fn revert_metadata(
        &self,
        book: &FiscalBookId,
        previous: Option<FiscalBookMetadata>,
        timeout: Duration,
    ) {
        let Some(previous) = previous else {
            return;
        };
        let settled = self
            .manager
            .collaborators()
            .update_metadata(book, previous, timeout);
        if let Err(e) = settled.result {
            warn!(book = %book, error = %e, "could not revert fiscal book metadata");
        }
    }

    /// Create a new fiscal book seeded with the snapshot's transactions.
    ///
    /// Tags and annotations stay with the snapshot; they are not copied.
    pub fn clone_to_new_fiscal_book(
        &self,
        id: &SnapshotId,
        overrides: CloneOverrides,
        timeout: Option<Duration>,
    ) -> Result<FiscalBook> {
        let timeout = timeout.unwrap_or(self.manager.io_timeout());
        let collaborators = self.manager.collaborators();
        let snapshot = self.manager.get(id)?;

        let base = match snapshot.book_metadata.clone() {
            Some(metadata) => metadata,
            None => match collaborators.metadata(&snapshot.fiscal_book_id, timeout) {
                Ok(metadata) => metadata,
                Err(SnapshotError::FiscalBookNotFound(_)) => {
                    FiscalBookMetadata::new(snapshot.name.clone(), DEFAULT_CLONE_STATUS)
                }
                Err(e) => return Err(e),
            },
        };

        let metadata = FiscalBookMetadata {
            name: overrides
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{} ({})", base.name, snapshot.name)),
            status: overrides.status.unwrap_or(base.status),
            description: overrides.description.or(base.description),
        };

        // Writes here are waited on to completion; the clone reports how they
        // ended even when they overran.
        let new_id = collaborators.create_book(metadata.clone(), timeout).result?;
        let guard = self.manager.lock_book(&new_id)?;
        collaborators
            .replace_transactions(&new_id, snapshot.captured_transactions, timeout)
            .result?;
        drop(guard);

        info!(snapshot = %id, source = %snapshot.fiscal_book_id, clone = %new_id, "fiscal book cloned");

        Ok(FiscalBook {
            id: new_id,
            metadata,
        })
    }
}
