//! # Fiscal Snapshots
//!
//! Point-in-time snapshots of fiscal book ledgers, with diffing against the
//! live ledger, guarded rollback, and scheduled retention.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: Immutable value copies of a fiscal book's transactions
//! - **Comparison**: Key-based diff of a snapshot against the live ledger
//! - **Rollback**: Confirmed, backed-up full replacement of the live ledger
//! - **Schedules**: Automatic snapshots with retention pruning
//! - **Export**: JSON and CSV renderings of snapshots and comparisons
//!
//! The live ledger is owned by the host application and reached through the
//! [`LedgerProvider`] and [`FiscalBookProvider`] traits.
//!
//! ## Example
//!
//! ```ignore
//! use fiscal_snapshots::{
//!     Collaborators, CreateSnapshotOptions, InMemoryLedger, RollbackOptions, Store, StoreConfig,
//! };
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! let store = Store::open_or_create(
//!     StoreConfig {
//!         path: "./snapshots".into(),
//!         ..Default::default()
//!     },
//!     Collaborators::from_shared(ledger),
//! )?;
//!
//! let book = "fb-2024".into();
//! let snapshot = store.create_snapshot(&book, CreateSnapshotOptions::named("Before close"))?;
//!
//! // Later
//! let diff = store.compare_snapshot(&snapshot.id)?;
//! if !diff.is_identical() {
//!     store.rollback_to_snapshot(&snapshot.id, RollbackOptions::confirmed("Livro 2024"))?;
//! }
//! ```

pub mod clock;
pub mod compare;
pub mod error;
pub mod export;
pub mod ledger;
pub mod locks;
pub mod rollback;
pub mod schedule;
pub mod snapshots;
pub mod store;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use compare::{
    diff_transactions, ComparisonResult, ComparisonSummary, DiffCounts, FieldChange,
    ModifiedTransaction, SummaryDifferences, TransactionDiff, EMPTY_MARKER,
};
pub use error::{Result, SnapshotError};
pub use export::{Export, ExportFormat, Exportable};
pub use ledger::{Collaborators, FiscalBookProvider, InMemoryLedger, LedgerProvider, Settled};
pub use rollback::{
    CloneOverrides, RollbackCoordinator, RollbackOptions, RollbackOutcome, RollbackPhase,
};
pub use schedule::{
    Frequency, RunReport, ScheduleConfig, ScheduleFailure, ScheduleRegistry, Scheduler,
    SchedulerHandle, TriggerOutcome,
};
pub use snapshots::{normalize_tags, SnapshotIndex, SnapshotManager, SnapshotStorage};
pub use store::{Store, StoreConfig};
pub use types::*;
