//! Main Store struct tying all components together.

use crate::clock::{Clock, SystemClock};
use crate::compare::{compare_snapshot, ComparisonResult};
use crate::error::{Result, SnapshotError};
use crate::export::{self, Export, ExportFormat, Exportable};
use crate::ledger::Collaborators;
use crate::rollback::{CloneOverrides, RollbackCoordinator, RollbackOptions, RollbackOutcome};
use crate::schedule::{
    RunReport, ScheduleConfig, ScheduleRegistry, Scheduler, SchedulerHandle, TriggerOutcome,
};
use crate::snapshots::{SnapshotManager, SnapshotStorage};
use crate::types::{
    CreateSnapshotOptions, FiscalBook, FiscalBookId, ListOptions, Snapshot, SnapshotId,
    SnapshotSummary, StoreStats,
};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Snapshot cache size (number of snapshots).
    pub snapshot_cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Default bound on each ledger or fiscal-book call.
    pub io_timeout: Duration,

    /// Bound on waiting for a fiscal book's lock.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./snapshots"),
            snapshot_cache_size: 64,
            create_if_missing: true,
            io_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(60),
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"FSS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// The snapshot store.
///
/// Provides a unified interface for:
/// - Creating, listing, tagging, protecting and deleting snapshots
/// - Comparing snapshots with the live ledger
/// - Rolling fiscal books back and cloning snapshots into new books
/// - Automatic snapshot schedules and retention
/// - Exporting snapshots and comparisons
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Snapshot records and their index.
    manager: Arc<SnapshotManager>,

    /// Schedules by fiscal book.
    registry: Arc<ScheduleRegistry>,

    scheduler: Scheduler,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig, collaborators: Collaborators) -> Result<Self> {
        Self::open_or_create_with_clock(config, collaborators, Arc::new(SystemClock))
    }

    /// Like [`open_or_create`](Self::open_or_create) with a custom clock.
    pub fn open_or_create_with_clock(
        config: StoreConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open_with_clock(config, collaborators, clock)
        } else if config.create_if_missing {
            Self::create_with_clock(config, collaborators, clock)
        } else {
            Err(SnapshotError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig, collaborators: Collaborators) -> Result<Self> {
        Self::create_with_clock(config, collaborators, Arc::new(SystemClock))
    }

    pub fn create_with_clock(
        config: StoreConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // Create directory structure
        fs::create_dir_all(&config.path)?;
        fs::create_dir_all(config.path.join("snapshots"))?;

        // Acquire lock
        let lock_file = Self::acquire_lock(&config.path)?;

        // Write manifest
        Self::write_manifest(&config.path)?;

        Self::assemble(config, lock_file, collaborators, clock)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig, collaborators: Collaborators) -> Result<Self> {
        Self::open_with_clock(config, collaborators, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: StoreConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // Acquire lock
        let lock_file = Self::acquire_lock(&config.path)?;

        // Verify manifest
        Self::verify_manifest(&config.path)?;

        Self::assemble(config, lock_file, collaborators, clock)
    }

    fn assemble(
        config: StoreConfig,
        lock_file: File,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = SnapshotStorage::new(
            config.path.join("snapshots"),
            config.snapshot_cache_size,
        )?;
        let manager = Arc::new(SnapshotManager::new(
            storage,
            collaborators,
            clock,
            config.io_timeout,
            config.lock_timeout,
        ));
        let loaded = manager.load_existing()?;

        let registry = Arc::new(ScheduleRegistry::load(config.path.join("schedules.bin"))?);
        let scheduler = Scheduler::new(Arc::clone(&manager), Arc::clone(&registry));

        info!(
            path = %config.path.display(),
            snapshots = loaded,
            schedules = registry.len(),
            "snapshot store opened"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            manager,
            registry,
            scheduler,
        })
    }

    // --- Snapshot Operations ---

    /// Capture the current ledger of `book`.
    pub fn create_snapshot(
        &self,
        book: &FiscalBookId,
        options: CreateSnapshotOptions,
    ) -> Result<Snapshot> {
        self.manager.create(book, options)
    }

    pub fn get_snapshot(&self, id: &SnapshotId) -> Result<Snapshot> {
        self.manager.get(id)
    }

    /// Snapshots of `book`, newest first.
    pub fn list_snapshots(&self, book: &FiscalBookId, options: &ListOptions) -> Result<Vec<Snapshot>> {
        self.manager.list(book, options)
    }

    /// Like [`list_snapshots`](Self::list_snapshots) without the captured
    /// transactions.
    pub fn list_snapshot_summaries(
        &self,
        book: &FiscalBookId,
        options: &ListOptions,
    ) -> Vec<SnapshotSummary> {
        self.manager.list_summaries(book, options)
    }

    /// Delete a snapshot. Fails with `Protected` for protected snapshots.
    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
        self.manager.delete(id)
    }

    pub fn update_tags<S: AsRef<str>>(&self, id: &SnapshotId, tags: &[S]) -> Result<Snapshot> {
        self.manager.update_tags(id, tags)
    }

    pub fn toggle_protection(&self, id: &SnapshotId, is_protected: bool) -> Result<Snapshot> {
        self.manager.toggle_protection(id, is_protected)
    }

    pub fn add_annotation(
        &self,
        id: &SnapshotId,
        content: &str,
        created_by: &str,
    ) -> Result<Snapshot> {
        self.manager.add_annotation(id, content, created_by)
    }

    // --- Comparison ---

    /// Compare a snapshot with the live ledger.
    pub fn compare_snapshot(&self, id: &SnapshotId) -> Result<ComparisonResult> {
        self.compare_within(id, self.config.io_timeout)
    }

    /// Compare with an explicit bound on the ledger read.
    pub fn compare_within(&self, id: &SnapshotId, timeout: Duration) -> Result<ComparisonResult> {
        compare_snapshot(&self.manager, id, timeout)
    }

    // --- Rollback ---

    /// Replace the fiscal book's ledger with the snapshot's transactions.
    ///
    /// Never retried automatically, including after a `Timeout`.
    pub fn rollback_to_snapshot(
        &self,
        id: &SnapshotId,
        options: RollbackOptions,
    ) -> Result<RollbackOutcome> {
        RollbackCoordinator::new(&self.manager).rollback(id, options)
    }

    /// Create a new fiscal book from a snapshot.
    pub fn clone_to_new_fiscal_book(
        &self,
        id: &SnapshotId,
        overrides: CloneOverrides,
    ) -> Result<FiscalBook> {
        RollbackCoordinator::new(&self.manager).clone_to_new_fiscal_book(id, overrides, None)
    }

    // --- Schedule Operations ---

    pub fn get_schedule(&self, book: &FiscalBookId) -> Option<ScheduleConfig> {
        self.registry.get(book)
    }

    /// Validate and upsert a fiscal book's schedule.
    pub fn update_schedule(
        &self,
        book: &FiscalBookId,
        config: ScheduleConfig,
    ) -> Result<ScheduleConfig> {
        let config = config.validated()?;

        // Fails with FiscalBookNotFound for unknown books.
        self.manager
            .collaborators()
            .metadata(book, self.config.io_timeout)?;

        self.registry.upsert(book, config.clone())?;
        info!(
            book = %book,
            enabled = config.enabled,
            frequency = config.frequency.as_str(),
            retention_count = config.retention_count,
            "schedule updated"
        );
        Ok(config)
    }

    /// Hook for the fiscal-book collaborator, called right before it commits
    /// a status transition.
    pub fn trigger_before_status_change(
        &self,
        book: &FiscalBookId,
    ) -> Result<Option<TriggerOutcome>> {
        self.scheduler.trigger_before_status_change(book)
    }

    /// Run every schedule due now.
    pub fn run_scheduler(&self) -> RunReport {
        self.scheduler.run_due()
    }

    /// Run the schedules due at `now`; snapshots taken are dated `now`.
    pub fn run_scheduler_at(&self, now: DateTime<Utc>) -> RunReport {
        self.scheduler.run_due_at(now)
    }

    /// Run the scheduler every `interval` on a background thread.
    ///
    /// Shut the handle down before dropping the store.
    pub fn spawn_scheduler(&self, interval: Duration) -> Result<SchedulerHandle> {
        self.scheduler.clone().spawn(interval)
    }

    // --- Export ---

    pub fn export_snapshot(&self, id: &SnapshotId, format: ExportFormat) -> Result<Export> {
        let snapshot = self.manager.get(id)?;
        export::render(Exportable::Snapshot(&snapshot), format, self.today())
    }

    /// Compare, then export the comparison.
    pub fn export_comparison(&self, id: &SnapshotId, format: ExportFormat) -> Result<Export> {
        if format == ExportFormat::Pdf {
            return Err(SnapshotError::UnsupportedFormat(format.to_string()));
        }
        let comparison = self.compare_snapshot(id)?;
        export::render(Exportable::Comparison(&comparison), format, self.today())
    }

    // --- Store Operations ---

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let index = self.manager.index();
        Ok(StoreStats {
            snapshot_count: index.count() as u64,
            fiscal_book_count: index.book_count() as u64,
            protected_count: index.protected_count() as u64,
            schedule_count: self.registry.len() as u64,
            total_size_bytes: self.manager.storage().total_size()?,
        })
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn today(&self) -> chrono::NaiveDate {
        self.manager.clock().now().date_naive()
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(SnapshotError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| SnapshotError::Locked)?;

        Ok(lock_file)
    }
}
