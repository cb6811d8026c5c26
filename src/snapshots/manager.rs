//! Snapshot manager: creation, listing, deletion and the mutable fields.

use super::index::SnapshotIndex;
use super::storage::SnapshotStorage;
use super::tags::{normalize_filter, normalize_tags};
use crate::clock::Clock;
use crate::error::{Result, SnapshotError};
use crate::ledger::Collaborators;
use crate::locks::{BookGuard, BookLocks};
use crate::types::{
    check_amounts, Annotation, CreateSnapshotOptions, CreationSource, FiscalBookId, ListOptions,
    Snapshot, SnapshotId, SnapshotStatistics, SnapshotSummary,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What to capture for a new snapshot.
#[derive(Clone, Debug)]
pub(crate) struct CaptureRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Already normalized.
    pub tags: Vec<String>,
    pub source: CreationSource,
    pub capture_metadata: bool,
    pub timeout: Duration,
    /// Creation time; the store clock's current time when `None`.
    pub created_at: Option<DateTime<Utc>>,
}

/// The snapshot store.
///
/// Snapshot records are the single source of truth; every mutation goes
/// through this type and holds the owning fiscal book's lock.
pub struct SnapshotManager {
    storage: SnapshotStorage,
    index: SnapshotIndex,
    locks: Arc<BookLocks>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    io_timeout: Duration,
    lock_timeout: Duration,
}

impl SnapshotManager {
    pub(crate) fn new(
        storage: SnapshotStorage,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        io_timeout: Duration,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            index: SnapshotIndex::new(),
            locks: Arc::new(BookLocks::new()),
            collaborators,
            clock,
            io_timeout,
            lock_timeout,
        }
    }

    /// Rebuild the index from the snapshot files on disk.
    pub(crate) fn load_existing(&self) -> Result<usize> {
        let snapshots = self.storage.load_all()?;
        let count = snapshots.len();
        for snapshot in snapshots {
            self.index.insert(snapshot.summary());
        }
        debug!(count, "snapshot index rebuilt");
        Ok(count)
    }

    // --- Snapshot Operations ---

    /// Capture the current ledger of `book` as a new manual snapshot.
    pub fn create(&self, book: &FiscalBookId, options: CreateSnapshotOptions) -> Result<Snapshot> {
        let tags = normalize_tags(&options.tags)?;
        let request = CaptureRequest {
            name: options.name,
            description: options.description,
            tags,
            source: CreationSource::Manual,
            capture_metadata: options.capture_metadata,
            timeout: options.timeout.unwrap_or(self.io_timeout),
            created_at: None,
        };

        let guard = self.lock_book(book)?;
        self.capture_locked(&guard, book, request)
    }

    /// Get a snapshot by id.
    pub fn get(&self, id: &SnapshotId) -> Result<Snapshot> {
        let summary = self
            .index
            .get(id)
            .ok_or_else(|| SnapshotError::SnapshotNotFound(id.clone()))?;
        self.load(&summary.fiscal_book_id, id)
    }

    /// Snapshots of `book`, newest first, filtered and paginated.
    pub fn list(&self, book: &FiscalBookId, options: &ListOptions) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for summary in self.list_summaries(book, options) {
            match self.load(book, &summary.id) {
                Ok(snapshot) => snapshots.push(snapshot),
                // Deleted since the index was read.
                Err(SnapshotError::SnapshotNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }

    /// Like [`list`](Self::list) but without loading captured transactions.
    pub fn list_summaries(&self, book: &FiscalBookId, options: &ListOptions) -> Vec<SnapshotSummary> {
        let filter = options
            .tags
            .as_ref()
            .map(|tags| normalize_filter(tags))
            .filter(|tags| !tags.is_empty());

        self.index
            .list_book(book)
            .into_iter()
            .filter(|summary| match &filter {
                Some(tags) => tags.iter().any(|t| summary.tags.contains(t)),
                None => true,
            })
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Delete a snapshot. Protected snapshots are never deleted.
    pub fn delete(&self, id: &SnapshotId) -> Result<()> {
        let summary = self
            .index
            .get(id)
            .ok_or_else(|| SnapshotError::SnapshotNotFound(id.clone()))?;
        let guard = self.lock_book(&summary.fiscal_book_id)?;
        self.delete_locked(&guard, id)
    }

    /// Replace the tag set wholesale.
    pub fn update_tags<S: AsRef<str>>(&self, id: &SnapshotId, tags: &[S]) -> Result<Snapshot> {
        let tags = normalize_tags(tags)?;
        self.mutate(id, |snapshot| {
            if snapshot.tags == tags {
                return Ok(false);
            }
            snapshot.tags = tags;
            Ok(true)
        })
    }

    /// Set the protection flag. Setting the current value is a no-op.
    pub fn toggle_protection(&self, id: &SnapshotId, is_protected: bool) -> Result<Snapshot> {
        let snapshot = self.mutate(id, |snapshot| {
            if snapshot.is_protected == is_protected {
                return Ok(false);
            }
            snapshot.is_protected = is_protected;
            Ok(true)
        })?;
        info!(snapshot = %id, is_protected, "snapshot protection set");
        Ok(snapshot)
    }

    /// Append an annotation.
    pub fn add_annotation(
        &self,
        id: &SnapshotId,
        content: &str,
        created_by: &str,
    ) -> Result<Snapshot> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SnapshotError::validation("annotation content must not be empty"));
        }
        let created_by = created_by.trim();
        if created_by.is_empty() {
            return Err(SnapshotError::validation("annotation author must not be empty"));
        }

        let annotation = Annotation {
            content: content.to_string(),
            created_by: created_by.to_string(),
            created_at: self.clock.now(),
        };

        self.mutate(id, move |snapshot| {
            snapshot.annotations.push(annotation);
            Ok(true)
        })
    }

    // --- Crate-internal Operations ---

    /// Acquire the mutation lock of `book`.
    pub(crate) fn lock_book(&self, book: &FiscalBookId) -> Result<BookGuard> {
        self.locks.acquire(book, self.lock_timeout)
    }

    /// Capture a snapshot while the caller holds the book's lock.
    ///
    /// The snapshot is durable on disk before this returns.
    pub(crate) fn capture_locked(
        &self,
        _guard: &BookGuard,
        book: &FiscalBookId,
        request: CaptureRequest,
    ) -> Result<Snapshot> {
        // Fails with FiscalBookNotFound for unknown books.
        let metadata = self.collaborators.metadata(book, request.timeout)?;
        let captured_transactions = self.collaborators.get_transactions(book, request.timeout)?;
        check_amounts(&captured_transactions)?;

        let created_at = request.created_at.unwrap_or_else(|| self.clock.now());
        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Snapshot {}", created_at.format("%Y-%m-%d")));
        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let snapshot = Snapshot {
            id: SnapshotId::generate(),
            sequence: self.index.next_sequence(),
            fiscal_book_id: book.clone(),
            name,
            description,
            tags: request.tags,
            is_protected: false,
            creation_source: request.source,
            statistics: SnapshotStatistics::from_transactions(&captured_transactions),
            captured_transactions,
            book_metadata: request.capture_metadata.then_some(metadata),
            annotations: Vec::new(),
            created_at,
        };

        self.storage.write(&snapshot)?;
        self.index.insert(snapshot.summary());

        info!(
            snapshot = %snapshot.id,
            book = %book,
            source = snapshot.creation_source.as_str(),
            transactions = snapshot.statistics.transaction_count,
            "snapshot created"
        );

        Ok(snapshot)
    }

    /// Delete a snapshot while the caller holds the book's lock.
    ///
    /// This is the only deletion path; the protection check lives here.
    pub(crate) fn delete_locked(&self, _guard: &BookGuard, id: &SnapshotId) -> Result<()> {
        let summary = self
            .index
            .get(id)
            .ok_or_else(|| SnapshotError::SnapshotNotFound(id.clone()))?;

        if summary.is_protected {
            return Err(SnapshotError::Protected(id.clone()));
        }

        self.storage.delete(&summary.fiscal_book_id, id)?;
        self.index.remove(id);

        info!(
            snapshot = %id,
            book = %summary.fiscal_book_id,
            source = summary.creation_source.as_str(),
            "snapshot deleted"
        );
        Ok(())
    }

    /// Summary lookup without loading the snapshot.
    pub(crate) fn summary(&self, id: &SnapshotId) -> Option<SnapshotSummary> {
        self.index.get(id)
    }

    pub(crate) fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub(crate) fn storage(&self) -> &SnapshotStorage {
        &self.storage
    }

    pub(crate) fn index(&self) -> &SnapshotIndex {
        &self.index
    }

    // --- Private Helpers ---

    fn load(&self, book: &FiscalBookId, id: &SnapshotId) -> Result<Snapshot> {
        self.storage
            .read(book, id)?
            .ok_or_else(|| SnapshotError::SnapshotNotFound(id.clone()))
    }

    /// Apply an edit to the mutable fields under the book lock.
    ///
    /// `edit` returns whether anything changed; unchanged snapshots are not
    /// rewritten. The file is written before the index is updated, so a
    /// failed write leaves the store as it was.
    fn mutate<F>(&self, id: &SnapshotId, edit: F) -> Result<Snapshot>
    where
        F: FnOnce(&mut Snapshot) -> Result<bool>,
    {
        let book = self
            .index
            .get(id)
            .ok_or_else(|| SnapshotError::SnapshotNotFound(id.clone()))?
            .fiscal_book_id;

        let _guard = self.lock_book(&book)?;
        if self.index.get(id).is_none() {
            return Err(SnapshotError::SnapshotNotFound(id.clone()));
        }

        let mut snapshot = self.load(&book, id)?;
        if edit(&mut snapshot)? {
            self.storage.write(&snapshot)?;
            self.index.insert(snapshot.summary());
            debug!(snapshot = %id, "snapshot updated");
        }

        Ok(snapshot)
    }
}
