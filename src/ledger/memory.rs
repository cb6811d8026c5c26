//! In-memory ledger for embedding and tests.

use super::{FiscalBookProvider, LedgerProvider};
use crate::error::{Result, SnapshotError};
use crate::types::{FiscalBookId, FiscalBookMetadata, Transaction};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Clone, Debug)]
struct BookEntry {
    metadata: FiscalBookMetadata,
    transactions: Vec<Transaction>,
}

/// Ledger and fiscal book provider backed by a map.
///
/// Not persistent. Supports injected latency and replace failures so callers
/// can exercise timeout and failure paths.
pub struct InMemoryLedger {
    books: RwLock<HashMap<FiscalBookId, BookEntry>>,
    next_id: AtomicU64,
    latency: Mutex<Option<Duration>>,
    fail_replace: AtomicBool,
    replace_count: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            latency: Mutex::new(None),
            fail_replace: AtomicBool::new(false),
            replace_count: AtomicU64::new(0),
        }
    }

    /// Register a fiscal book with its initial transactions.
    pub fn insert_book(
        &self,
        id: impl Into<FiscalBookId>,
        metadata: FiscalBookMetadata,
        transactions: Vec<Transaction>,
    ) {
        self.books.write().insert(
            id.into(),
            BookEntry {
                metadata,
                transactions,
            },
        );
    }

    /// Direct mutation of the live ledger, bypassing the snapshot subsystem.
    pub fn with_transactions<R>(
        &self,
        book: &FiscalBookId,
        edit: impl FnOnce(&mut Vec<Transaction>) -> R,
    ) -> Option<R> {
        self.books
            .write()
            .get_mut(book)
            .map(|entry| edit(&mut entry.transactions))
    }

    /// Snapshot-free read of the current transactions.
    pub fn transactions(&self, book: &FiscalBookId) -> Option<Vec<Transaction>> {
        self.books.read().get(book).map(|e| e.transactions.clone())
    }

    pub fn book_metadata(&self, book: &FiscalBookId) -> Option<FiscalBookMetadata> {
        self.books.read().get(book).map(|e| e.metadata.clone())
    }

    /// Delay every provider call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make `replace_transactions` fail without touching the ledger.
    pub fn set_fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `replace_transactions` calls.
    pub fn replace_count(&self) -> u64 {
        self.replace_count.load(Ordering::SeqCst)
    }

    fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerProvider for InMemoryLedger {
    fn get_transactions(&self, book: &FiscalBookId) -> Result<Vec<Transaction>> {
        self.simulate_latency();
        self.transactions(book)
            .ok_or_else(|| SnapshotError::FiscalBookNotFound(book.clone()))
    }

    fn replace_transactions(
        &self,
        book: &FiscalBookId,
        transactions: Vec<Transaction>,
    ) -> Result<()> {
        self.simulate_latency();
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(SnapshotError::Collaborator(format!(
                "ledger rejected replacement for {}",
                book
            )));
        }

        let mut books = self.books.write();
        let entry = books
            .get_mut(book)
            .ok_or_else(|| SnapshotError::FiscalBookNotFound(book.clone()))?;
        entry.transactions = transactions;
        self.replace_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl FiscalBookProvider for InMemoryLedger {
    fn metadata(&self, book: &FiscalBookId) -> Result<FiscalBookMetadata> {
        self.simulate_latency();
        self.book_metadata(book)
            .ok_or_else(|| SnapshotError::FiscalBookNotFound(book.clone()))
    }

    fn update_metadata(&self, book: &FiscalBookId, metadata: FiscalBookMetadata) -> Result<()> {
        self.simulate_latency();
        let mut books = self.books.write();
        let entry = books
            .get_mut(book)
            .ok_or_else(|| SnapshotError::FiscalBookNotFound(book.clone()))?;
        entry.metadata = metadata;
        Ok(())
    }

    fn create_book(&self, metadata: FiscalBookMetadata) -> Result<FiscalBookId> {
        self.simulate_latency();
        let mut books = self.books.write();
        let id = loop {
            let candidate = FiscalBookId(format!(
                "book-{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            ));
            if !books.contains_key(&candidate) {
                break candidate;
            }
        };
        books.insert(
            id.clone(),
            BookEntry {
                metadata,
                transactions: Vec::new(),
            },
        );
        Ok(id)
    }
}
