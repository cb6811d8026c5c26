//! Timeout-bounded collaborator calls.

use super::{FiscalBookProvider, LedgerProvider};
use crate::error::{Result, SnapshotError};
use crate::types::{FiscalBookId, FiscalBookMetadata, Transaction};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Run `op` on a helper thread and wait at most `timeout` for its result.
///
/// On expiry the helper thread is detached; its eventual result is dropped.
/// Only reads go through here. Writes use [`call_to_completion`].
pub fn call_with_timeout<T, F>(operation: &str, timeout: Duration, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let receiver = spawn_call(operation, op)?;

    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(operation, ?timeout, "collaborator call timed out");
            Err(SnapshotError::timeout(operation, timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(aborted(operation)),
    }
}

/// Outcome of a write that was waited on until it finished.
#[derive(Debug)]
#[must_use]
pub struct Settled<T> {
    pub result: Result<T>,
    /// The write finished after its deadline.
    pub overran: bool,
}

/// Run a write on a helper thread and wait until it has finished.
///
/// A write is never abandoned at `deadline`: it could still commit after the
/// caller reported failure and released the fiscal book's lock. Past the
/// deadline the wait goes on and the result comes back marked `overran`, so
/// the caller can decide from what the write actually did.
pub fn call_to_completion<T, F>(operation: &str, deadline: Duration, op: F) -> Settled<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let receiver = match spawn_call(operation, op) {
        Ok(receiver) => receiver,
        Err(e) => {
            return Settled {
                result: Err(e),
                overran: false,
            }
        }
    };

    match receiver.recv_timeout(deadline) {
        Ok(result) => Settled {
            result,
            overran: false,
        },
        Err(RecvTimeoutError::Timeout) => {
            warn!(operation, ?deadline, "write overran its deadline, waiting for it to settle");
            Settled {
                result: receiver.recv().unwrap_or_else(|_| Err(aborted(operation))),
                overran: true,
            }
        }
        Err(RecvTimeoutError::Disconnected) => Settled {
            result: Err(aborted(operation)),
            overran: false,
        },
    }
}

fn spawn_call<T, F>(operation: &str, op: F) -> Result<Receiver<Result<T>>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (sender, receiver) = bounded(1);

    thread::Builder::new()
        .name(format!("ledger-{}", operation))
        .spawn(move || {
            // Receiver may be gone after a timeout.
            let _ = sender.send(op());
        })?;

    Ok(receiver)
}

fn aborted(operation: &str) -> SnapshotError {
    SnapshotError::Collaborator(format!("{} aborted without a result", operation))
}

/// Ledger and fiscal book providers, with every call bounded by a timeout.
///
/// Reads fail with `Timeout` at the deadline. Writes return [`Settled`].
#[derive(Clone)]
pub struct Collaborators {
    ledger: Arc<dyn LedgerProvider>,
    books: Arc<dyn FiscalBookProvider>,
}

impl Collaborators {
    pub fn new(ledger: Arc<dyn LedgerProvider>, books: Arc<dyn FiscalBookProvider>) -> Self {
        Self { ledger, books }
    }

    /// Use one value that implements both provider traits.
    pub fn from_shared<P>(provider: Arc<P>) -> Self
    where
        P: LedgerProvider + FiscalBookProvider + 'static,
    {
        Self {
            ledger: Arc::clone(&provider) as Arc<dyn LedgerProvider>,
            books: provider as Arc<dyn FiscalBookProvider>,
        }
    }

    pub fn get_transactions(
        &self,
        book: &FiscalBookId,
        timeout: Duration,
    ) -> Result<Vec<Transaction>> {
        let ledger = Arc::clone(&self.ledger);
        let book = book.clone();
        call_with_timeout("get_transactions", timeout, move || {
            ledger.get_transactions(&book)
        })
    }

    pub fn replace_transactions(
        &self,
        book: &FiscalBookId,
        transactions: Vec<Transaction>,
        timeout: Duration,
    ) -> Settled<()> {
        let ledger = Arc::clone(&self.ledger);
        let book = book.clone();
        call_to_completion("replace_transactions", timeout, move || {
            ledger.replace_transactions(&book, transactions)
        })
    }

    pub fn metadata(&self, book: &FiscalBookId, timeout: Duration) -> Result<FiscalBookMetadata> {
        let books = Arc::clone(&self.books);
        let book = book.clone();
        call_with_timeout("get_metadata", timeout, move || books.metadata(&book))
    }

    pub fn display_name(&self, book: &FiscalBookId, timeout: Duration) -> Result<String> {
        let books = Arc::clone(&self.books);
        let book = book.clone();
        call_with_timeout("get_display_name", timeout, move || {
            books.display_name(&book)
        })
    }

    pub fn update_metadata(
        &self,
        book: &FiscalBookId,
        metadata: FiscalBookMetadata,
        timeout: Duration,
    ) -> Settled<()> {
        let books = Arc::clone(&self.books);
        let book = book.clone();
        call_to_completion("update_metadata", timeout, move || {
            books.update_metadata(&book, metadata)
        })
    }

    pub fn create_book(
        &self,
        metadata: FiscalBookMetadata,
        timeout: Duration,
    ) -> Settled<FiscalBookId> {
        let books = Arc::clone(&self.books);
        call_to_completion("create_book", timeout, move || books.create_book(metadata))
    }
}
