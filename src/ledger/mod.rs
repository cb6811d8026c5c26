//! Collaborators owning the live ledger and fiscal book metadata.
//!
//! The snapshot subsystem never owns the live transactions. It reads and
//! replaces them through [`LedgerProvider`] and resolves fiscal books through
//! [`FiscalBookProvider`]. Calls go through [`Collaborators`], which bounds
//! each one by a timeout.

mod bounded;
mod memory;

pub use bounded::{call_to_completion, call_with_timeout, Collaborators, Settled};
pub use memory::InMemoryLedger;

use crate::error::Result;
use crate::types::{FiscalBookId, FiscalBookMetadata, Transaction};

/// Access to the live transactions of a fiscal book.
pub trait LedgerProvider: Send + Sync {
    /// Current transactions, in ledger order.
    fn get_transactions(&self, book: &FiscalBookId) -> Result<Vec<Transaction>>;

    /// Replace the whole transaction set. Must be atomic: either every
    /// transaction is replaced or the ledger is left untouched.
    fn replace_transactions(&self, book: &FiscalBookId, transactions: Vec<Transaction>)
        -> Result<()>;
}

/// Access to fiscal book metadata and lifecycle.
pub trait FiscalBookProvider: Send + Sync {
    /// Metadata for `book`, or `FiscalBookNotFound`.
    fn metadata(&self, book: &FiscalBookId) -> Result<FiscalBookMetadata>;

    /// Name shown to users; rollback confirmations are matched against it.
    fn display_name(&self, book: &FiscalBookId) -> Result<String> {
        Ok(self.metadata(book)?.name)
    }

    fn update_metadata(&self, book: &FiscalBookId, metadata: FiscalBookMetadata) -> Result<()>;

    /// Create an empty fiscal book and return its id.
    fn create_book(&self, metadata: FiscalBookMetadata) -> Result<FiscalBookId>;
}
