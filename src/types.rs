//! Core types for fiscal book snapshots.

use crate::error::{Result, SnapshotError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a fiscal book (the ledger owning the transactions).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiscalBookId(pub String);

impl FiscalBookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe key for this book (hex SHA-256 of the id).
    ///
    /// Book ids come from the host application and may contain path
    /// separators, so they are never used as directory names directly.
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for FiscalBookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiscalBookId({})", self.0)
    }
}

impl fmt::Display for FiscalBookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FiscalBookId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FiscalBookId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a snapshot.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    /// Create a new random snapshot ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can safely name a file inside the store.
    pub(crate) fn is_storage_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store-wide creation counter.
///
/// Orders snapshots created within the same clock tick.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Direction of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }
}

/// A single ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Persisted transaction id, stable across edits.
    pub id: String,
    pub date: NaiveDate,
    pub description: String,
    /// Absolute value in minor units (cents).
    pub amount_cents: i64,
    pub kind: TransactionKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    /// Invoice or receipt reference.
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Names of the comparable transaction fields, in display order.
pub const TRANSACTION_FIELDS: [&str; 8] = [
    "date",
    "description",
    "kind",
    "amount",
    "category",
    "counterparty",
    "document",
    "notes",
];

impl Transaction {
    pub fn new(
        id: impl Into<String>,
        date: NaiveDate,
        description: impl Into<String>,
        amount_cents: i64,
        kind: TransactionKind,
    ) -> Self {
        Self {
            id: id.into(),
            date,
            description: description.into(),
            amount_cents,
            kind,
            category: None,
            counterparty: None,
            document: None,
            notes: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    /// Amounts are absolute; `kind` carries the direction.
    pub fn check_amount(&self) -> Result<()> {
        if self.amount_cents < 0 {
            return Err(SnapshotError::validation(format!(
                "transaction {} has a negative amount ({})",
                self.id,
                format_amount(self.amount_cents)
            )));
        }
        Ok(())
    }

    /// Field values rendered for display, aligned with [`TRANSACTION_FIELDS`].
    ///
    /// `None` means the field is absent on this transaction.
    pub fn display_fields(&self) -> [(&'static str, Option<String>); 8] {
        [
            ("date", Some(self.date.format("%Y-%m-%d").to_string())),
            ("description", Some(self.description.clone())),
            ("kind", Some(self.kind.as_str().to_string())),
            ("amount", Some(format_amount(self.amount_cents))),
            ("category", self.category.clone()),
            ("counterparty", self.counterparty.clone()),
            ("document", self.document.clone()),
            ("notes", self.notes.clone()),
        ]
    }
}

/// Render minor units as a plain decimal string (`-1234.56`).
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Fiscal book metadata owned by the fiscal-book collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalBookMetadata {
    /// Display name, used for rollback confirmation.
    pub name: String,
    /// Status label, e.g. "Aberto" or "Fechado".
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl FiscalBookMetadata {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            description: None,
        }
    }
}

/// A fiscal book as returned by the collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalBook {
    pub id: FiscalBookId,
    pub metadata: FiscalBookMetadata,
}

/// Who created a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreationSource {
    Manual,
    Scheduled,
    PreRollback,
}

impl CreationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationSource::Manual => "manual",
            CreationSource::Scheduled => "scheduled",
            CreationSource::PreRollback => "pre-rollback",
        }
    }
}

/// An append-only note attached to a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Reject ledgers with negative amounts before they are captured or totalled.
pub fn check_amounts(transactions: &[Transaction]) -> Result<()> {
    transactions.iter().try_for_each(Transaction::check_amount)
}

/// Aggregates derived from a set of transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    pub transaction_count: u64,
    pub total_income: i64,
    pub total_expenses: i64,
    pub net_amount: i64,
}

impl SnapshotStatistics {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let (total_income, total_expenses) =
            transactions
                .iter()
                .fold((0i64, 0i64), |(income, expenses), tx| match tx.kind {
                    TransactionKind::Income => (income.saturating_add(tx.amount_cents), expenses),
                    TransactionKind::Expense => (income, expenses.saturating_add(tx.amount_cents)),
                });

        Self {
            transaction_count: transactions.len() as u64,
            total_income,
            total_expenses,
            net_amount: total_income.saturating_sub(total_expenses),
        }
    }
}

/// An immutable capture of a fiscal book's transactions.
///
/// Only `tags`, `is_protected` and `annotations` change after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub sequence: Sequence,
    pub fiscal_book_id: FiscalBookId,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub is_protected: bool,
    pub creation_source: CreationSource,
    pub captured_transactions: Vec<Transaction>,
    /// Book metadata captured at creation, restored on rollback when present.
    pub book_metadata: Option<FiscalBookMetadata>,
    pub statistics: SnapshotStatistics,
    pub annotations: Vec<Annotation>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Header view without the captured transactions.
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            sequence: self.sequence,
            fiscal_book_id: self.fiscal_book_id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            is_protected: self.is_protected,
            creation_source: self.creation_source,
            statistics: self.statistics,
            created_at: self.created_at,
        }
    }

    /// True when any of the given (normalized) tags is on this snapshot.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// Snapshot header kept in the in-memory index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub sequence: Sequence,
    pub fiscal_book_id: FiscalBookId,
    pub name: String,
    pub tags: Vec<String>,
    pub is_protected: bool,
    pub creation_source: CreationSource,
    pub statistics: SnapshotStatistics,
    pub created_at: DateTime<Utc>,
}

impl SnapshotSummary {
    /// Sort key: creation time, then sequence.
    pub fn order_key(&self) -> (DateTime<Utc>, Sequence) {
        (self.created_at, self.sequence)
    }
}

/// Options for creating a snapshot.
#[derive(Clone, Debug, Default)]
pub struct CreateSnapshotOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Capture the fiscal book's metadata so a rollback restores it too.
    pub capture_metadata: bool,
    /// Bound on ledger I/O (store default when `None`).
    pub timeout: Option<Duration>,
}

impl CreateSnapshotOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Options for listing snapshots.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Keep snapshots carrying at least one of these tags.
    pub tags: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub snapshot_count: u64,
    pub fiscal_book_count: u64,
    pub protected_count: u64,
    pub schedule_count: u64,
    pub total_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_negative_amount_rejected() {
        let ok = Transaction::new("t1", date(1), "Sale", 0, TransactionKind::Income);
        let bad = Transaction::new("t2", date(2), "Refund", -150, TransactionKind::Expense);
        assert!(ok.check_amount().is_ok());
        assert!(matches!(
            check_amounts(&[ok, bad]),
            Err(SnapshotError::Validation(msg)) if msg.contains("t2")
        ));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(123456), "1234.56");
        assert_eq!(format_amount(-1999), "-19.99");
    }

    #[test]
    fn test_statistics() {
        let txs = vec![
            Transaction::new("t1", date(1), "Sale", 10_000, TransactionKind::Income),
            Transaction::new("t2", date(2), "Rent", 4_000, TransactionKind::Expense),
            Transaction::new("t3", date(3), "Sale", 2_500, TransactionKind::Income),
        ];

        let stats = SnapshotStatistics::from_transactions(&txs);
        assert_eq!(stats.transaction_count, 3);
        assert_eq!(stats.total_income, 12_500);
        assert_eq!(stats.total_expenses, 4_000);
        assert_eq!(stats.net_amount, 8_500);
    }

    #[test]
    fn test_storage_key_is_path_safe() {
        let key = FiscalBookId::new("../../etc/passwd").storage_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_snapshot_id_storage_safety() {
        assert!(SnapshotId::generate().is_storage_safe());
        assert!(!SnapshotId::from_string("../x").is_storage_safe());
        assert!(!SnapshotId::from_string("").is_storage_safe());
    }

    #[test]
    fn test_display_fields_mark_absent_values() {
        let tx = Transaction::new("t1", date(4), "Fee", 150, TransactionKind::Expense)
            .with_category("bank");
        let fields = tx.display_fields();

        assert_eq!(fields[0], ("date", Some("2024-03-04".to_string())));
        assert_eq!(fields[3], ("amount", Some("1.50".to_string())));
        assert_eq!(fields[4], ("category", Some("bank".to_string())));
        assert_eq!(fields[5], ("counterparty", None));
        assert_eq!(
            fields.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            TRANSACTION_FIELDS.to_vec()
        );
    }
}
