//! Integration tests for the snapshot store.

use chrono::{NaiveDate, TimeZone, Utc};
use fiscal_snapshots::{
    CloneOverrides, Collaborators, CreateSnapshotOptions, CreationSource, ExportFormat,
    FiscalBookId, FiscalBookMetadata, InMemoryLedger, ListOptions, ManualClock, RollbackOptions,
    RollbackPhase, ScheduleConfig, Store, StoreConfig, Transaction, TransactionKind,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const BOOK: &str = "fb-2024";

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        snapshot_cache_size: 16,
        create_if_missing: true,
        io_timeout: Duration::from_secs(5),
        lock_timeout: Duration::from_secs(5),
    }
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn transactions() -> Vec<Transaction> {
    vec![
        Transaction::new("t1", date(1), "Consulting fee", 250_000, TransactionKind::Income)
            .with_counterparty("ACME Ltda"),
        Transaction::new("t2", date(4), "Office rent", 120_000, TransactionKind::Expense)
            .with_category("rent"),
        Transaction::new("t3", date(9), "Software license", 8_990, TransactionKind::Expense),
    ]
}

fn test_ledger() -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_book(
        BOOK,
        FiscalBookMetadata::new("Livro Teste", "Aberto"),
        transactions(),
    );
    ledger
}

/// Route the store's logs to the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_store(dir: &TempDir, ledger: &Arc<InMemoryLedger>) -> Store {
    init_tracing();
    Store::create(config(dir), Collaborators::from_shared(Arc::clone(ledger))).unwrap()
}

fn book() -> FiscalBookId {
    FiscalBookId::new(BOOK)
}

// --- Snapshot Workflow Tests ---

#[test]
fn test_snapshot_is_a_value_copy() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::named("Before edits"))
        .unwrap();
    assert_eq!(snapshot.captured_transactions, transactions());
    assert_eq!(snapshot.statistics.transaction_count, 3);
    assert_eq!(snapshot.statistics.total_income, 250_000);
    assert_eq!(snapshot.statistics.total_expenses, 128_990);
    assert_eq!(snapshot.statistics.net_amount, 121_010);
    assert_eq!(snapshot.creation_source, CreationSource::Manual);

    // Mutate the live ledger behind the store's back
    ledger.with_transactions(&book(), |txs| {
        txs[0].amount_cents = 1;
        txs.pop();
    });

    let reloaded = store.get_snapshot(&snapshot.id).unwrap();
    assert_eq!(reloaded.captured_transactions, transactions());
    assert_eq!(reloaded.statistics, snapshot.statistics);
}

#[test]
fn test_default_name_and_tag_normalization() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap(),
    ));
    let store =
        Store::create_with_clock(config(&dir), Collaborators::from_shared(ledger), clock).unwrap();

    let snapshot = store
        .create_snapshot(
            &book(),
            CreateSnapshotOptions::default().with_tags(["  Audit-Ready ", "audit-ready", "Q1"]),
        )
        .unwrap();
    assert_eq!(snapshot.name, "Snapshot 2024-03-15");
    assert_eq!(snapshot.tags, vec!["audit-ready", "q1"]);

    let once = store.update_tags(&snapshot.id, &["Closing", " closing "]).unwrap();
    let twice = store.update_tags(&snapshot.id, &once.tags).unwrap();
    assert_eq!(once.tags, vec!["closing"]);
    assert_eq!(once, twice);
}

#[test]
fn test_list_order_filter_and_pagination() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    for (name, tags) in [
        ("first", vec!["month-end"]),
        ("second", vec![]),
        ("third", vec!["month-end", "audit"]),
        ("fourth", vec!["audit"]),
    ] {
        store
            .create_snapshot(&book(), CreateSnapshotOptions::named(name).with_tags(tags))
            .unwrap();
    }

    let names = |snapshots: Vec<fiscal_snapshots::Snapshot>| {
        snapshots.into_iter().map(|s| s.name).collect::<Vec<_>>()
    };

    let all = store.list_snapshots(&book(), &ListOptions::default()).unwrap();
    assert_eq!(names(all), vec!["fourth", "third", "second", "first"]);

    let month_end = store
        .list_snapshots(
            &book(),
            &ListOptions {
                tags: Some(vec!["Month-End".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(names(month_end), vec!["third", "first"]);

    let page = store
        .list_snapshots(
            &book(),
            &ListOptions {
                tags: None,
                skip: Some(1),
                limit: Some(2),
            },
        )
        .unwrap();
    assert_eq!(names(page), vec!["third", "second"]);

    let other = store
        .list_snapshots(&FiscalBookId::new("other"), &ListOptions::default())
        .unwrap();
    assert!(other.is_empty());
}

#[test]
fn test_annotations_append() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::default())
        .unwrap();

    store
        .add_annotation(&snapshot.id, "  Reviewed by accounting ", "maria")
        .unwrap();
    let annotated = store
        .add_annotation(&snapshot.id, "Approved", "joão")
        .unwrap();

    assert_eq!(annotated.annotations.len(), 2);
    assert_eq!(annotated.annotations[0].content, "Reviewed by accounting");
    assert_eq!(annotated.annotations[1].created_by, "joão");
    // Immutable fields untouched
    assert_eq!(annotated.captured_transactions, snapshot.captured_transactions);
    assert_eq!(annotated.created_at, snapshot.created_at);
}

// --- Comparison Tests ---

#[test]
fn test_compare_reports_all_categories() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::named("Baseline"))
        .unwrap();

    ledger.with_transactions(&book(), |txs| {
        txs.retain(|t| t.id != "t3");
        txs[1].amount_cents = 130_000;
        txs[1].category = None;
        txs.push(Transaction::new(
            "t4",
            date(20),
            "Client refund",
            5_000,
            TransactionKind::Expense,
        ));
    });

    let comparison = store.compare_snapshot(&snapshot.id).unwrap();
    assert_eq!(comparison.counts.added, 1);
    assert_eq!(comparison.counts.removed, 1);
    assert_eq!(comparison.counts.modified, 1);
    assert_eq!(comparison.counts.unchanged, 1);
    assert_eq!(comparison.added[0].id, "t4");
    assert_eq!(comparison.removed[0].id, "t3");

    let modified = &comparison.modified[0];
    assert_eq!(modified.transaction_id, "t2");
    let fields: Vec<_> = modified.changes.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(fields, vec!["amount", "category"]);
    assert_eq!(modified.changes[0].old_value, "1200.00");
    assert_eq!(modified.changes[0].new_value, "1300.00");
    assert_eq!(modified.changes[1].old_value, "rent");
    assert_eq!(modified.changes[1].new_value, "(empty)");

    // current - snapshot: 3 -> 3 transactions, net 121010 -> 115000
    assert_eq!(comparison.summary.differences.transaction_count_diff, 0);
    assert_eq!(comparison.summary.differences.net_amount_diff, -6_010);
}

#[test]
fn test_compare_is_idempotent_and_read_only() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::default())
        .unwrap();
    ledger.with_transactions(&book(), |txs| txs.truncate(1));

    let first = store.compare_snapshot(&snapshot.id).unwrap();
    let second = store.compare_snapshot(&snapshot.id).unwrap();
    assert_eq!(first, second);

    assert_eq!(ledger.replace_count(), 0);
    assert_eq!(ledger.transactions(&book()).unwrap().len(), 1);
    assert_eq!(store.get_snapshot(&snapshot.id).unwrap(), snapshot);
}

// --- Rollback Tests ---

#[test]
fn test_rollback_restores_and_backs_up() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::named("Before import"))
        .unwrap();

    ledger.with_transactions(&book(), |txs| {
        txs.clear();
        txs.push(Transaction::new(
            "bad",
            date(30),
            "Broken import",
            999_999,
            TransactionKind::Income,
        ));
    });

    let outcome = store
        .rollback_to_snapshot(&snapshot.id, RollbackOptions::confirmed("livro teste"))
        .unwrap();

    assert_eq!(outcome.restored_transaction_count, 3);
    assert_eq!(
        outcome.phases,
        vec![
            RollbackPhase::Idle,
            RollbackPhase::Confirming,
            RollbackPhase::BackingUp,
            RollbackPhase::Restoring,
            RollbackPhase::Done,
        ]
    );
    assert_eq!(ledger.transactions(&book()).unwrap(), transactions());

    // Rolled-back ledger matches the snapshot exactly
    let comparison = store.compare_snapshot(&snapshot.id).unwrap();
    assert!(comparison.is_identical());
    assert_eq!(comparison.counts.unchanged, 3);

    // The backup holds the pre-rollback ledger
    let backup_id = outcome.backup_snapshot_id.unwrap();
    let backup = store.get_snapshot(&backup_id).unwrap();
    assert_eq!(backup.creation_source, CreationSource::PreRollback);
    assert_eq!(backup.tags, vec!["pre-rollback"]);
    assert!(backup.name.starts_with("Pre-rollback backup "));
    assert_eq!(backup.captured_transactions.len(), 1);
    assert_eq!(backup.captured_transactions[0].id, "bad");
}

#[test]
fn test_rollback_without_backup() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::default())
        .unwrap();
    ledger.with_transactions(&book(), |txs| txs.clear());

    let outcome = store
        .rollback_to_snapshot(
            &snapshot.id,
            RollbackOptions::confirmed("Livro Teste").without_backup(),
        )
        .unwrap();

    assert!(outcome.backup_snapshot_id.is_none());
    assert!(!outcome.phases.contains(&RollbackPhase::BackingUp));
    assert_eq!(
        store
            .list_snapshots(&book(), &ListOptions::default())
            .unwrap()
            .len(),
        1
    );
    assert_eq!(ledger.transactions(&book()).unwrap().len(), 3);
}

#[test]
fn test_rollback_restores_captured_metadata() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(
            &book(),
            CreateSnapshotOptions {
                capture_metadata: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        snapshot.book_metadata.as_ref().map(|m| m.status.as_str()),
        Some("Aberto")
    );

    let mut closed = ledger.book_metadata(&book()).unwrap();
    closed.status = "Fechado".to_string();
    fiscal_snapshots::FiscalBookProvider::update_metadata(ledger.as_ref(), &book(), closed)
        .unwrap();

    store
        .rollback_to_snapshot(&snapshot.id, RollbackOptions::confirmed("Livro Teste"))
        .unwrap();
    assert_eq!(ledger.book_metadata(&book()).unwrap().status, "Aberto");
}

#[test]
fn test_clone_to_new_fiscal_book() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(
            &book(),
            CreateSnapshotOptions::named("Q1 close").with_tags(["quarter"]),
        )
        .unwrap();
    store.add_annotation(&snapshot.id, "final", "ana").unwrap();

    let clone = store
        .clone_to_new_fiscal_book(&snapshot.id, CloneOverrides::default())
        .unwrap();
    assert_eq!(clone.metadata.name, "Livro Teste (Q1 close)");
    assert_eq!(clone.metadata.status, "Aberto");
    assert_ne!(clone.id, book());
    assert_eq!(ledger.transactions(&clone.id).unwrap(), transactions());

    // Snapshot tags and annotations stay with the source book
    assert!(store
        .list_snapshots(&clone.id, &ListOptions::default())
        .unwrap()
        .is_empty());

    let named = store
        .clone_to_new_fiscal_book(
            &snapshot.id,
            CloneOverrides {
                name: Some("Simulação 2025".to_string()),
                status: Some("Rascunho".to_string()),
                description: None,
            },
        )
        .unwrap();
    assert_eq!(named.metadata.name, "Simulação 2025");
    assert_eq!(named.metadata.status, "Rascunho");
}

// --- Export Tests ---

#[test]
fn test_export_snapshot_formats() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 31, 18, 0, 0).unwrap(),
    ));
    let store =
        Store::create_with_clock(config(&dir), Collaborators::from_shared(ledger), clock).unwrap();

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::named("Março Fechamento"))
        .unwrap();

    let json = store.export_snapshot(&snapshot.id, ExportFormat::Json).unwrap();
    assert_eq!(json.filename, "snapshot-março-fechamento-2024-03-31.json");
    assert_eq!(json.content_type, "application/json");
    let value: serde_json::Value = serde_json::from_slice(&json.bytes).unwrap();
    assert_eq!(value["name"], "Março Fechamento");
    assert_eq!(value["captured_transactions"].as_array().unwrap().len(), 3);

    let csv = store.export_snapshot(&snapshot.id, ExportFormat::Csv).unwrap();
    assert_eq!(csv.filename, "snapshot-março-fechamento-2024-03-31.csv");
    let text = String::from_utf8(csv.bytes).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "id,date,description,kind,amount,category,counterparty,document,notes"
    );
    assert_eq!(lines[2], "t2,2024-03-04,Office rent,expense,1200.00,rent,,,");
}

#[test]
fn test_export_comparison_csv() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();
    let store = test_store(&dir, &ledger);

    let snapshot = store
        .create_snapshot(&book(), CreateSnapshotOptions::named("Baseline"))
        .unwrap();
    ledger.with_transactions(&book(), |txs| {
        txs.remove(0);
        txs[0].description = "Office rent, March".to_string();
    });

    let export = store
        .export_comparison(&snapshot.id, ExportFormat::Csv)
        .unwrap();
    let text = String::from_utf8(export.bytes).unwrap();
    let lines: Vec<_> = text.lines().collect();

    assert!(lines[0].starts_with("change,id,"));
    assert!(lines[0].ends_with(",changed_fields"));
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("removed,t1,"));
    assert_eq!(
        lines[2],
        "modified,t2,2024-03-04,\"Office rent, March\",expense,1200.00,rent,,,,description"
    );
}

// --- Persistence Tests ---

#[test]
fn test_reopen_restores_snapshots_and_schedules() {
    let dir = TempDir::new().unwrap();
    let ledger = test_ledger();

    let (protected_id, plain_id) = {
        let store = test_store(&dir, &ledger);
        let protected = store
            .create_snapshot(&book(), CreateSnapshotOptions::named("keep"))
            .unwrap();
        store.toggle_protection(&protected.id, true).unwrap();
        let plain = store
            .create_snapshot(&book(), CreateSnapshotOptions::named("plain").with_tags(["x"]))
            .unwrap();
        store
            .update_schedule(
                &book(),
                ScheduleConfig::monthly(31, 2).with_auto_tags(["Monthly"]),
            )
            .unwrap();
        (protected.id, plain.id)
    };

    let store =
        Store::open_or_create(config(&dir), Collaborators::from_shared(Arc::clone(&ledger)))
            .unwrap();

    let listed = store.list_snapshots(&book(), &ListOptions::default()).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, plain_id);
    assert!(store.get_snapshot(&protected_id).unwrap().is_protected);
    assert_eq!(store.get_snapshot(&plain_id).unwrap().tags, vec!["x"]);

    let schedule = store.get_schedule(&book()).unwrap();
    assert_eq!(schedule.day_of_month, 31);
    assert_eq!(schedule.auto_tags, vec!["monthly"]);

    // Sequence numbering continues after the loaded snapshots
    let next = store
        .create_snapshot(&book(), CreateSnapshotOptions::default())
        .unwrap();
    assert!(listed.iter().all(|s| s.sequence < next.sequence));
}
