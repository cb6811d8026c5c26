//! CSV rendering (RFC 4180).

use crate::compare::ComparisonResult;
use crate::types::{Transaction, TRANSACTION_FIELDS};

/// Rows of a comparison export are tagged with one of these.
pub const CHANGE_ADDED: &str = "added";
pub const CHANGE_REMOVED: &str = "removed";
pub const CHANGE_MODIFIED: &str = "modified";

/// Quote a cell when it contains a delimiter, quote or line break.
pub fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn push_row<I, S>(out: &mut String, cells: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        }
        out.push_str(&escape(cell.as_ref()));
        first = false;
    }
    out.push_str("\r\n");
}

/// `id` followed by the display fields; absent values are empty cells.
fn transaction_cells(tx: &Transaction) -> Vec<String> {
    let mut cells = Vec::with_capacity(TRANSACTION_FIELDS.len() + 1);
    cells.push(tx.id.clone());
    cells.extend(
        tx.display_fields()
            .into_iter()
            .map(|(_, value)| value.unwrap_or_default()),
    );
    cells
}

/// Column header of a snapshot export.
pub fn snapshot_header() -> Vec<&'static str> {
    let mut header = vec!["id"];
    header.extend(TRANSACTION_FIELDS);
    header
}

/// Column header of a comparison export.
pub fn comparison_header() -> Vec<&'static str> {
    let mut header = vec!["change"];
    header.extend(snapshot_header());
    header.push("changed_fields");
    header
}

/// One row per captured transaction.
pub fn render_transactions(transactions: &[Transaction]) -> String {
    let mut out = String::new();
    push_row(&mut out, snapshot_header());
    for tx in transactions {
        push_row(&mut out, transaction_cells(tx));
    }
    out
}

/// Added, removed, then modified rows. Modified rows carry the current
/// values and the names of the fields that changed.
pub fn render_comparison(comparison: &ComparisonResult) -> String {
    let mut out = String::new();
    push_row(&mut out, comparison_header());

    let tagged = |change: &str, tx: &Transaction, changed: String| {
        let mut cells = vec![change.to_string()];
        cells.extend(transaction_cells(tx));
        cells.push(changed);
        cells
    };

    for tx in &comparison.added {
        push_row(&mut out, tagged(CHANGE_ADDED, tx, String::new()));
    }
    for tx in &comparison.removed {
        push_row(&mut out, tagged(CHANGE_REMOVED, tx, String::new()));
    }
    for modified in &comparison.modified {
        let changed = modified
            .changes
            .iter()
            .map(|c| c.field.as_str())
            .collect::<Vec<_>>()
            .join(";");
        push_row(&mut out, tagged(CHANGE_MODIFIED, &modified.current, changed));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionKind;
    use chrono::NaiveDate;

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_transactions_rows() {
        let tx = Transaction::new(
            "t1",
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            "Rent, May",
            150_000,
            TransactionKind::Expense,
        )
        .with_category("housing");

        let csv = render_transactions(&[tx]);
        let mut lines = csv.split("\r\n");
        assert_eq!(
            lines.next(),
            Some("id,date,description,kind,amount,category,counterparty,document,notes")
        );
        assert_eq!(
            lines.next(),
            Some("t1,2024-05-01,\"Rent, May\",expense,1500.00,housing,,,")
        );
    }

    #[test]
    fn test_comparison_header() {
        assert_eq!(
            comparison_header().join(","),
            "change,id,date,description,kind,amount,category,counterparty,document,notes,changed_fields"
        );
    }
}
