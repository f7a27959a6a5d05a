//! Per-tenant, per-document-type human-readable numbering
//!
//! Counters are single rows in `doc_sequences`; the upsert both locks the
//! row and advances it, so concurrent commands never allocate the same
//! number.

use sqlx::{Postgres, Transaction};

/// Document families that receive sequential numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Invoice,
    CreditNote,
    Expense,
    PurchaseBill,
    Payment,
    Refund,
}

impl DocType {
    /// Stable key stored in the counter row
    pub fn key(self) -> &'static str {
        match self {
            DocType::Invoice => "invoice",
            DocType::CreditNote => "credit_note",
            DocType::Expense => "expense",
            DocType::PurchaseBill => "purchase_bill",
            DocType::Payment => "payment",
            DocType::Refund => "refund",
        }
    }

    /// Number prefix rendered to users
    pub fn prefix(self) -> &'static str {
        match self {
            DocType::Invoice => "INV",
            DocType::CreditNote => "CN",
            DocType::Expense => "EXP",
            DocType::PurchaseBill => "BILL",
            DocType::Payment => "PAY",
            DocType::Refund => "RFD",
        }
    }
}

/// Render a sequence value as a document number, e.g. `INV-00042`
pub fn render(doc_type: DocType, value: i64) -> String {
    format!("{}-{:05}", doc_type.prefix(), value)
}

/// Allocate the next number for (tenant, doc_type)
///
/// The upsert row-locks the counter, so the allocation is collision-free
/// under concurrency and rolls back with the enclosing transaction.
pub async fn next_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    doc_type: DocType,
) -> Result<String, sqlx::Error> {
    let (next_value,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO doc_sequences (tenant_id, doc_type, next_value)
        VALUES ($1, $2, 2)
        ON CONFLICT (tenant_id, doc_type)
        DO UPDATE SET next_value = doc_sequences.next_value + 1
        RETURNING next_value
        "#,
    )
    .bind(tenant_id)
    .bind(doc_type.key())
    .fetch_one(&mut **tx)
    .await?;

    Ok(render(doc_type, next_value - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_pads_to_five_digits() {
        assert_eq!(render(DocType::Invoice, 42), "INV-00042");
        assert_eq!(render(DocType::CreditNote, 1), "CN-00001");
        assert_eq!(render(DocType::PurchaseBill, 123456), "BILL-123456");
    }

    #[test]
    fn test_doc_type_keys_are_distinct() {
        let keys = [
            DocType::Invoice.key(),
            DocType::CreditNote.key(),
            DocType::Expense.key(),
            DocType::PurchaseBill.key(),
            DocType::Payment.key(),
            DocType::Refund.key(),
        ];
        let mut deduped = keys.to_vec();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), keys.len());
    }
}
