//! Journal entry persistence
//!
//! Entries and their lines are immutable after insert. The only UPDATE this
//! repo exposes stamps void metadata on an original entry; reversal effects
//! are always a separate entry linked via `reversal_of_journal_entry_id`,
//! and a partial unique index guarantees at most one direct reversal.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub location_id: Option<Uuid>,
    pub created_by: String,
    pub reversal_of_journal_entry_id: Option<Uuid>,
    pub reversal_reason: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub voided_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct JournalEntryLine {
    pub id: Uuid,
    pub tenant_id: String,
    pub journal_entry_id: Uuid,
    pub line_no: i32,
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// Line to insert, before ids are assigned
#[derive(Debug, Clone)]
pub struct JournalLineInsert {
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
}

const ENTRY_COLUMNS: &str = "id, tenant_id, entry_date, description, location_id, created_by, \
     reversal_of_journal_entry_id, reversal_reason, voided_at, void_reason, voided_by, created_at";

/// Insert a journal entry header
pub async fn insert_entry_tx(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
    tenant_id: &str,
    entry_date: NaiveDate,
    description: &str,
    location_id: Option<Uuid>,
    created_by: &str,
    reversal_of_journal_entry_id: Option<Uuid>,
    reversal_reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO journal_entries
            (id, tenant_id, entry_date, description, location_id, created_by,
             reversal_of_journal_entry_id, reversal_reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry_id)
    .bind(tenant_id)
    .bind(entry_date)
    .bind(description)
    .bind(location_id)
    .bind(created_by)
    .bind(reversal_of_journal_entry_id)
    .bind(reversal_reason)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Bulk insert journal lines for an entry, numbering from 1
pub async fn bulk_insert_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    journal_entry_id: Uuid,
    lines: &[JournalLineInsert],
) -> Result<(), sqlx::Error> {
    for (idx, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO journal_entry_lines
                (id, tenant_id, journal_entry_id, line_no, account_id, debit, credit)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(journal_entry_id)
        .bind((idx + 1) as i32)
        .bind(line.account_id)
        .bind(line.debit)
        .bind(line.credit)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Fetch an entry with its lines, inside a transaction
pub async fn fetch_entry_with_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    entry_id: Uuid,
) -> Result<Option<(JournalEntry, Vec<JournalEntryLine>)>, sqlx::Error> {
    let entry = sqlx::query_as::<_, JournalEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(entry_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(entry) = entry else {
        return Ok(None);
    };

    let lines = fetch_lines_tx(tx, tenant_id, entry_id).await?;
    Ok(Some((entry, lines)))
}

/// Fetch an entry with its lines from the pool
pub async fn fetch_entry_with_lines(
    pool: &PgPool,
    tenant_id: &str,
    entry_id: Uuid,
) -> Result<Option<(JournalEntry, Vec<JournalEntryLine>)>, sqlx::Error> {
    let entry = sqlx::query_as::<_, JournalEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(entry_id)
    .fetch_optional(pool)
    .await?;

    let Some(entry) = entry else {
        return Ok(None);
    };

    let lines = sqlx::query_as::<_, JournalEntryLine>(
        "SELECT id, tenant_id, journal_entry_id, line_no, account_id, debit, credit \
         FROM journal_entry_lines WHERE tenant_id = $1 AND journal_entry_id = $2 ORDER BY line_no",
    )
    .bind(tenant_id)
    .bind(entry_id)
    .fetch_all(pool)
    .await?;

    Ok(Some((entry, lines)))
}

pub async fn fetch_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    entry_id: Uuid,
) -> Result<Vec<JournalEntryLine>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntryLine>(
        "SELECT id, tenant_id, journal_entry_id, line_no, account_id, debit, credit \
         FROM journal_entry_lines WHERE tenant_id = $1 AND journal_entry_id = $2 ORDER BY line_no",
    )
    .bind(tenant_id)
    .bind(entry_id)
    .fetch_all(&mut **tx)
    .await
}

/// True when a direct reversal of the entry already exists
pub async fn has_direct_reversal_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    entry_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM journal_entries \
         WHERE tenant_id = $1 AND reversal_of_journal_entry_id = $2)",
    )
    .bind(tenant_id)
    .bind(entry_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}

/// Stamp void metadata on an original entry (lines stay untouched)
pub async fn mark_voided_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    entry_id: Uuid,
    void_reason: &str,
    voided_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE journal_entries
        SET voided_at = NOW(), void_reason = $3, voided_by = $4
        WHERE tenant_id = $1 AND id = $2 AND voided_at IS NULL
        "#,
    )
    .bind(tenant_id)
    .bind(entry_id)
    .bind(void_reason)
    .bind(voided_by)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
