//! Period-close guard
//!
//! Rejects writes whose effective date falls inside a closed fiscal period.
//! Period configuration is owned externally; this is only the query seam
//! the write path consults before mutating anything.

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::error::{DomainError, DomainResult};
use crate::repos::period_repo;

pub async fn ensure_period_open(
    pool: &PgPool,
    tenant_id: &str,
    date: NaiveDate,
    action: &str,
) -> DomainResult<()> {
    if period_repo::is_date_closed(pool, tenant_id, date).await? {
        tracing::info!(
            tenant_id = %tenant_id,
            date = %date,
            action = %action,
            "write rejected: period closed"
        );
        return Err(DomainError::validation(format!(
            "the accounting period containing {date} is closed"
        )));
    }

    Ok(())
}
