//! Closed fiscal periods
//!
//! Period configuration is owned by an external facility; the core only
//! asks whether a date falls inside a closed range.

use chrono::NaiveDate;
use sqlx::PgPool;

/// True when the tenant has a closed period covering the date
pub async fn is_date_closed(
    pool: &PgPool,
    tenant_id: &str,
    date: NaiveDate,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM closed_periods
            WHERE tenant_id = $1 AND start_date <= $2 AND end_date >= $2
        )
        "#,
    )
    .bind(tenant_id)
    .bind(date)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}
