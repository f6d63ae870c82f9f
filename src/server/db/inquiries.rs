//! Inquiry (synced call log) database operations

use sqlx::PgPool;
use crate::models::CompletedCall;

/// Insert completed calls, refreshing rows that already exist for a call SID.
/// Returns the number of calls written.
pub async fn upsert_all(pool: &PgPool, calls: &[CompletedCall]) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for call in calls {
        sqlx::query(
            r#"
            INSERT INTO inquiries (call_sid, from_number, to_number, status, duration_seconds, start_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (call_sid) DO UPDATE SET
                status = EXCLUDED.status,
                duration_seconds = EXCLUDED.duration_seconds,
                start_time = EXCLUDED.start_time
            "#
        )
        .bind(&call.sid)
        .bind(&call.from)
        .bind(&call.to)
        .bind(&call.status)
        .bind(call.duration)
        .bind(call.start_time)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(calls.len())
}
