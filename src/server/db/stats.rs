//! Inquiry analytics queries
//!
//! An inquiry counts as escalated when at least one escalation row points at
//! it; every other inquiry was resolved by the assistant.

use sqlx::PgPool;
use crate::models::{ComplaintSummary, Escalation, MonthlySummary};

pub async fn complaint_summary(pool: &PgPool) -> Result<ComplaintSummary, sqlx::Error> {
    let (ai_resolved, human_escalated): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE e.inquiry_id IS NULL),
            COUNT(*) FILTER (WHERE e.inquiry_id IS NOT NULL)
        FROM inquiries i
        LEFT JOIN (SELECT DISTINCT inquiry_id FROM escalations) e ON e.inquiry_id = i.id
        "#
    )
    .fetch_one(pool)
    .await?;

    Ok(ComplaintSummary { ai_resolved, human_escalated })
}

/// Per-month counts for the current month and the five before it, oldest first
pub async fn monthly_summary(pool: &PgPool) -> Result<Vec<MonthlySummary>, sqlx::Error> {
    sqlx::query_as::<_, MonthlySummary>(
        r#"
        WITH months AS (
            SELECT generate_series(
                date_trunc('month', NOW()) - INTERVAL '5 months',
                date_trunc('month', NOW()),
                INTERVAL '1 month'
            ) AS month
        )
        SELECT
            to_char(m.month, 'YYYY-MM') AS month,
            COUNT(i.id) FILTER (WHERE e.inquiry_id IS NULL) AS ai_resolved,
            COUNT(i.id) FILTER (WHERE e.inquiry_id IS NOT NULL) AS human_escalated
        FROM months m
        LEFT JOIN inquiries i
            ON date_trunc('month', COALESCE(i.start_time, i.created_at)) = m.month
        LEFT JOIN (SELECT DISTINCT inquiry_id FROM escalations) e ON e.inquiry_id = i.id
        GROUP BY m.month
        ORDER BY m.month
        "#
    )
    .fetch_all(pool)
    .await
}

pub async fn list_escalations(pool: &PgPool, limit: i64) -> Result<Vec<Escalation>, sqlx::Error> {
    sqlx::query_as::<_, Escalation>(
        r#"
        SELECT id, inquiry_id, call_sid, from_number, reason, escalated_at
        FROM escalations
        ORDER BY escalated_at DESC, id DESC
        LIMIT $1
        "#
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
