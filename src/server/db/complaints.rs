//! Voice complaint database operations

use sqlx::PgPool;
use crate::models::{NewComplaint, VoiceComplaint};

/// Insert one complaint record and return the stored row
pub async fn insert(pool: &PgPool, complaint: &NewComplaint) -> Result<VoiceComplaint, sqlx::Error> {
    sqlx::query_as::<_, VoiceComplaint>(
        r#"
        INSERT INTO voice_complaints (user_id, s3_file_path, transcript, ai_response, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, user_id, s3_file_path, transcript, ai_response, status, created_at, updated_at
        "#
    )
    .bind(complaint.user_id)
    .bind(&complaint.s3_file_path)
    .bind(&complaint.transcript)
    .bind(&complaint.ai_response)
    .bind(complaint.status)
    .fetch_one(pool)
    .await
}

pub async fn list_by_user(pool: &PgPool, user_id: i64, limit: i64) -> Result<Vec<VoiceComplaint>, sqlx::Error> {
    sqlx::query_as::<_, VoiceComplaint>(
        r#"
        SELECT id, user_id, s3_file_path, transcript, ai_response, status, created_at, updated_at
        FROM voice_complaints
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
