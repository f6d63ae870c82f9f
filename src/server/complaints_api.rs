//! Voice complaint API handlers: processing, history, uploads

use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::{
    FileCountResponse, ProcessComplaintRequest, ProcessComplaintResponse, UploadResponse, VoiceComplaint,
};
use crate::server::pipeline::PipelineError;
use crate::server::storage::{self, StorageError};
use crate::server::{api_error, auth::Claims, db, ApiError, AppState};

const HISTORY_LIMIT: i64 = 100;

fn pipeline_error_response(e: &PipelineError) -> ApiError {
    let status = match e {
        PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
        PipelineError::Download(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

/// Uploads live under `<user_id>/`, anything else belongs to another account
fn owns_key(user_id: i64, key: &str) -> bool {
    key.strip_prefix(&format!("{}/", user_id))
        .is_some_and(|rest| !rest.is_empty())
}

/// Download, transcribe and answer one uploaded voice complaint
pub async fn process_voice_complaint(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    body: Result<Json<ProcessComplaintRequest>, JsonRejection>,
) -> Result<Json<ProcessComplaintResponse>, ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    // Blank paths fall through to the pipeline's validation
    let file_path = req.file_path.as_deref().map(str::trim).filter(|p| !p.is_empty());
    if let Some(key) = file_path {
        if !owns_key(claims.sub, key) {
            tracing::warn!(user_id = claims.sub, key, "Rejected processing of another account's upload");
            return Err(api_error(StatusCode::FORBIDDEN, "You can only process your own uploads"));
        }
    }

    let outcome = state
        .pipeline
        .process(claims.sub, req.file_path.as_deref())
        .await
        .map_err(|e| pipeline_error_response(&e))?;

    Ok(Json(ProcessComplaintResponse {
        success: true,
        transcript: outcome.transcript,
        reply: outcome.reply,
    }))
}

/// The caller's complaints, newest first
pub async fn list_voice_complaints(
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Result<Json<Vec<VoiceComplaint>>, ApiError> {
    db::complaints::list_by_user(&state.db, claims.sub, HISTORY_LIMIT)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(user_id = claims.sub, "Failed to list voice complaints: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load voice complaints")
        })
}

/// Store the multipart `file` field under the caller's prefix
pub async fn upload(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let bad_request = |msg: String| api_error(StatusCode::BAD_REQUEST, msg);

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| bad_request(e.body_text()))? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        file = Some((file_name, content_type, data));
        break;
    }

    let Some((file_name, content_type, data)) = file else {
        return Err(bad_request("No file provided".to_string()));
    };
    if data.is_empty() {
        return Err(bad_request("Uploaded file is empty".to_string()));
    }

    let key = storage::upload_key(claims.sub, &file_name);
    let bucket = state.bucket.as_str();

    state
        .retry
        .run("s3 upload", || state.store.put(bucket, &key, data.to_vec(), &content_type))
        .await
        .map_err(|e| {
            tracing::error!(user_id = claims.sub, key = %key, "Upload failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Upload failed: {}", e))
        })?;

    tracing::info!(user_id = claims.sub, key = %key, bytes = data.len(), "Stored voice complaint upload");

    Ok(Json(UploadResponse {
        success: true,
        file_path: key,
    }))
}

/// Number of objects in the complaints bucket
pub async fn file_count(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FileCountResponse>, ApiError> {
    let bucket = state.bucket.as_str();

    let file_count = state
        .retry
        .run("s3 list", || state.store.count(bucket, ""))
        .await
        .map_err(|e| {
            tracing::error!("Failed to count objects in {}: {}", bucket, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to count files: {}", e))
        })?;

    Ok(Json(FileCountResponse { file_count }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owns_key() {
        assert!(owns_key(42, "42/0001-complaint.wav"));
        assert!(!owns_key(42, "7/0001-complaint.wav"));
        assert!(!owns_key(42, "420/0001-complaint.wav"));
        assert!(!owns_key(42, "42/"));
        assert!(!owns_key(42, "complaint.wav"));
    }

    #[test]
    fn test_own_upload_key_is_accepted() {
        assert!(owns_key(42, &storage::upload_key(42, "voice note.wav")));
    }
}
