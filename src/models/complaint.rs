use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A processed (or attempted) voice complaint
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct VoiceComplaint {
    pub id: i64,
    pub user_id: i64,
    pub s3_file_path: String,
    pub transcript: Option<String>,
    pub ai_response: Option<String>,
    pub status: ComplaintStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::Type, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "complaint_status", rename_all = "lowercase")]
pub enum ComplaintStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Row handed to the persistence gateway
#[derive(Debug, Clone, PartialEq)]
pub struct NewComplaint {
    pub user_id: i64,
    pub s3_file_path: String,
    pub transcript: Option<String>,
    pub ai_response: Option<String>,
    pub status: ComplaintStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessComplaintRequest {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessComplaintResponse {
    pub success: bool,
    pub transcript: String,
    pub reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCountResponse {
    pub file_count: u64,
}
