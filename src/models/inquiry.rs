use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Inquiry handed over to a human agent
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: i64,
    pub inquiry_id: i64,
    pub call_sid: String,
    pub from_number: String,
    pub reason: Option<String>,
    pub escalated_at: DateTime<Utc>,
}

/// Call log entry as reported by the completed-calls endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedCall {
    pub from: String,
    pub to: String,
    pub status: String,
    pub duration: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub sid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplaintSummary {
    pub ai_resolved: i64,
    pub human_escalated: i64,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlySummary {
    pub month: String,
    pub ai_resolved: i64,
    pub human_escalated: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionRate {
    pub resolution_rate: f64,
}

impl ResolutionRate {
    /// Percentage of inquiries resolved without a human, one decimal place
    pub fn from_summary(summary: &ComplaintSummary) -> Self {
        let total = summary.ai_resolved + summary.human_escalated;
        let resolution_rate = if total > 0 {
            (summary.ai_resolved as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self { resolution_rate }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    pub synced: usize,
}
