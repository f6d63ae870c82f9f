//! Call-log sync and inquiry analytics handlers

use axum::{extract::State, http::StatusCode, Json};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::models::{CompletedCall, ComplaintSummary, Escalation, MonthlySummary, ResolutionRate, SyncResponse};
use crate::server::retry::RetryPolicy;
use crate::server::twilio::{self, TwilioClient, TwilioError};
use crate::server::{api_error, db, ApiError, AppState};

const ESCALATION_LIMIT: i64 = 200;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Twilio request failed: {0}")]
    Twilio(#[from] TwilioError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Pull completed calls from Twilio and upsert them as inquiries
pub async fn sync_inquiries(
    pool: &PgPool,
    twilio: &TwilioClient,
    retry: &RetryPolicy,
) -> Result<usize, SyncError> {
    let calls = retry.run("twilio call log", || twilio.completed_calls()).await?;
    let synced = db::inquiries::upsert_all(pool, &calls).await?;
    tracing::info!(synced, to = twilio.phone_number(), "Synced Twilio inquiries");
    Ok(synced)
}

/// Run `sync_inquiries` on a fixed period for the life of the process
pub fn spawn_inquiry_sync(state: Arc<AppState>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = sync_inquiries(&state.db, &state.twilio, &state.retry).await {
                tracing::warn!("Scheduled inquiry sync failed: {}", e);
            }
        }
    });
}

/// Log the underlying error, the caller only sees `context`
fn internal(context: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::error!("{}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

pub async fn sync_twilio_inquiries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncResponse>, ApiError> {
    let synced = sync_inquiries(&state.db, &state.twilio, &state.retry)
        .await
        .map_err(|e| internal("Inquiry sync failed", e))?;

    Ok(Json(SyncResponse { success: true, synced }))
}

/// Completed calls to the support number during the current calendar month
pub async fn completed_calls(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CompletedCall>>, ApiError> {
    let calls = state
        .retry
        .run("twilio call log", || state.twilio.completed_calls())
        .await
        .map_err(|e| internal("Failed to fetch call logs", e))?;

    Ok(Json(twilio::in_month(calls, chrono::Utc::now())))
}

pub async fn complaint_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ComplaintSummary>, ApiError> {
    db::stats::complaint_summary(&state.db)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to load complaint summary", e))
}

pub async fn monthly_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonthlySummary>>, ApiError> {
    db::stats::monthly_summary(&state.db)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to load monthly summary", e))
}

pub async fn resolution_rate(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResolutionRate>, ApiError> {
    let summary = db::stats::complaint_summary(&state.db)
        .await
        .map_err(|e| internal("Failed to load complaint summary", e))?;

    Ok(Json(ResolutionRate::from_summary(&summary)))
}

/// Escalation records, newest first
pub async fn human_escalations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Escalation>>, ApiError> {
    db::stats::list_escalations(&state.db, ESCALATION_LIMIT)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to load escalations", e))
}
