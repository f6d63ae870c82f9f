//! Server-side code for ClearCall
//!
//! This module contains all backend functionality:
//! - Database access (PostgreSQL via sqlx)
//! - Object storage (S3 REST API)
//! - Transcription and reply generation (OpenAI)
//! - Voice complaint pipeline
//! - Call-log sync (Twilio) and analytics
//! - Live support chat (Claude)
//! - Authentication (JWT)
//! - API routes

pub mod db;
pub mod auth;
pub mod retry;
pub mod storage;
pub mod openai;
pub mod claude;
pub mod twilio;
pub mod pipeline;
pub mod complaints_api;
pub mod analytics_api;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, Environment};
use pipeline::{ComplaintPipeline, PgComplaintRecorder, PipelineConfig};
use retry::RetryPolicy;
use storage::{ObjectStore, S3Client};

const UPLOAD_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// JSON error payload returned by every handler
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: message.into() }))
}

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub pipeline: Arc<ComplaintPipeline>,
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub twilio: twilio::TwilioClient,
    pub claude: claude::ClaudeClient,
    pub jwt_secret: String,
    pub retry: RetryPolicy,
}

fn cors_layer(environment: Environment) -> CorsLayer {
    let origin = match environment.cors_origins() {
        None => AllowOrigin::from(Any),
        Some(origins) => AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        ),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Create the Axum router with all API routes
pub fn create_router(state: Arc<AppState>, environment: Environment) -> Router {
    Router::new()
        // Health
        .route("/", get(home))
        .route("/api/health", get(health_check))

        // Accounts
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/protected", get(auth::protected))

        // Voice complaints
        .route("/api/process-voice-complaint", post(complaints_api::process_voice_complaint))
        .route("/api/voice-complaints", get(complaints_api::list_voice_complaints))
        .route(
            "/api/upload",
            post(complaints_api::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/file-count", get(complaints_api::file_count))

        // Call logs & analytics
        .route("/api/sync-twilio-inquiries", post(analytics_api::sync_twilio_inquiries))
        .route("/api/completed-calls", get(analytics_api::completed_calls))
        .route("/api/complaint-summary", get(analytics_api::complaint_summary))
        .route("/api/monthly-summary", get(analytics_api::monthly_summary))
        .route("/api/resolution-rate", get(analytics_api::resolution_rate))
        .route("/api/human-escalations", get(analytics_api::human_escalations))

        // Live chat
        .route("/api/claude", post(live_chat))

        .layer(cors_layer(environment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn home() -> &'static str {
    "ClearCall backend is running"
}

// Health check
async fn health_check() -> &'static str {
    "OK"
}

// ============== Live Chat ==============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    reply: String,
}

async fn live_chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let message = req.message.as_deref().map(str::trim).unwrap_or_default();
    if message.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message is required"));
    }

    let reply = state
        .retry
        .run("claude chat", || state.claude.chat_reply(message))
        .await
        .map_err(|e| {
            tracing::error!("Live chat failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "The assistant is unavailable right now")
        })?;

    Ok(Json(ChatReply { reply }))
}

/// Initialize and start the server
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    // Initialize database
    let pool = db::init_pool(config.database.connect_options()?).await?;

    // Run migrations (non-fatal if already applied)
    if let Err(e) = db::run_migrations(&pool).await {
        tracing::warn!("Migration warning (may be already applied): {}", e);
    }

    tokio::fs::create_dir_all(&config.scratch_dir).await?;

    let retry = RetryPolicy::new(config.retry_max_attempts, config.retry_initial_delay);
    let store: Arc<dyn ObjectStore> = Arc::new(S3Client::new(&config.aws)?);
    let openai = Arc::new(openai::OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_chat_model.clone(),
    ));

    let pipeline = ComplaintPipeline::new(
        store.clone(),
        openai.clone(),
        openai,
        Arc::new(PgComplaintRecorder::new(pool.clone())),
        PipelineConfig {
            bucket: config.aws.bucket.clone(),
            scratch_dir: config.scratch_dir.clone(),
            retry: retry.clone(),
        },
    );

    let state = Arc::new(AppState {
        db: pool,
        pipeline: Arc::new(pipeline),
        store,
        bucket: config.aws.bucket.clone(),
        twilio: twilio::TwilioClient::new(&config.twilio),
        claude: claude::ClaudeClient::new(config.anthropic_api_key.clone()),
        jwt_secret: config.jwt_secret.clone(),
        retry,
    });

    match config.twilio.sync_interval {
        Some(every) => {
            tracing::info!("Twilio inquiry sync every {:?}", every);
            analytics_api::spawn_inquiry_sync(state.clone(), every);
        }
        None => tracing::info!("Scheduled Twilio inquiry sync disabled"),
    }

    let app = create_router(state, config.environment);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{} ({:?})", config.port, config.environment);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TwilioConfig;
    use crate::models::{NewComplaint, UserRole, VoiceComplaint};
    use crate::server::openai::OpenAiError;
    use crate::server::pipeline::{ComplaintRecorder, ResponseGenerator, Transcriber};
    use crate::server::storage::StorageError;
    use axum::body::Body;
    use axum::http::Request;
    use sqlx::postgres::PgPoolOptions;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SECRET: &str = "router-test-secret";

    struct StubStore;

    #[async_trait::async_trait]
    impl ObjectStore for StubStore {
        async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<(), StorageError> {
            if key.contains("/missing-") {
                return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
            }
            tokio::fs::write(destination, b"audio").await?;
            Ok(())
        }

        async fn put(&self, _bucket: &str, _key: &str, _data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn count(&self, _bucket: &str, _prefix: &str) -> Result<u64, StorageError> {
            Ok(3)
        }
    }

    struct StubModel;

    #[async_trait::async_trait]
    impl Transcriber for StubModel {
        async fn transcribe(&self, _audio_path: &Path) -> Result<String, OpenAiError> {
            Ok("My package was late".to_string())
        }
    }

    #[async_trait::async_trait]
    impl ResponseGenerator for StubModel {
        async fn generate(&self, _transcript: &str) -> Result<String, OpenAiError> {
            Ok("We apologize for the delay...".to_string())
        }
    }

    /// Stands in for an unreachable database
    struct OfflineRecorder;

    #[async_trait::async_trait]
    impl ComplaintRecorder for OfflineRecorder {
        async fn record(&self, _complaint: NewComplaint) -> Result<VoiceComplaint, sqlx::Error> {
            Err(sqlx::Error::PoolTimedOut)
        }
    }

    fn test_app() -> (Router, TempDir) {
        let scratch = tempfile::tempdir().unwrap();
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@127.0.0.1:1/clearcall_test")
            .unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(StubStore);
        let retry = RetryPolicy::new(1, Duration::from_millis(1));

        let pipeline = ComplaintPipeline::new(
            store.clone(),
            Arc::new(StubModel),
            Arc::new(StubModel),
            Arc::new(OfflineRecorder),
            PipelineConfig {
                bucket: "one-piece-store".to_string(),
                scratch_dir: scratch.path().to_path_buf(),
                retry: retry.clone(),
            },
        );

        let twilio_config = TwilioConfig {
            account_sid: "AC1".to_string(),
            auth_token: "token".to_string(),
            phone_number: "+15559999".to_string(),
            sync_interval: None,
        };

        let state = Arc::new(AppState {
            db: pool,
            pipeline: Arc::new(pipeline),
            store,
            bucket: "one-piece-store".to_string(),
            twilio: twilio::TwilioClient::with_base_url(&twilio_config, "http://127.0.0.1:9".to_string()),
            claude: claude::ClaudeClient::with_base_url("key".to_string(), "http://127.0.0.1:9".to_string()),
            jwt_secret: SECRET.to_string(),
            retry,
        });

        (create_router(state, Environment::Testing), scratch)
    }

    fn bearer() -> String {
        let token = auth::create_token(42, "ada@example.com", UserRole::User, SECRET).unwrap();
        format!("Bearer {}", token)
    }

    fn json_request(method: &str, uri: &str, auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_process_requires_token() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request("POST", "/api/process-voice-complaint", None, r#"{"file_path":"a.wav"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Missing authorization header");
    }

    #[tokio::test]
    async fn test_process_rejects_garbage_token() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/process-voice-complaint",
                Some("Bearer not-a-jwt"),
                r#"{"file_path":"a.wav"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_process_without_file_path_is_bad_request() {
        let (app, _scratch) = test_app();
        let auth = bearer();
        let response = app
            .oneshot(json_request("POST", "/api/process-voice-complaint", Some(&auth), "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "file_path is required");
    }

    #[tokio::test]
    async fn test_process_succeeds_even_when_database_is_down() {
        let (app, scratch) = test_app();
        let auth = bearer();
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/process-voice-complaint",
                Some(&auth),
                r#"{"file_path":"42/0001-complaint.wav"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["transcript"], "My package was late");
        assert_eq!(body["reply"], "We apologize for the delay...");
        assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_process_missing_object_is_not_found() {
        let (app, _scratch) = test_app();
        let auth = bearer();
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/process-voice-complaint",
                Some(&auth),
                r#"{"file_path":"42/missing-complaint.wav"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Download failed"));
    }

    #[tokio::test]
    async fn test_process_other_users_key_is_forbidden() {
        let (app, scratch) = test_app();
        let auth = bearer();
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/process-voice-complaint",
                Some(&auth),
                r#"{"file_path":"7/0000-victim.wav"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"], "You can only process your own uploads");
        assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_signup_malformed_json_is_bad_request() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request("POST", "/signup", None, "not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_login_malformed_json_is_bad_request() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request("POST", "/login", None, r#"{"email":"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_login_empty_password_is_bad_request() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request("POST", "/login", None, r#"{"email":"a@b.c","password":""}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Email and password are required");
    }

    #[tokio::test]
    async fn test_protected_reports_identity() {
        let (app, _scratch) = test_app();
        let auth = bearer();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("authorization", auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["logged_in_as"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_signup_validation_happens_before_database() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/signup",
                None,
                r#"{"name":"Ada","email":"ada@example.com","password":"pw","phone":"+1555","role":"root"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Invalid role. Must be 'user' or 'admin'.");
    }

    #[tokio::test]
    async fn test_file_count() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/file-count").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["file_count"], 3);
    }

    #[tokio::test]
    async fn test_live_chat_requires_message() {
        let (app, _scratch) = test_app();
        let response = app
            .oneshot(json_request("POST", "/api/claude", None, r#"{"message":"  "}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
