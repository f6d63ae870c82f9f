//! Authentication module with JWT

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{LoginRequest, LoginResponse, MessageResponse, SignupRequest, UserRole};
use crate::server::{api_error, db, ApiError, AppState};

const TOKEN_TTL_HOURS: i64 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,        // user id
    pub email: String,
    pub role: String,
    pub exp: usize,      // expiration timestamp
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, DEFAULT_COST)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Create a JWT token for a user
pub fn create_token(user_id: i64, email: &str, role: UserRole, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role: role.as_str().to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// JWT Auth extractor - extracts Claims from Authorization header
impl FromRequestParts<Arc<AppState>> for Claims {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| api_error(StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        validate_token(bearer.token(), &state.jwt_secret)
            .map_err(|_| api_error(StatusCode::UNAUTHORIZED, "Invalid token"))
    }
}

/// Signup fields after validation
#[derive(Debug, PartialEq)]
struct NewAccount<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    phone: &'a str,
    role: UserRole,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn validate_signup(req: &SignupRequest) -> Result<NewAccount<'_>, &'static str> {
    let (Some(name), Some(email), Some(password), Some(phone)) = (
        non_empty(&req.name),
        non_empty(&req.email),
        req.password.as_deref().filter(|p| !p.is_empty()),
        non_empty(&req.phone),
    ) else {
        return Err("All fields (name, email, password, phone, role) are required.");
    };

    let role = match non_empty(&req.role) {
        None => UserRole::User,
        Some(role) => UserRole::parse(role).ok_or("Invalid role. Must be 'user' or 'admin'.")?,
    };

    if !email.contains('@') || !email.contains('.') {
        return Err("Invalid email format.");
    }

    Ok(NewAccount { name, email, password, phone, role })
}

fn database_error(e: sqlx::Error) -> ApiError {
    tracing::error!("Database error: {}", e);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Database error occurred. Please try again later.",
    )
}

/// Signup handler
pub async fn signup(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let account = validate_signup(&req).map_err(|msg| api_error(StatusCode::BAD_REQUEST, msg))?;

    let duplicate = || api_error(StatusCode::CONFLICT, "User with this email already exists.");

    if db::users::email_exists(&state.db, account.email)
        .await
        .map_err(database_error)?
    {
        return Err(duplicate());
    }

    let hashed_password = hash_password(account.password).map_err(|e| {
        tracing::error!("Password hashing error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Password hashing error")
    })?;

    let user = db::users::create(
        &state.db,
        account.name,
        account.email,
        account.phone,
        &hashed_password,
        account.role,
    )
    .await
    .map_err(|e| match e.as_database_error() {
        // Lost a race with a concurrent signup for the same email
        Some(db_err) if db_err.is_unique_violation() => duplicate(),
        _ => database_error(e),
    })?;

    tracing::info!(user_id = user.id, role = user.role.as_str(), "User registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok("User registered successfully.")),
    ))
}

/// Login handler
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let password = req.password.as_deref().filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (non_empty(&req.email), password) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Email and password are required"));
    };

    let invalid = || api_error(StatusCode::UNAUTHORIZED, "Invalid email or password");

    let user = db::users::get_by_email(&state.db, email)
        .await
        .map_err(database_error)?
        .ok_or_else(invalid)?;

    let valid = verify_password(password, &user.hashed_password).map_err(|e| {
        tracing::error!("Password verification error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Password verification error")
    })?;

    if !valid {
        return Err(invalid());
    }

    let token = create_token(user.id, &user.email, user.role.clone(), &state.jwt_secret).map_err(|e| {
        tracing::error!("Token generation error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Token generation error")
    })?;

    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful".to_string(),
        token,
        user: user.to_info(),
    }))
}

/// Tokens are stateless; logging out only requires a valid one
pub async fn logout(claims: Claims) -> Json<MessageResponse> {
    tracing::info!(user_id = claims.sub, "User logged out");
    Json(MessageResponse::ok("Logged out successfully"))
}

pub async fn protected(claims: Claims) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "logged_in_as": claims.email }))
}
