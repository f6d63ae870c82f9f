//! User database operations

use sqlx::PgPool;
use crate::models::{User, UserRole};

pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, name, email, phone, hashed_password, role, created_at, updated_at
        FROM users
        WHERE email = $1
        "#
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

pub async fn email_exists(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

pub async fn create(
    pool: &PgPool,
    name: &str,
    email: &str,
    phone: &str,
    hashed_password: &str,
    role: UserRole,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, phone, hashed_password, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, name, email, phone, hashed_password, role, created_at, updated_at
        "#
    )
    .bind(name)
    .bind(email)
    .bind(phone)
    .bind(hashed_password)
    .bind(role)
    .fetch_one(pool)
    .await
}
