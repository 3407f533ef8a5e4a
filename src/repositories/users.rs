use sqlx::{PgExecutor, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::User;

const COLUMNS: &str = "id, email, name, openai_api_key, is_active, created_at, updated_at";

pub(crate) struct CreateUser<'a> {
    pub(crate) id: &'a str,
    pub(crate) email: &'a str,
    pub(crate) name: Option<&'a str>,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateUser<'_>) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, email, name, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, TRUE, $4, $4)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.email)
    .bind(params.name)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn set_openai_api_key<'e>(
    executor: impl PgExecutor<'e>,
    user_id: &str,
    api_key: Option<&str>,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE users SET openai_api_key = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(api_key)
    .bind(now)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(updated.rows_affected() > 0)
}
