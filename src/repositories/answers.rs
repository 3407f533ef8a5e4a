use sqlx::{PgExecutor, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Answer;

const COLUMNS: &str = "submission_id, question_id, text, created_at";

/// Answers are immutable once written; conflicts are ignored rather than
/// overwritten.
pub(crate) async fn create<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    question_id: &str,
    text: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO answers (submission_id, question_id, text, created_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (submission_id, question_id) DO NOTHING",
    )
    .bind(submission_id)
    .bind(question_id)
    .bind(text)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn list_by_submission(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE submission_id = $1"
    ))
    .bind(submission_id)
    .fetch_all(pool)
    .await
}
