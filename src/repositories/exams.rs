use sqlx::{PgExecutor, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Exam;
use crate::db::types::ExamState;

const COLUMNS: &str = "\
    id, owner_id, title, description, state, public_token, questions_count, \
    max_total_points, created_at, updated_at, published_at, finalized_at";

pub(crate) struct CreateExam<'a> {
    pub(crate) id: &'a str,
    pub(crate) owner_id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) description: Option<&'a str>,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateExam<'_>) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (id, owner_id, title, description, state, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.owner_id)
    .bind(params.title)
    .bind(params.description)
    .bind(ExamState::Draft)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, exam_id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(exam_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_by_owner(
    pool: &PgPool,
    owner_id: &str,
) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams WHERE owner_id = $1 ORDER BY created_at DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_by_public_token(
    pool: &PgPool,
    public_token: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE public_token = $1"))
        .bind(public_token)
        .fetch_optional(pool)
        .await
}

/// Draft -> Published. Returns false when the exam was not in draft state,
/// so callers can surface a conflict instead of silently re-publishing.
pub(crate) async fn publish(
    pool: &PgPool,
    exam_id: &str,
    public_token: &str,
    questions_count: i32,
    max_total_points: f64,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE exams
         SET state = $1,
             public_token = $2,
             questions_count = $3,
             max_total_points = $4,
             published_at = $5,
             updated_at = $5
         WHERE id = $6 AND state = $7",
    )
    .bind(ExamState::Published)
    .bind(public_token)
    .bind(questions_count)
    .bind(max_total_points)
    .bind(now)
    .bind(exam_id)
    .bind(ExamState::Draft)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Published -> Evaluated, recorded once finalization has processed every
/// eligible submission.
pub(crate) async fn mark_evaluated<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE exams SET state = $1, finalized_at = $2, updated_at = $2 WHERE id = $3",
    )
    .bind(ExamState::Evaluated)
    .bind(now)
    .bind(exam_id)
    .execute(executor)
    .await?;

    Ok(())
}
