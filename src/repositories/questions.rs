use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Question;

const COLUMNS: &str = "id, exam_id, order_index, text, max_points, rubric_text, created_at";

pub(crate) struct CreateQuestion<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) order_index: i32,
    pub(crate) text: &'a str,
    pub(crate) max_points: i32,
    pub(crate) rubric_text: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateQuestion<'_>,
) -> Result<Question, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "INSERT INTO questions (id, exam_id, order_index, text, max_points, rubric_text, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.order_index)
    .bind(params.text)
    .bind(params.max_points)
    .bind(params.rubric_text)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 ORDER BY order_index"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}
