use sqlx::types::Json;
use sqlx::PgExecutor;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerGrade, InlineComment};

const COLUMNS: &str = "\
    submission_id, question_id, manual_points, manual_comment, manual_inline_comments, \
    ai_suggested_points, ai_suggested_comment, ai_inline_comments, updated_at";

pub(crate) async fn list_by_submission<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
) -> Result<Vec<AnswerGrade>, sqlx::Error> {
    sqlx::query_as::<_, AnswerGrade>(&format!(
        "SELECT {COLUMNS} FROM answer_grades WHERE submission_id = $1"
    ))
    .bind(submission_id)
    .fetch_all(executor)
    .await
}

/// Writes the AI track of one answer grade, leaving every manual field
/// untouched whether the row exists or not.
pub(crate) async fn upsert_ai_track<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    question_id: &str,
    points: f64,
    comment: &str,
    inline_comments: &[InlineComment],
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO answer_grades
             (submission_id, question_id, ai_suggested_points, ai_suggested_comment,
              ai_inline_comments, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (submission_id, question_id)
         DO UPDATE SET ai_suggested_points = EXCLUDED.ai_suggested_points,
                       ai_suggested_comment = EXCLUDED.ai_suggested_comment,
                       ai_inline_comments = EXCLUDED.ai_inline_comments,
                       updated_at = EXCLUDED.updated_at",
    )
    .bind(submission_id)
    .bind(question_id)
    .bind(points)
    .bind(comment)
    .bind(Json(inline_comments))
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Manual counterpart of [`upsert_ai_track`]; the AI suggestion fields are
/// preserved.
pub(crate) async fn upsert_manual_track<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    question_id: &str,
    points: f64,
    comment: Option<&str>,
    inline_comments: &[InlineComment],
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO answer_grades
             (submission_id, question_id, manual_points, manual_comment,
              manual_inline_comments, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (submission_id, question_id)
         DO UPDATE SET manual_points = EXCLUDED.manual_points,
                       manual_comment = EXCLUDED.manual_comment,
                       manual_inline_comments = EXCLUDED.manual_inline_comments,
                       updated_at = EXCLUDED.updated_at",
    )
    .bind(submission_id)
    .bind(question_id)
    .bind(points)
    .bind(comment)
    .bind(Json(inline_comments))
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn delete_by_exam<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query(
        "DELETE FROM answer_grades
         WHERE submission_id IN (SELECT id FROM submissions WHERE exam_id = $1)",
    )
    .bind(exam_id)
    .execute(executor)
    .await?;

    Ok(deleted.rows_affected())
}
