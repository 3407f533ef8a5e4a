use sqlx::{PgExecutor, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Grade;
use crate::db::types::{GradeSource, GradeState};

const COLUMNS: &str = "\
    submission_id, exam_id, state, manual_total_points, ai_total_points, \
    manual_comments_overall, ai_comments_overall, definitive_source, updated_at, finalized_at";

pub(crate) async fn find_by_submission(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Option<Grade>, sqlx::Error> {
    sqlx::query_as::<_, Grade>(&format!(
        "SELECT {COLUMNS} FROM grades WHERE submission_id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(pool)
    .await
}

/// AI aggregation writes only its own track; the manual fields and the
/// definitive source are never touched from here.
pub(crate) async fn set_ai_total<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    exam_id: &str,
    ai_total_points: f64,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO grades (submission_id, exam_id, state, ai_total_points, updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (submission_id)
         DO UPDATE SET ai_total_points = EXCLUDED.ai_total_points, updated_at = EXCLUDED.updated_at",
    )
    .bind(submission_id)
    .bind(exam_id)
    .bind(GradeState::GradedDraft)
    .bind(ai_total_points)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn set_ai_comments_overall<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    exam_id: &str,
    comment: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO grades (submission_id, exam_id, state, ai_comments_overall, updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (submission_id)
         DO UPDATE SET ai_comments_overall = EXCLUDED.ai_comments_overall,
                       updated_at = EXCLUDED.updated_at",
    )
    .bind(submission_id)
    .bind(exam_id)
    .bind(GradeState::GradedDraft)
    .bind(comment)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn save_manual_draft<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    exam_id: &str,
    manual_total_points: f64,
    manual_comments_overall: Option<&str>,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO grades
             (submission_id, exam_id, state, manual_total_points, manual_comments_overall,
              definitive_source, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (submission_id)
         DO UPDATE SET state = EXCLUDED.state,
                       manual_total_points = EXCLUDED.manual_total_points,
                       manual_comments_overall = EXCLUDED.manual_comments_overall,
                       definitive_source = EXCLUDED.definitive_source,
                       updated_at = EXCLUDED.updated_at",
    )
    .bind(submission_id)
    .bind(exam_id)
    .bind(GradeState::GradedDraft)
    .bind(manual_total_points)
    .bind(manual_comments_overall)
    .bind(GradeSource::Manual)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn set_definitive_source<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    source: GradeSource,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE grades SET definitive_source = $1, updated_at = $2 WHERE submission_id = $3",
    )
    .bind(source)
    .bind(now)
    .bind(submission_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn finalize<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    exam_id: &str,
    source: Option<GradeSource>,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO grades (submission_id, exam_id, state, definitive_source, updated_at, finalized_at)
         VALUES ($1, $2, $3, $4, $5, $5)
         ON CONFLICT (submission_id)
         DO UPDATE SET state = EXCLUDED.state,
                       definitive_source = EXCLUDED.definitive_source,
                       updated_at = EXCLUDED.updated_at,
                       finalized_at = EXCLUDED.finalized_at",
    )
    .bind(submission_id)
    .bind(exam_id)
    .bind(GradeState::GradedFinal)
    .bind(source)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn delete_by_exam<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM grades WHERE exam_id = $1")
        .bind(exam_id)
        .execute(executor)
        .await?;

    Ok(deleted.rows_affected())
}
