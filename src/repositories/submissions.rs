use sqlx::{PgExecutor, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Submission;
use crate::db::types::{GradeSource, GradeState};

const COLUMNS: &str = "\
    id, exam_id, respondent_email, respondent_name, grade_state, total_points, \
    definitive_source, manual_total_points, ai_total_points, created_at, updated_at";

pub(crate) struct CreateSubmission<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) respondent_email: Option<&'a str>,
    pub(crate) respondent_name: Option<&'a str>,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create<'e>(
    executor: impl PgExecutor<'e>,
    params: CreateSubmission<'_>,
) -> Result<Submission, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "INSERT INTO submissions
             (id, exam_id, respondent_email, respondent_name, grade_state, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.respondent_email)
    .bind(params.respondent_name)
    .bind(GradeState::Ungraded)
    .bind(params.created_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    exam_id: &str,
    submission_id: &str,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {COLUMNS} FROM submissions WHERE exam_id = $1 AND id = $2"
    ))
    .bind(exam_id)
    .bind(submission_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {COLUMNS} FROM submissions WHERE exam_id = $1 ORDER BY created_at"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

/// Submissions a grading job still has to suggest scores for: anything
/// without an AI total yet.
pub(crate) async fn list_awaiting_ai_grading(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {COLUMNS} FROM submissions
         WHERE exam_id = $1 AND ai_total_points IS NULL
         ORDER BY created_at"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_in_grade_state(
    pool: &PgPool,
    exam_id: &str,
    grade_state: GradeState,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {COLUMNS} FROM submissions
         WHERE exam_id = $1 AND grade_state = $2
         ORDER BY created_at"
    ))
    .bind(exam_id)
    .bind(grade_state)
    .fetch_all(pool)
    .await
}

/// Mirrors the AI aggregate; `definitive_source` and `total_points` belong
/// to manual save and source selection. An ungraded submission becomes
/// draft-graded here so AI-only grades are eligible for finalization.
pub(crate) async fn set_ai_total<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    ai_total_points: f64,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET ai_total_points = $1,
             updated_at = $2,
             grade_state = CASE WHEN grade_state = $3 THEN $4 ELSE grade_state END
         WHERE id = $5",
    )
    .bind(ai_total_points)
    .bind(now)
    .bind(GradeState::Ungraded)
    .bind(GradeState::GradedDraft)
    .bind(submission_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn save_manual_draft<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    manual_total_points: f64,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET grade_state = $1,
             manual_total_points = $2,
             total_points = $2,
             definitive_source = $3,
             updated_at = $4
         WHERE id = $5",
    )
    .bind(GradeState::GradedDraft)
    .bind(manual_total_points)
    .bind(GradeSource::Manual)
    .bind(now)
    .bind(submission_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn set_definitive_source<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    source: GradeSource,
    total_points: f64,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET definitive_source = $1, total_points = $2, updated_at = $3
         WHERE id = $4",
    )
    .bind(source)
    .bind(total_points)
    .bind(now)
    .bind(submission_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn finalize<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: &str,
    source: Option<GradeSource>,
    total_points: Option<f64>,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET grade_state = $1, definitive_source = $2, total_points = $3, updated_at = $4
         WHERE id = $5",
    )
    .bind(GradeState::GradedFinal)
    .bind(source)
    .bind(total_points)
    .bind(now)
    .bind(submission_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn clear_grades_by_exam<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE submissions
         SET grade_state = $1,
             total_points = NULL,
             definitive_source = NULL,
             manual_total_points = NULL,
             ai_total_points = NULL,
             updated_at = $2
         WHERE exam_id = $3
           AND (manual_total_points IS NOT NULL OR ai_total_points IS NOT NULL)",
    )
    .bind(GradeState::Ungraded)
    .bind(now)
    .bind(exam_id)
    .execute(executor)
    .await?;

    Ok(updated.rows_affected())
}
