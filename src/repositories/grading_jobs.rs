use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::GradingJob;
use crate::db::types::{GradingMode, JobStatus};

const COLUMNS: &str =
    "id, exam_id, owner_id, status, mode, error, created_at, started_at, completed_at";

pub(crate) struct CreateGradingJob<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) owner_id: &'a str,
    pub(crate) mode: GradingMode,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateGradingJob<'_>,
) -> Result<GradingJob, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "INSERT INTO grading_jobs (id, exam_id, owner_id, status, mode, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.owner_id)
    .bind(JobStatus::Pending)
    .bind(params.mode)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    job_id: &str,
) -> Result<Option<GradingJob>, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "SELECT {COLUMNS} FROM grading_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

/// Claims the oldest pending job, moving it to processing so that concurrent
/// workers never consume the same job twice.
pub(crate) async fn claim_next(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<GradingJob>, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "WITH candidate AS (
            SELECT id FROM grading_jobs
            WHERE status = $1
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE grading_jobs
        SET status = $2, started_at = $3
        FROM candidate
        WHERE grading_jobs.id = candidate.id
        RETURNING {COLUMNS}"
    ))
    .bind(JobStatus::Pending)
    .bind(JobStatus::Processing)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn mark_completed(
    pool: &PgPool,
    job_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE grading_jobs SET status = $1, completed_at = $2, error = NULL WHERE id = $3",
    )
    .bind(JobStatus::Completed)
    .bind(now)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn mark_failed(
    pool: &PgPool,
    job_id: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE grading_jobs SET status = $1, completed_at = $2, error = $3 WHERE id = $4",
    )
    .bind(JobStatus::Failed)
    .bind(now)
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}
