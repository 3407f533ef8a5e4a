use sqlx::PgPool;
use thiserror::Error;

use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::services::exam_lifecycle::{ensure_exam_mutable, ExamGuardError};

#[derive(Debug, Error)]
pub(crate) enum GradeResetError {
    #[error(transparent)]
    Guard(#[from] ExamGuardError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Wipes both score tracks for every submission of an exam: per-answer
/// records, grade rows, and the denormalized mirror, in one transaction.
/// Returns how many submissions had grades to clear.
pub(crate) async fn clear_exam_grades(
    pool: &PgPool,
    exam_id: &str,
) -> Result<u64, GradeResetError> {
    ensure_exam_mutable(pool, exam_id).await?;

    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;
    repositories::answer_grades::delete_by_exam(&mut *tx, exam_id).await?;
    repositories::grades::delete_by_exam(&mut *tx, exam_id).await?;
    let cleared = repositories::submissions::clear_grades_by_exam(&mut *tx, exam_id, now).await?;
    tx.commit().await?;

    tracing::info!(exam_id, cleared, "Cleared all grades for exam");
    Ok(cleared)
}
