use std::collections::HashMap;

use sqlx::PgPool;
use thiserror::Error;

use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::InlineComment;
use crate::db::types::GradeSource;
use crate::repositories;
use crate::services::aggregation;
use crate::services::exam_lifecycle::{ensure_exam_mutable, ExamGuardError};

#[derive(Debug, Error)]
pub(crate) enum SaveDraftError {
    #[error(transparent)]
    Guard(#[from] ExamGuardError),
    #[error("submission not found")]
    SubmissionNotFound,
    #[error("invalid question id: {0}")]
    UnknownQuestion(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct DraftInlineComment {
    pub(crate) id: String,
    pub(crate) start_index: usize,
    pub(crate) end_index: usize,
    pub(crate) text: String,
}

#[derive(Debug, Clone)]
pub(crate) struct DraftItem {
    pub(crate) question_id: String,
    pub(crate) points_awarded: f64,
    pub(crate) comment: Option<String>,
    pub(crate) inline_comments: Vec<DraftInlineComment>,
}

/// Persists a manual grading pass: per-question points clamped to the
/// question maximum, the manual total re-derived from the full stored
/// answer-grade set, and the grade/submission pair in one transaction.
/// Saving a manual draft claims the definitive source for the manual track.
pub(crate) async fn save_draft(
    pool: &PgPool,
    exam_id: &str,
    submission_id: &str,
    items: &[DraftItem],
    manual_comments_overall: Option<&str>,
) -> Result<f64, SaveDraftError> {
    ensure_exam_mutable(pool, exam_id).await?;

    let submission = repositories::submissions::find_by_id(pool, exam_id, submission_id)
        .await?
        .ok_or(SaveDraftError::SubmissionNotFound)?;

    let questions = repositories::questions::list_by_exam(pool, exam_id).await?;
    let max_points_by_question: HashMap<&str, i32> = questions
        .iter()
        .map(|question| (question.id.as_str(), question.max_points))
        .collect();

    let now = primitive_now_utc();
    let created_at = format_primitive(now);
    let mut tx = pool.begin().await?;

    for item in items {
        let max_points = *max_points_by_question
            .get(item.question_id.as_str())
            .ok_or_else(|| SaveDraftError::UnknownQuestion(item.question_id.clone()))?;

        let clamped = item.points_awarded.clamp(0.0, max_points as f64);

        let inline_comments: Vec<InlineComment> = item
            .inline_comments
            .iter()
            .map(|comment| InlineComment {
                id: comment.id.clone(),
                start_index: comment.start_index,
                end_index: comment.end_index,
                text: comment.text.clone(),
                source: GradeSource::Manual,
                created_at: created_at.clone(),
            })
            .collect();

        repositories::answer_grades::upsert_manual_track(
            &mut *tx,
            &submission.id,
            &item.question_id,
            clamped,
            item.comment.as_deref(),
            &inline_comments,
            now,
        )
        .await?;
    }

    // The total is re-derived from the full stored set, so a save covering
    // only some questions keeps the points of earlier passes.
    let stored = repositories::answer_grades::list_by_submission(&mut *tx, &submission.id).await?;
    let total_points = aggregation::recompute_manual_total(&stored).unwrap_or(0.0);

    repositories::grades::save_manual_draft(
        &mut *tx,
        &submission.id,
        exam_id,
        total_points,
        manual_comments_overall,
        now,
    )
    .await?;
    repositories::submissions::save_manual_draft(&mut *tx, &submission.id, total_points, now)
        .await?;

    tx.commit().await?;

    tracing::info!(submission_id, total_points, "Manual draft saved");
    Ok(total_points)
}
