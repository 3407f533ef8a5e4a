//! Per-submission AI totals. The incremental sum written by the grading
//! pipeline must always be re-derivable from the stored answer grades, so the
//! recompute helpers here are the source of truth the pipeline's sums are
//! checked against.

use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::AnswerGrade;
use crate::repositories;

/// Sums the per-answer points of one grading run. Answers that errored or
/// were skipped contribute an explicit 0, so summation is idempotent.
pub(crate) fn sum_points(per_answer_points: &[f64]) -> f64 {
    per_answer_points.iter().copied().filter(|points| points.is_finite()).sum()
}

/// Re-derives the AI total from the full answer-grade set. `None` when no
/// answer carries AI points yet, matching the "total is non-null iff at
/// least one track entry exists" rule.
pub(crate) fn recompute_ai_total(answer_grades: &[AnswerGrade]) -> Option<f64> {
    let points: Vec<f64> =
        answer_grades.iter().filter_map(|grade| grade.ai_suggested_points).collect();
    if points.is_empty() {
        return None;
    }
    Some(points.iter().sum())
}

/// Manual-track counterpart of [`recompute_ai_total`].
pub(crate) fn recompute_manual_total(answer_grades: &[AnswerGrade]) -> Option<f64> {
    let points: Vec<f64> = answer_grades.iter().filter_map(|grade| grade.manual_points).collect();
    if points.is_empty() {
        return None;
    }
    Some(points.iter().sum())
}

/// Writes the AI total to the grade row and the submission mirror in one
/// transaction. Neither `definitive_source` nor the submission's primary
/// `total_points` is touched; those belong to the source resolver.
pub(crate) async fn persist_ai_total(
    pool: &PgPool,
    submission_id: &str,
    exam_id: &str,
    ai_total_points: f64,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    repositories::grades::set_ai_total(&mut *tx, submission_id, exam_id, ai_total_points, now)
        .await?;
    repositories::submissions::set_ai_total(&mut *tx, submission_id, ai_total_points, now).await?;
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use sqlx::types::Json;
    use time::macros::datetime;

    use super::*;

    fn answer_grade(
        question_id: &str,
        manual: Option<f64>,
        ai: Option<f64>,
    ) -> AnswerGrade {
        AnswerGrade {
            submission_id: "s1".to_string(),
            question_id: question_id.to_string(),
            manual_points: manual,
            manual_comment: None,
            manual_inline_comments: Json(Vec::new()),
            ai_suggested_points: ai,
            ai_suggested_comment: None,
            ai_inline_comments: Json(Vec::new()),
            updated_at: datetime!(2025-06-01 12:00),
        }
    }

    #[test]
    fn summation_is_idempotent() {
        let points = vec![3.0, 0.0, 4.5];
        assert_eq!(sum_points(&points), sum_points(&points));
        assert_eq!(sum_points(&points), 7.5);
    }

    #[test]
    fn non_finite_inputs_do_not_poison_the_sum() {
        assert_eq!(sum_points(&[2.0, f64::NAN, 3.0]), 5.0);
    }

    #[test]
    fn recompute_matches_incremental_sum() {
        let grades = vec![
            answer_grade("q1", Some(5.0), Some(4.0)),
            answer_grade("q2", None, Some(2.0)),
            answer_grade("q3", Some(1.0), None),
        ];
        assert_eq!(recompute_ai_total(&grades), Some(6.0));
        assert_eq!(recompute_manual_total(&grades), Some(6.0));
    }

    #[test]
    fn totals_are_null_when_no_track_entries_exist() {
        let grades = vec![answer_grade("q1", None, None)];
        assert_eq!(recompute_ai_total(&grades), None);
        assert_eq!(recompute_manual_total(&grades), None);
        assert_eq!(recompute_ai_total(&[]), None);
    }
}
