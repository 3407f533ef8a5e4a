use sqlx::PgPool;
use thiserror::Error;

use crate::core::time::primitive_now_utc;
use crate::db::types::{ExamState, GradeSource};
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum SetSourceError {
    #[error("exam not found")]
    ExamNotFound,
    #[error("exam has been evaluated; grades are locked")]
    ExamFinalized,
    #[error("no grade exists for this submission")]
    GradeNotFound,
    #[error("the {0:?} total is not available for this submission")]
    TotalUnavailable(GradeSource),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Marks one of the two score tracks as authoritative. The grade row and the
/// submission mirror are updated in a single transaction so `total_points`
/// can never disagree with the chosen source.
pub(crate) async fn set_source(
    pool: &PgPool,
    exam_id: &str,
    submission_id: &str,
    source: GradeSource,
) -> Result<f64, SetSourceError> {
    let exam = repositories::exams::find_by_id(pool, exam_id)
        .await?
        .ok_or(SetSourceError::ExamNotFound)?;
    if exam.state == ExamState::Evaluated {
        return Err(SetSourceError::ExamFinalized);
    }

    let grade = repositories::grades::find_by_submission(pool, submission_id)
        .await?
        .ok_or(SetSourceError::GradeNotFound)?;

    let total = match source {
        GradeSource::Manual => grade.manual_total_points,
        GradeSource::Ai => grade.ai_total_points,
    }
    .ok_or(SetSourceError::TotalUnavailable(source))?;

    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;
    repositories::grades::set_definitive_source(&mut *tx, submission_id, source, now).await?;
    repositories::submissions::set_definitive_source(&mut *tx, submission_id, source, total, now)
        .await?;
    tx.commit().await?;

    tracing::info!(submission_id, source = ?source, total_points = total, "Definitive source set");
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ResolvedSource {
    pub(crate) source: Option<GradeSource>,
    pub(crate) points: Option<f64>,
}

/// Finalization default when no usable explicit choice exists: prefer the
/// manual total, then the AI total, then any pre-existing submission total.
/// Defaulting to human judgment is deliberate.
pub(crate) fn resolve_for_finalize(
    explicit: Option<GradeSource>,
    manual_total: Option<f64>,
    ai_total: Option<f64>,
    legacy_total: Option<f64>,
) -> ResolvedSource {
    match explicit {
        Some(GradeSource::Manual) if manual_total.is_some() => {
            return ResolvedSource { source: explicit, points: manual_total };
        }
        Some(GradeSource::Ai) if ai_total.is_some() => {
            return ResolvedSource { source: explicit, points: ai_total };
        }
        _ => {}
    }

    if manual_total.is_some() {
        ResolvedSource { source: Some(GradeSource::Manual), points: manual_total }
    } else if ai_total.is_some() {
        ResolvedSource { source: Some(GradeSource::Ai), points: ai_total }
    } else if legacy_total.is_some() {
        // The explicit choice (possibly none) stands; only the points fall
        // back to the legacy field.
        ResolvedSource { source: explicit, points: legacy_total }
    } else {
        ResolvedSource { source: explicit, points: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_source_with_matching_total_wins() {
        let resolved =
            resolve_for_finalize(Some(GradeSource::Ai), Some(7.0), Some(6.0), None);
        assert_eq!(resolved.source, Some(GradeSource::Ai));
        assert_eq!(resolved.points, Some(6.0));
    }

    #[test]
    fn explicit_source_without_total_falls_back_to_default_ordering() {
        let resolved = resolve_for_finalize(Some(GradeSource::Manual), None, Some(8.0), None);
        assert_eq!(resolved.source, Some(GradeSource::Ai));
        assert_eq!(resolved.points, Some(8.0));
    }

    #[test]
    fn manual_total_is_preferred_when_unset() {
        let resolved = resolve_for_finalize(None, Some(7.0), Some(9.0), None);
        assert_eq!(resolved.source, Some(GradeSource::Manual));
        assert_eq!(resolved.points, Some(7.0));
    }

    #[test]
    fn ai_total_is_the_default_when_manual_is_missing() {
        let resolved = resolve_for_finalize(None, None, Some(8.0), None);
        assert_eq!(resolved.source, Some(GradeSource::Ai));
        assert_eq!(resolved.points, Some(8.0));
    }

    #[test]
    fn legacy_total_is_the_last_resort() {
        let resolved = resolve_for_finalize(None, None, None, Some(5.5));
        assert_eq!(resolved.source, None);
        assert_eq!(resolved.points, Some(5.5));
    }

    #[test]
    fn nothing_available_resolves_to_null_points() {
        let resolved = resolve_for_finalize(None, None, None, None);
        assert_eq!(resolved.source, None);
        assert_eq!(resolved.points, None);
    }
}
