use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::Exam;
use crate::db::types::ExamState;
use crate::repositories;

const PUBLIC_TOKEN_LEN: usize = 22;

#[derive(Debug, Error)]
pub(crate) enum ExamGuardError {
    #[error("exam not found")]
    NotFound,
    #[error("exam has been evaluated; grades are locked")]
    Finalized,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Loads the exam and rejects when it has reached the terminal `Evaluated`
/// state. Every mutating grading operation goes through this boundary.
pub(crate) async fn ensure_exam_mutable(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Exam, ExamGuardError> {
    let exam =
        repositories::exams::find_by_id(pool, exam_id).await?.ok_or(ExamGuardError::NotFound)?;

    if exam.state == ExamState::Evaluated {
        return Err(ExamGuardError::Finalized);
    }

    Ok(exam)
}

#[derive(Debug, Error)]
pub(crate) enum PublishError {
    #[error("exam not found")]
    NotFound,
    #[error("only draft exams can be published")]
    NotDraft,
    #[error("cannot publish an exam with no questions")]
    NoQuestions,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Draft -> Published. Freezes the question set by recording its count and
/// the maximum total, and mints the public token respondents submit with.
pub(crate) async fn publish_exam(pool: &PgPool, exam_id: &str) -> Result<Exam, PublishError> {
    let exam =
        repositories::exams::find_by_id(pool, exam_id).await?.ok_or(PublishError::NotFound)?;
    if exam.state != ExamState::Draft {
        return Err(PublishError::NotDraft);
    }

    let questions = repositories::questions::list_by_exam(pool, exam_id).await?;
    if questions.is_empty() {
        return Err(PublishError::NoQuestions);
    }

    let questions_count = questions.len() as i32;
    let max_total_points: f64 =
        questions.iter().map(|question| question.max_points as f64).sum();
    let public_token = generate_public_token();

    let published = repositories::exams::publish(
        pool,
        exam_id,
        &public_token,
        questions_count,
        max_total_points,
        primitive_now_utc(),
    )
    .await?;
    if !published {
        return Err(PublishError::NotDraft);
    }

    tracing::info!(exam_id, questions_count, max_total_points, "Exam published");

    repositories::exams::find_by_id(pool, exam_id).await?.ok_or(PublishError::NotFound)
}

pub(crate) fn generate_public_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PUBLIC_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub(crate) fn new_entity_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_tokens_are_url_safe_and_unique_enough() {
        let first = generate_public_token();
        let second = generate_public_token();
        assert_eq!(first.chars().count(), PUBLIC_TOKEN_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }
}
