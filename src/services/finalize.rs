use std::collections::HashMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, Grade, Question, Submission};
use crate::db::types::{ExamState, GradeSource, GradeState};
use crate::repositories;
use crate::repositories::operations::BeginOutcome;
use crate::services::concurrency::run_with_concurrency;
use crate::services::definitive_source::{resolve_for_finalize, ResolvedSource};
use crate::services::email::{build_result_email, AnswerDetail, EmailMessage, Mailer, ResultEmail};

const FINALIZE_OPERATION_PREFIX: &str = "finalize:";

/// The idempotent result of a finalize run: replayed verbatim for a repeated
/// `request_id` without re-executing any side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FinalizeOutcome {
    pub(crate) message: String,
    pub(crate) sent: u32,
    pub(crate) skipped: u32,
}

#[derive(Debug, Error)]
pub(crate) enum FinalizeError {
    #[error("exam not found")]
    ExamNotFound,
    #[error("only published exams can be finalized")]
    ExamNotPublished,
    #[error("exam has already been evaluated")]
    AlreadyFinalized,
    #[error("stored finalize result could not be decoded: {0}")]
    Ledger(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

enum NotificationOutcome {
    Sent,
    Skipped,
}

/// Locks every draft-graded submission of the exam into `GradedFinal`,
/// resolving the definitive source per submission, then notifies respondents
/// and moves the exam to `Evaluated`.
///
/// The idempotency record only dedupes *completed* runs: a second call with
/// the same `request_id` arriving while the first is still in progress is not
/// blocked by the ledger and can double-send.
pub(crate) async fn finalize(
    state: &AppState,
    exam_id: &str,
    request_id: Option<&str>,
) -> Result<FinalizeOutcome, FinalizeError> {
    let pool = state.db();
    let operation = format!("{FINALIZE_OPERATION_PREFIX}{exam_id}");

    if let Some(request_id) = request_id {
        let begun =
            repositories::operations::begin(pool, &operation, request_id, primitive_now_utc())
                .await?;
        if let BeginOutcome::AlreadyCompleted(result) = begun {
            tracing::info!(exam_id, request_id, "Replaying completed finalize request");
            return serde_json::from_value(result)
                .map_err(|err| FinalizeError::Ledger(err.to_string()));
        }
    }

    let exam = repositories::exams::find_by_id(pool, exam_id)
        .await?
        .ok_or(FinalizeError::ExamNotFound)?;
    match exam.state {
        ExamState::Draft => return Err(FinalizeError::ExamNotPublished),
        ExamState::Evaluated => return Err(FinalizeError::AlreadyFinalized),
        ExamState::Published => {}
    }

    let eligible = repositories::submissions::list_in_grade_state(
        pool,
        exam_id,
        GradeState::GradedDraft,
    )
    .await?;

    if eligible.is_empty() {
        let outcome = FinalizeOutcome {
            message: "No submissions in draft state to finalize.".to_string(),
            sent: 0,
            skipped: 0,
        };
        complete_ledger(pool, &operation, request_id, &outcome).await?;
        return Ok(outcome);
    }

    let questions = repositories::questions::list_by_exam(pool, exam_id).await?;
    let total = eligible.len();

    let tasks: Vec<_> = eligible
        .into_iter()
        .map(|submission| {
            let state = state.clone();
            let exam = exam.clone();
            let questions = questions.clone();
            move || async move { finalize_submission(&state, &exam, &questions, submission).await }
        })
        .collect();

    let results =
        run_with_concurrency(tasks, state.settings().email().send_concurrency).await;
    let sent =
        results.iter().filter(|outcome| matches!(outcome, NotificationOutcome::Sent)).count()
            as u32;
    let skipped = total as u32 - sent;

    // Finalized means the grades are locked, not that every email landed.
    repositories::exams::mark_evaluated(pool, exam_id, primitive_now_utc()).await?;
    tracing::info!(exam_id, sent, skipped, "Exam finalized and set to evaluated");

    let outcome =
        FinalizeOutcome { message: "Finalization complete.".to_string(), sent, skipped };
    complete_ledger(pool, &operation, request_id, &outcome).await?;
    Ok(outcome)
}

async fn complete_ledger(
    pool: &PgPool,
    operation: &str,
    request_id: Option<&str>,
    outcome: &FinalizeOutcome,
) -> Result<(), FinalizeError> {
    let Some(request_id) = request_id else {
        return Ok(());
    };

    let result =
        serde_json::to_value(outcome).map_err(|err| FinalizeError::Ledger(err.to_string()))?;
    repositories::operations::complete(pool, operation, request_id, &result, primitive_now_utc())
        .await?;
    Ok(())
}

async fn finalize_submission(
    state: &AppState,
    exam: &Exam,
    questions: &[Question],
    submission: Submission,
) -> NotificationOutcome {
    let pool = state.db();

    let grade = match repositories::grades::find_by_submission(pool, &submission.id).await {
        Ok(grade) => grade,
        Err(err) => {
            tracing::error!(submission_id = %submission.id, error = %err, "Failed to load grade; skipping submission");
            metrics::counter!("finalize_notifications_total", "status" => "skipped").increment(1);
            return NotificationOutcome::Skipped;
        }
    };

    let explicit = submission
        .definitive_source
        .or_else(|| grade.as_ref().and_then(|grade| grade.definitive_source));
    let resolved = resolve_for_finalize(
        explicit,
        grade.as_ref().and_then(|grade| grade.manual_total_points),
        grade.as_ref().and_then(|grade| grade.ai_total_points),
        submission.total_points,
    );

    let now = primitive_now_utc();
    let locked = async {
        let mut tx = pool.begin().await?;
        repositories::submissions::finalize(
            &mut *tx,
            &submission.id,
            resolved.source,
            resolved.points,
            now,
        )
        .await?;
        repositories::grades::finalize(&mut *tx, &submission.id, &exam.id, resolved.source, now)
            .await?;
        tx.commit().await
    };
    if let Err(err) = locked.await {
        tracing::error!(submission_id = %submission.id, error = %err, "Failed to lock final grade; submission stays in draft");
        metrics::counter!("finalize_notifications_total", "status" => "skipped").increment(1);
        return NotificationOutcome::Skipped;
    }

    // The grade is durable from here; anything that fails below only costs
    // the notification.
    let (Some(recipient), Some(final_points)) =
        (submission.respondent_email.as_deref(), resolved.points)
    else {
        tracing::warn!(submission_id = %submission.id, "Skipping result email: missing address or final points");
        metrics::counter!("finalize_notifications_total", "status" => "skipped").increment(1);
        return NotificationOutcome::Skipped;
    };

    let Some(mailer) = state.mailer() else {
        tracing::warn!(submission_id = %submission.id, "Skipping result email: mailer not configured");
        metrics::counter!("finalize_notifications_total", "status" => "skipped").increment(1);
        return NotificationOutcome::Skipped;
    };

    match send_result_email(
        pool,
        mailer,
        exam,
        questions,
        &submission,
        grade.as_ref(),
        &resolved,
        recipient,
        final_points,
    )
    .await
    {
        Ok(()) => {
            metrics::counter!("finalize_notifications_total", "status" => "sent").increment(1);
            NotificationOutcome::Sent
        }
        Err(err) => {
            tracing::error!(submission_id = %submission.id, to = recipient, error = %err, "Failed to send result email");
            metrics::counter!("finalize_notifications_total", "status" => "skipped").increment(1);
            NotificationOutcome::Skipped
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_result_email(
    pool: &PgPool,
    mailer: &Mailer,
    exam: &Exam,
    questions: &[Question],
    submission: &Submission,
    grade: Option<&Grade>,
    resolved: &ResolvedSource,
    recipient: &str,
    final_points: f64,
) -> anyhow::Result<()> {
    let answers = repositories::answers::list_by_submission(pool, &submission.id)
        .await
        .context("Failed to load answers")?;
    let answer_grades = repositories::answer_grades::list_by_submission(pool, &submission.id)
        .await
        .context("Failed to load answer grades")?;

    let answers_by_question: HashMap<&str, &str> = answers
        .iter()
        .map(|answer| (answer.question_id.as_str(), answer.text.as_str()))
        .collect();
    let grades_by_question: HashMap<&str, _> = answer_grades
        .iter()
        .map(|answer_grade| (answer_grade.question_id.as_str(), answer_grade))
        .collect();

    let use_ai_track = resolved.source == Some(GradeSource::Ai);
    let details: Vec<AnswerDetail> = questions
        .iter()
        .map(|question| {
            let answer_grade = grades_by_question.get(question.id.as_str());
            let (points, comment) = match answer_grade {
                Some(answer_grade) if use_ai_track => (
                    answer_grade.ai_suggested_points,
                    answer_grade.ai_suggested_comment.clone(),
                ),
                Some(answer_grade) => {
                    (answer_grade.manual_points, answer_grade.manual_comment.clone())
                }
                None => (None, None),
            };

            AnswerDetail {
                question_text: question.text.clone(),
                max_points: question.max_points,
                answer_text: answers_by_question
                    .get(question.id.as_str())
                    .map(|text| text.to_string())
                    .unwrap_or_default(),
                points,
                comment,
            }
        })
        .collect();

    let comments_overall = grade.and_then(|grade| {
        if use_ai_track {
            grade.ai_comments_overall.clone()
        } else {
            grade.manual_comments_overall.clone()
        }
    });

    let html = build_result_email(&ResultEmail {
        exam_title: exam.title.clone(),
        name_or_email: submission
            .respondent_name
            .clone()
            .unwrap_or_else(|| recipient.to_string()),
        total_points: final_points,
        comments_overall,
        answers: details,
    });

    mailer
        .send(&EmailMessage {
            to: recipient.to_string(),
            subject: format!("Exam results: {}", exam.title),
            html,
        })
        .await
        .context("Email provider rejected the result email")?;

    Ok(())
}
