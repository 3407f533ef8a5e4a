use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::core::state::AppState;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::{Answer, GradingJob, InlineComment, Question, Submission};
use crate::db::types::ExamState;
use crate::repositories;
use crate::services::aggregation;
use crate::services::ai_grading::{AiGradingService, GradeAnswerRequest};
use crate::services::api_keys;
use crate::services::concurrency::run_with_concurrency;

pub(crate) async fn claim_next_job(pool: &PgPool) -> Result<Option<GradingJob>> {
    repositories::grading_jobs::claim_next(pool, primitive_now_utc())
        .await
        .context("Failed to claim grading job")
}

#[derive(Debug)]
struct SubmissionFailure {
    submission_id: String,
    message: String,
    fatal_code: Option<&'static str>,
}

/// Fatal per-answer outcome: credential problems that should fail the whole
/// job rather than degrade to a zero-point answer.
#[derive(Debug)]
struct CredentialFailure {
    code: &'static str,
    message: String,
}

/// Runs one claimed grading job to a terminal status: fans out over the
/// exam's ungraded-by-AI submissions, grades each answer with the model, and
/// aggregates per-submission AI totals. Sibling failures are isolated; only
/// credential errors abort the job wholesale.
pub(crate) async fn process_grading_job(
    state: &AppState,
    ai: &AiGradingService,
    job: &GradingJob,
) -> Result<()> {
    let pool = state.db();

    let api_key =
        match api_keys::resolve_grading_key(pool, &job.owner_id, state.settings()).await {
            Ok(key) => Arc::new(key),
            Err(err) => {
                return fail_job(pool, &job.id, &format!("{}: {err}", err.code())).await;
            }
        };

    let Some(exam) = repositories::exams::find_by_id(pool, &job.exam_id)
        .await
        .context("Failed to fetch exam")?
    else {
        return fail_job(pool, &job.id, "EXAM_NOT_FOUND: exam no longer exists").await;
    };
    if exam.state == ExamState::Evaluated {
        return fail_job(pool, &job.id, "EXAM_EVALUATED: grades are locked for this exam").await;
    }

    let questions = repositories::questions::list_by_exam(pool, &job.exam_id)
        .await
        .context("Failed to fetch questions")?;
    let questions: Arc<HashMap<String, Question>> = Arc::new(
        questions.into_iter().map(|question| (question.id.clone(), question)).collect(),
    );

    let submissions = repositories::submissions::list_awaiting_ai_grading(pool, &job.exam_id)
        .await
        .context("Failed to fetch submissions")?;

    if submissions.is_empty() {
        tracing::info!(job_id = %job.id, exam_id = %job.exam_id, "No new submissions to grade");
        repositories::grading_jobs::mark_completed(pool, &job.id, primitive_now_utc())
            .await
            .context("Failed to complete job")?;
        metrics::counter!("grading_jobs_total", "status" => "completed").increment(1);
        return Ok(());
    }

    let submission_count = submissions.len();
    let submission_concurrency = state.settings().ai().submission_concurrency;
    tracing::info!(
        job_id = %job.id,
        exam_id = %job.exam_id,
        submissions = submission_count,
        concurrency = submission_concurrency,
        "Processing grading job"
    );

    let tasks: Vec<_> = submissions
        .into_iter()
        .map(|submission| {
            let state = state.clone();
            let ai = ai.clone();
            let questions = questions.clone();
            let api_key = api_key.clone();
            let job = job.clone();
            move || async move {
                process_submission(&state, &ai, &job, &questions, submission, &api_key).await
            }
        })
        .collect();

    let results = run_with_concurrency(tasks, submission_concurrency).await;
    let failures: Vec<SubmissionFailure> =
        results.into_iter().filter_map(|result| result.err()).collect();

    if let Some(fatal) = failures.iter().find(|failure| failure.fatal_code.is_some()) {
        let code = fatal.fatal_code.unwrap_or("FATAL");
        return fail_job(pool, &job.id, &format!("{code}: {}", fatal.message)).await;
    }

    if let Some(first) = failures.first() {
        let message = format!(
            "{failed} of {submission_count} submissions failed; first error on {id}: {err}",
            failed = failures.len(),
            id = first.submission_id,
            err = first.message,
        );
        return fail_job(pool, &job.id, &message).await;
    }

    repositories::grading_jobs::mark_completed(pool, &job.id, primitive_now_utc())
        .await
        .context("Failed to complete job")?;
    metrics::counter!("grading_jobs_total", "status" => "completed").increment(1);
    tracing::info!(job_id = %job.id, exam_id = %job.exam_id, "Grading job completed");
    Ok(())
}

async fn fail_job(pool: &PgPool, job_id: &str, error: &str) -> Result<()> {
    tracing::error!(job_id, error, "Grading job failed");
    repositories::grading_jobs::mark_failed(pool, job_id, error, primitive_now_utc())
        .await
        .context("Failed to record job failure")?;
    metrics::counter!("grading_jobs_total", "status" => "failed").increment(1);
    Ok(())
}

async fn process_submission(
    state: &AppState,
    ai: &AiGradingService,
    job: &GradingJob,
    questions: &HashMap<String, Question>,
    submission: Submission,
    api_key: &str,
) -> Result<(), SubmissionFailure> {
    let timer = Instant::now();
    let answers = repositories::answers::list_by_submission(state.db(), &submission.id)
        .await
        .map_err(|err| SubmissionFailure {
            submission_id: submission.id.clone(),
            message: format!("failed to load answers: {err}"),
            fatal_code: None,
        })?;

    let answer_concurrency = state.settings().ai().answer_concurrency;
    tracing::info!(
        submission_id = %submission.id,
        answers = answers.len(),
        concurrency = answer_concurrency,
        "Generating AI suggestions for submission"
    );

    let student_label =
        submission.respondent_name.clone().unwrap_or_else(|| "Anonymous".to_string());

    let tasks: Vec<_> = answers
        .into_iter()
        .map(|answer| {
            let state = state.clone();
            let ai = ai.clone();
            let question = questions.get(&answer.question_id).cloned();
            let api_key = api_key.to_string();
            let submission_id = submission.id.clone();
            let exam_id = submission.exam_id.clone();
            let student_label = student_label.clone();
            let mode = job.mode;
            move || async move {
                grade_single_answer(
                    &state,
                    &ai,
                    question.as_ref(),
                    &answer,
                    &api_key,
                    &submission_id,
                    &exam_id,
                    &student_label,
                    mode,
                )
                .await
            }
        })
        .collect();

    let per_answer = run_with_concurrency(tasks, answer_concurrency).await;

    let mut points = Vec::with_capacity(per_answer.len());
    for result in per_answer {
        match result {
            Ok(answer_points) => points.push(answer_points),
            Err(failure) => {
                return Err(SubmissionFailure {
                    submission_id: submission.id.clone(),
                    message: failure.message,
                    fatal_code: Some(failure.code),
                });
            }
        }
    }

    let incremental_total = aggregation::sum_points(&points);

    // The stored answer grades are the source of truth for the aggregate;
    // the incremental sum only cross-checks them for drift.
    let stored = repositories::answer_grades::list_by_submission(state.db(), &submission.id)
        .await
        .map_err(|err| SubmissionFailure {
            submission_id: submission.id.clone(),
            message: format!("failed to reload answer grades: {err}"),
            fatal_code: None,
        })?;
    let ai_total_points = aggregation::recompute_ai_total(&stored).unwrap_or(0.0);
    if (ai_total_points - incremental_total).abs() > 1e-9 {
        tracing::warn!(
            submission_id = %submission.id,
            incremental_total,
            recomputed_total = ai_total_points,
            "Incremental AI total disagrees with stored answer grades; persisting the recomputed total"
        );
    }

    aggregation::persist_ai_total(
        state.db(),
        &submission.id,
        &submission.exam_id,
        ai_total_points,
        primitive_now_utc(),
    )
    .await
    .map_err(|err| SubmissionFailure {
        submission_id: submission.id.clone(),
        message: format!("failed to persist AI total: {err}"),
        fatal_code: None,
    })?;

    let duration = timer.elapsed().as_secs_f64();
    metrics::histogram!("grading_submission_duration_seconds").record(duration);
    tracing::info!(
        submission_id = %submission.id,
        ai_total_points,
        duration_seconds = duration,
        "Generated AI suggestions for submission"
    );
    Ok(())
}

/// Grades one answer, writing the AI track as a side effect. Empty answers
/// never reach the model and score 0 by policy; every non-credential failure
/// degrades to 0 points so one bad answer cannot sink the submission.
#[allow(clippy::too_many_arguments)]
async fn grade_single_answer(
    state: &AppState,
    ai: &AiGradingService,
    question: Option<&Question>,
    answer: &Answer,
    api_key: &str,
    submission_id: &str,
    exam_id: &str,
    student_label: &str,
    mode: crate::db::types::GradingMode,
) -> Result<f64, CredentialFailure> {
    let Some(question) = question else {
        tracing::warn!(
            submission_id,
            question_id = %answer.question_id,
            "Answer references an unknown question; contributing 0 points"
        );
        return Ok(0.0);
    };

    if answer.text.trim().is_empty() {
        tracing::info!(submission_id, question_id = %question.id, "Skipping empty answer");
        metrics::counter!("grading_answers_total", "status" => "skipped_empty").increment(1);
        return Ok(0.0);
    }

    let request = GradeAnswerRequest {
        student_label: student_label.to_string(),
        rubric_text: question.rubric_text.clone(),
        question_text: question.text.clone(),
        max_points: question.max_points as f64,
        answer_text: answer.text.clone(),
        mode,
    };

    let response = match ai.grade_answer(&request, api_key).await {
        Ok(response) => response,
        Err(err) if err.is_fatal() => {
            return Err(CredentialFailure { code: err.code(), message: err.to_string() });
        }
        Err(err) => {
            tracing::error!(
                submission_id,
                question_id = %question.id,
                error = %err,
                "AI grading failed for answer; contributing 0 points"
            );
            metrics::counter!("grading_answers_total", "status" => "failed").increment(1);
            return Ok(0.0);
        }
    };

    let now = primitive_now_utc();
    let created_at = format_primitive(now);
    let inline_comments: Vec<InlineComment> = response
        .inline_comments
        .iter()
        .map(|comment| InlineComment {
            id: comment.id.clone(),
            start_index: comment.start_index,
            end_index: comment.end_index,
            text: comment.text.clone(),
            source: crate::db::types::GradeSource::Ai,
            created_at: created_at.clone(),
        })
        .collect();

    if let Err(err) = repositories::answer_grades::upsert_ai_track(
        state.db(),
        submission_id,
        &question.id,
        response.points_awarded,
        &response.comment,
        &inline_comments,
        now,
    )
    .await
    {
        tracing::error!(
            submission_id,
            question_id = %question.id,
            error = %err,
            "Failed to store AI answer grade; contributing 0 points"
        );
        metrics::counter!("grading_answers_total", "status" => "failed").increment(1);
        return Ok(0.0);
    }

    if let Some(overall) = response.overall_comment.as_deref() {
        if let Err(err) = repositories::grades::set_ai_comments_overall(
            state.db(),
            submission_id,
            exam_id,
            overall,
            now,
        )
        .await
        {
            tracing::error!(submission_id, error = %err, "Failed to store overall AI comment");
        }
    }

    metrics::counter!("grading_answers_total", "status" => "graded").increment(1);
    tracing::info!(
        submission_id,
        question_id = %question.id,
        points = response.points_awarded,
        inline_comments = inline_comments.len(),
        "AI graded answer"
    );
    Ok(response.points_awarded)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State as AxumState;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::core::config::Settings;
    use crate::db::types::{GradeSource, GradeState, JobStatus};
    use crate::services::ai_grading::AiGradingService;
    use crate::test_support;

    use super::*;

    async fn spawn_provider(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}/v1")
    }

    fn grading_completion() -> Value {
        let content = json!({
            "pointsAwarded": 6,
            "comment": "Mentions the membrane but not the gradient",
            "overallComment": "Understands the mechanism",
            "inlineComments": [{
                "startIndex": 999,
                "endIndex": 1005,
                "text": "Precise term",
                "quote": "membrane"
            }]
        });
        json!({
            "choices": [{
                "message": {"content": content.to_string()},
                "finish_reason": "stop"
            }]
        })
    }

    async fn schedule_job(ctx: &test_support::TestContext, exam_id: &str, token: &str) {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                axum::http::Method::POST,
                &format!("/api/v1/exams/{exam_id}/grading/jobs"),
                Some(token),
                Some(json!({})),
            ))
            .await
            .expect("schedule job");
        assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn job_grades_answers_and_skips_empty_ones() {
        let ctx = test_support::setup_test_context().await;
        let (owner_id, token) = test_support::register_user(&ctx, "owner@example.org").await;
        let exam = test_support::create_published_exam(&ctx, &token).await;
        let answer_text = "Osmosis is water crossing a membrane toward solutes";
        let submission_id =
            test_support::submit_answers(&ctx, &exam, None, &[answer_text, "   "]).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Router::new()
            .route(
                "/v1/chat/completions",
                post(|AxumState(calls): AxumState<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Json(grading_completion())
                }),
            )
            .with_state(calls.clone());
        let base_url = spawn_provider(provider).await;

        repositories::users::set_openai_api_key(
            ctx.state.db(),
            &owner_id,
            Some("sk-owner"),
            primitive_now_utc(),
        )
        .await
        .expect("owner key");

        std::env::set_var("OPENAI_BASE_URL", &base_url);
        let settings = Settings::load().expect("settings");
        let ai = AiGradingService::from_settings(&settings).expect("ai service");

        schedule_job(&ctx, &exam.id, &token).await;
        let job = claim_next_job(ctx.state.db()).await.expect("claim").expect("job");
        process_grading_job(&ctx.state, &ai, &job).await.expect("process");

        // One model call: the whitespace-only answer never reaches the model.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let job = repositories::grading_jobs::find_by_id(ctx.state.db(), &job.id)
            .await
            .expect("job fetch")
            .expect("job row");
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());

        let submission =
            repositories::submissions::find_by_id(ctx.state.db(), &exam.id, &submission_id)
                .await
                .expect("submission fetch")
                .expect("submission");
        assert_eq!(submission.ai_total_points, Some(6.0));
        assert_eq!(submission.grade_state, GradeState::GradedDraft);
        // AI grading never claims the definitive score.
        assert_eq!(submission.definitive_source, None);
        assert_eq!(submission.total_points, None);

        let answer_grades =
            repositories::answer_grades::list_by_submission(ctx.state.db(), &submission_id)
                .await
                .expect("answer grades");
        let graded = answer_grades
            .iter()
            .find(|grade| grade.question_id == exam.question_ids[0])
            .expect("graded answer");
        assert_eq!(graded.ai_suggested_points, Some(6.0));
        assert_eq!(graded.manual_points, None);
        let inline = &graded.ai_inline_comments.0;
        assert_eq!(inline.len(), 1);
        // The model's numeric offsets were wrong; the quote anchored them.
        assert_eq!(inline[0].start_index, answer_text.find("membrane").unwrap());
        assert_eq!(inline[0].end_index, inline[0].start_index + "membrane".len());
        assert_eq!(inline[0].source, GradeSource::Ai);

        let grade = repositories::grades::find_by_submission(ctx.state.db(), &submission_id)
            .await
            .expect("grade fetch")
            .expect("grade row");
        assert_eq!(grade.ai_total_points, Some(6.0));
        assert_eq!(grade.ai_comments_overall.as_deref(), Some("Understands the mechanism"));
        assert_eq!(grade.manual_total_points, None);
    }

    #[tokio::test]
    async fn job_fails_with_machine_code_when_no_credential_exists() {
        let ctx = test_support::setup_test_context().await;
        let (_, token) = test_support::register_user(&ctx, "owner@example.org").await;
        let exam = test_support::create_published_exam(&ctx, &token).await;
        test_support::submit_answers(&ctx, &exam, None, &["An answer", ""]).await;

        let ai = AiGradingService::from_settings(ctx.state.settings()).expect("ai service");

        schedule_job(&ctx, &exam.id, &token).await;
        let job = claim_next_job(ctx.state.db()).await.expect("claim").expect("job");
        process_grading_job(&ctx.state, &ai, &job).await.expect("process");

        let job = repositories::grading_jobs::find_by_id(ctx.state.db(), &job.id)
            .await
            .expect("job fetch")
            .expect("job row");
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.expect("error message");
        assert!(error.starts_with("MISSING_API_KEY"), "error: {error}");

        // No task ran: the submission is untouched and still awaits grading.
        let awaiting =
            repositories::submissions::list_awaiting_ai_grading(ctx.state.db(), &exam.id)
                .await
                .expect("awaiting");
        assert_eq!(awaiting.len(), 1);
    }
}
