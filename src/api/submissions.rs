use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::{require_exam_owner, CurrentUser};
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::ExamState;
use crate::repositories;
use crate::schemas::submission::{
    SubmissionCreate, SubmissionDetailResponse, SubmissionResponse,
};
use crate::services::exam_lifecycle;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_submissions))
        .route("/:submission_id", get(get_submission))
}

pub(crate) fn public_router() -> Router<AppState> {
    Router::new().route("/:token/submissions", post(submit))
}

/// Accepts a respondent's answers against a published exam. Answers are
/// immutable from here on; re-posting the same questions is not an update.
async fn submit(
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SubmissionCreate>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    validate_payload(&payload)?;

    let exam = repositories::exams::find_by_public_token(state.db(), &token)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?;

    let Some(exam) = exam else {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    };

    if exam.state != ExamState::Published {
        return Err(ApiError::Conflict("This exam is not open for submissions".to_string()));
    }

    let questions = repositories::questions::list_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;
    let known_questions: HashSet<&str> =
        questions.iter().map(|question| question.id.as_str()).collect();

    for answer in &payload.answers {
        if !known_questions.contains(answer.question_id.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "unknown question id: {}",
                answer.question_id
            )));
        }
    }

    let now = primitive_now_utc();
    let submission_id = exam_lifecycle::new_entity_id();

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to store submission"))?;
    let submission = repositories::submissions::create(
        &mut *tx,
        repositories::submissions::CreateSubmission {
            id: &submission_id,
            exam_id: &exam.id,
            respondent_email: payload.respondent_email.as_deref(),
            respondent_name: payload.respondent_name.as_deref(),
            created_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to store submission"))?;

    for answer in &payload.answers {
        repositories::answers::create(
            &mut *tx,
            &submission.id,
            &answer.question_id,
            &answer.text,
            now,
        )
        .await
        .map_err(|e| ApiError::internal(e, "Failed to store answer"))?;
    }
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to store submission"))?;

    tracing::info!(
        exam_id = %exam.id,
        submission_id = %submission.id,
        answers = payload.answers.len(),
        "Submission received"
    );

    Ok((StatusCode::CREATED, Json(SubmissionResponse::from_model(submission))))
}

async fn list_submissions(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<SubmissionResponse>>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let submissions = repositories::submissions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list submissions"))?;

    Ok(Json(submissions.into_iter().map(SubmissionResponse::from_model).collect()))
}

async fn get_submission(
    Path((exam_id, submission_id)): Path<(String, String)>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<SubmissionDetailResponse>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let submission = repositories::submissions::find_by_id(state.db(), &exam_id, &submission_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch submission"))?;

    let Some(submission) = submission else {
        return Err(ApiError::NotFound("Submission not found".to_string()));
    };

    let answers = repositories::answers::list_by_submission(state.db(), &submission.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list answers"))?;
    let answer_grades = repositories::answer_grades::list_by_submission(state.db(), &submission.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list answer grades"))?;

    Ok(Json(SubmissionDetailResponse::from_models(submission, answers, answer_grades)))
}
