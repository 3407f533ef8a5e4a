use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::{require_exam_owner, CurrentUser};
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::grading::{
    ClearGradesResponse, FinalizeRequest, GradingJobResponse, SaveDraftRequest, SaveDraftResponse,
    ScheduleAiGradingRequest, ScheduleAiGradingResponse, SetSourceRequest, SetSourceResponse,
};
use crate::services::definitive_source;
use crate::services::draft::{self, DraftInlineComment, DraftItem};
use crate::services::exam_lifecycle::ensure_exam_mutable;
use crate::services::finalize::{self, FinalizeOutcome};
use crate::services::grade_reset;
use crate::services::grading_stats::{self, ComparisonStats};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/submissions/:submission_id/draft", put(save_draft))
        .route("/submissions/:submission_id/source", post(set_source))
        .route("/jobs", post(schedule_ai_grading))
        .route("/jobs/:job_id", get(get_job))
        .route("/finalize", post(finalize_exam))
        .route("/stats", get(get_stats))
        .route("/grades", delete(clear_grades))
}

async fn save_draft(
    Path((exam_id, submission_id)): Path<(String, String)>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<SaveDraftRequest>,
) -> Result<Json<SaveDraftResponse>, ApiError> {
    validate_payload(&payload)?;
    require_exam_owner(&state, &user, &exam_id).await?;

    let items: Vec<DraftItem> = payload
        .items
        .iter()
        .map(|item| DraftItem {
            question_id: item.question_id.clone(),
            points_awarded: item.points_awarded,
            comment: item.comment.clone(),
            inline_comments: item
                .inline_comments
                .iter()
                .map(|comment| DraftInlineComment {
                    id: comment.id.clone(),
                    start_index: comment.start_index,
                    end_index: comment.end_index,
                    text: comment.text.clone(),
                })
                .collect(),
        })
        .collect();

    let total_points = draft::save_draft(
        state.db(),
        &exam_id,
        &submission_id,
        &items,
        payload.manual_comments_overall.as_deref(),
    )
    .await?;

    Ok(Json(SaveDraftResponse { success: true, total_points }))
}

async fn set_source(
    Path((exam_id, submission_id)): Path<(String, String)>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<SetSourceRequest>,
) -> Result<Json<SetSourceResponse>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let new_total =
        definitive_source::set_source(state.db(), &exam_id, &submission_id, payload.source)
            .await?;

    Ok(Json(SetSourceResponse { success: true, new_total }))
}

/// Queues a grading job for the worker; the request returns as soon as the
/// job row exists. Jobs are an audit trail and are never deleted.
async fn schedule_ai_grading(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ScheduleAiGradingRequest>,
) -> Result<(StatusCode, Json<ScheduleAiGradingResponse>), ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;
    ensure_exam_mutable(state.db(), &exam_id).await?;

    let mode = payload.mode.unwrap_or(crate::db::types::GradingMode::Neutral);
    let job = repositories::grading_jobs::create(
        state.db(),
        repositories::grading_jobs::CreateGradingJob {
            id: &Uuid::new_v4().to_string(),
            exam_id: &exam_id,
            owner_id: &user.id,
            mode,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to schedule grading job"))?;

    metrics::counter!("grading_jobs_total", "status" => "scheduled").increment(1);
    tracing::info!(exam_id = %exam_id, job_id = %job.id, mode = ?mode, "AI grading job scheduled");

    let response = ScheduleAiGradingResponse {
        success: true,
        job_id: job.id,
        message: "AI grading has been scheduled.".to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_job(
    Path((exam_id, job_id)): Path<(String, String)>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<GradingJobResponse>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let job = repositories::grading_jobs::find_by_id(state.db(), &job_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch grading job"))?;

    let Some(job) = job else {
        return Err(ApiError::NotFound("Grading job not found".to_string()));
    };
    if job.exam_id != exam_id {
        return Err(ApiError::NotFound("Grading job not found".to_string()));
    }

    Ok(Json(GradingJobResponse::from_model(job)))
}

async fn finalize_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<FinalizeRequest>,
) -> Result<Json<FinalizeOutcome>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let request_id = payload.request_id.map(|id| id.to_string());
    let outcome = finalize::finalize(&state, &exam_id, request_id.as_deref()).await?;

    Ok(Json(outcome))
}

/// Read-only comparison of the two score tracks; still available once the
/// exam is evaluated.
async fn get_stats(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ComparisonStats>, ApiError> {
    let exam = require_exam_owner(&state, &user, &exam_id).await?;

    let submissions = repositories::submissions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list submissions"))?;

    Ok(Json(grading_stats::compute(&submissions, exam.max_total_points)))
}

async fn clear_grades(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ClearGradesResponse>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let cleared = grade_reset::clear_exam_grades(state.db(), &exam_id).await?;

    Ok(Json(ClearGradesResponse { success: true, cleared }))
}
