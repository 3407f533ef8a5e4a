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
use crate::schemas::exam::{ExamCreate, ExamResponse, PublicExamResponse};
use crate::services::exam_lifecycle;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_exam).get(list_exams))
        .route("/:exam_id", get(get_exam))
        .route("/:exam_id/publish", post(publish_exam))
}

/// Routes reachable with the public token instead of a bearer credential.
pub(crate) fn public_router() -> Router<AppState> {
    Router::new().route("/:token", get(get_public_exam))
}

async fn create_exam(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamResponse>), ApiError> {
    validate_payload(&payload)?;

    let now = primitive_now_utc();
    let exam = repositories::exams::create(
        state.db(),
        repositories::exams::CreateExam {
            id: &exam_lifecycle::new_entity_id(),
            owner_id: &user.id,
            title: &payload.title,
            description: payload.description.as_deref(),
            created_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    let mut questions = Vec::with_capacity(payload.questions.len());
    for (index, question) in payload.questions.iter().enumerate() {
        let created = repositories::questions::create(
            state.db(),
            repositories::questions::CreateQuestion {
                id: &exam_lifecycle::new_entity_id(),
                exam_id: &exam.id,
                order_index: index as i32,
                text: &question.text,
                max_points: question.max_points,
                rubric_text: &question.rubric_text,
                created_at: now,
            },
        )
        .await
        .map_err(|e| ApiError::internal(e, "Failed to create question"))?;
        questions.push(created);
    }

    tracing::info!(exam_id = %exam.id, owner_id = %user.id, questions = questions.len(), "Exam created");
    Ok((StatusCode::CREATED, Json(ExamResponse::from_model(exam, questions))))
}

async fn list_exams(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExamResponse>>, ApiError> {
    let exams = repositories::exams::list_by_owner(state.db(), &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;

    Ok(Json(exams.into_iter().map(|exam| ExamResponse::from_model(exam, Vec::new())).collect()))
}

async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = require_exam_owner(&state, &user, &exam_id).await?;
    let questions = repositories::questions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;

    Ok(Json(ExamResponse::from_model(exam, questions)))
}

async fn publish_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    require_exam_owner(&state, &user, &exam_id).await?;

    let exam = exam_lifecycle::publish_exam(state.db(), &exam_id).await?;
    let questions = repositories::questions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;

    Ok(Json(ExamResponse::from_model(exam, questions)))
}

/// Respondent view of a published exam: questions without rubrics. Closed
/// once the exam leaves the published state.
async fn get_public_exam(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PublicExamResponse>, ApiError> {
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

    Ok(Json(PublicExamResponse::from_model(exam, questions)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::test_support;

    #[tokio::test]
    async fn create_publish_and_public_view_flow() {
        let ctx = test_support::setup_test_context().await;
        let (_, token) = test_support::register_user(&ctx, "owner@example.org").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/exams",
                Some(&token),
                Some(json!({
                    "title": "Biology Midterm",
                    "description": "Cells and membranes",
                    "questions": [
                        {"text": "Define osmosis", "max_points": 10, "rubric_text": "Full marks for membrane + gradient"},
                        {"text": "Describe mitosis", "max_points": 5, "rubric_text": ""}
                    ]
                })),
            ))
            .await
            .expect("create exam");
        let status = response.status();
        let created = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::CREATED, "response: {created}");
        let exam_id = created["id"].as_str().expect("exam id").to_string();
        assert_eq!(created["state"], "draft");
        assert_eq!(created["questions"].as_array().unwrap().len(), 2);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/exams/{exam_id}/publish"),
                Some(&token),
                None,
            ))
            .await
            .expect("publish");
        let status = response.status();
        let published = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {published}");
        assert_eq!(published["state"], "published");
        assert_eq!(published["questions_count"], 2);
        assert_eq!(published["max_total_points"], 15.0);
        let public_token = published["public_token"].as_str().expect("public token").to_string();

        // Second publish is a conflict, the state machine is one-way.
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/exams/{exam_id}/publish"),
                Some(&token),
                None,
            ))
            .await
            .expect("republish");
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/v1/public/exams/{public_token}"),
                None,
                None,
            ))
            .await
            .expect("public view");
        let status = response.status();
        let public = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {public}");
        assert_eq!(public["title"], "Biology Midterm");
        // Rubrics never leak to respondents.
        assert!(public["questions"][0].get("rubric_text").is_none());
    }

    #[tokio::test]
    async fn publishing_without_questions_is_a_conflict() {
        let ctx = test_support::setup_test_context().await;
        let (_, token) = test_support::register_user(&ctx, "owner@example.org").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/exams",
                Some(&token),
                Some(json!({"title": "Empty", "questions": []})),
            ))
            .await
            .expect("create exam");
        let created = test_support::read_json(response).await;
        let exam_id = created["id"].as_str().expect("exam id").to_string();

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/exams/{exam_id}/publish"),
                Some(&token),
                None,
            ))
            .await
            .expect("publish");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn other_users_cannot_read_an_exam() {
        let ctx = test_support::setup_test_context().await;
        let (_, owner_token) = test_support::register_user(&ctx, "owner@example.org").await;
        let (_, other_token) = test_support::register_user(&ctx, "other@example.org").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/exams",
                Some(&owner_token),
                Some(json!({"title": "Private", "questions": []})),
            ))
            .await
            .expect("create exam");
        let created = test_support::read_json(response).await;
        let exam_id = created["id"].as_str().expect("exam id").to_string();

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/v1/exams/{exam_id}"),
                Some(&other_token),
                None,
            ))
            .await
            .expect("get exam");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
