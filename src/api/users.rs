use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::validation::validate_payload;
use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::user::{
    SettingsResponse, TokenResponse, UpdateSettingsRequest, UserCreate, UserResponse,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/me", get(me))
        .route("/me/settings", get(get_settings).put(update_settings))
}

/// Registration doubles as token issuance; identity verification proper lives
/// outside this service.
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<UserCreate>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    validate_payload(&payload)?;

    let existing = repositories::users::find_by_email(state.db(), &payload.email)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check existing user"))?;
    if existing.is_some() {
        return Err(ApiError::Conflict("User with this email already exists".to_string()));
    }

    let user = repositories::users::create(
        state.db(),
        repositories::users::CreateUser {
            id: &Uuid::new_v4().to_string(),
            email: &payload.email,
            name: payload.name.as_deref(),
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create user"))?;

    let token = security::create_access_token(&user.id, state.settings(), None)
        .map_err(|e| ApiError::internal(e, "Failed to create access token"))?;

    tracing::info!(user_id = %user.id, "User registered");

    let response = TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        user: UserResponse::from_model(user),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from_model(user))
}

async fn get_settings(CurrentUser(user): CurrentUser) -> Json<SettingsResponse> {
    let has_api_key =
        user.openai_api_key.as_deref().map(|key| !key.trim().is_empty()).unwrap_or(false);
    Json(SettingsResponse { has_api_key })
}

/// Stores or clears the user's own model API key. Grading jobs prefer this
/// key over the system-wide fallback.
async fn update_settings(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let api_key = payload
        .openai_api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());

    let updated = repositories::users::set_openai_api_key(
        state.db(),
        &user.id,
        api_key,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update settings"))?;

    if !updated {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %user.id, has_api_key = api_key.is_some(), "User settings updated");
    Ok(Json(SettingsResponse { has_api_key: api_key.is_some() }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::test_support;

    #[tokio::test]
    async fn register_me_and_settings_roundtrip() {
        let ctx = test_support::setup_test_context().await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/users/register",
                None,
                Some(json!({"email": "prof@example.org", "name": "Prof"})),
            ))
            .await
            .expect("register");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::CREATED, "response: {body}");
        let token = body["access_token"].as_str().expect("token").to_string();
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user"]["email"], "prof@example.org");

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/v1/users/me",
                Some(&token),
                None,
            ))
            .await
            .expect("me");
        let status = response.status();
        let me = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {me}");
        assert_eq!(me["name"], "Prof");

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::PUT,
                "/api/v1/users/me/settings",
                Some(&token),
                Some(json!({"openai_api_key": "sk-test-123"})),
            ))
            .await
            .expect("update settings");
        let updated = test_support::read_json(response).await;
        assert_eq!(updated["has_api_key"], true);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::PUT,
                "/api/v1/users/me/settings",
                Some(&token),
                Some(json!({"openai_api_key": "   "})),
            ))
            .await
            .expect("clear settings");
        let cleared = test_support::read_json(response).await;
        assert_eq!(cleared["has_api_key"], false);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let ctx = test_support::setup_test_context().await;

        let payload = json!({"email": "dup@example.org"});
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/users/register",
                None,
                Some(payload.clone()),
            ))
            .await
            .expect("first register");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/users/register",
                None,
                Some(payload),
            ))
            .await
            .expect("second register");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn requests_without_a_token_are_unauthorized() {
        let ctx = test_support::setup_test_context().await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(Method::GET, "/api/v1/users/me", None, None))
            .await
            .expect("me without token");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
