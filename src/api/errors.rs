use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::definitive_source::SetSourceError;
use crate::services::draft::SaveDraftError;
use crate::services::exam_lifecycle::{ExamGuardError, PublishError};
use crate::services::finalize::FinalizeError;
use crate::services::grade_reset::GradeResetError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

/// Categorized API failures: the consuming UI switches remediation copy on
/// the status class, so raw errors never leak through.
#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized(message) => {
                let status = StatusCode::UNAUTHORIZED;
                let mut response = (
                    status,
                    Json(ErrorResponse { status: status.as_u16(), detail: message.to_string() }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return response;
            }
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}

impl From<ExamGuardError> for ApiError {
    fn from(err: ExamGuardError) -> Self {
        match err {
            ExamGuardError::NotFound => ApiError::NotFound("Exam not found".to_string()),
            ExamGuardError::Finalized => ApiError::Conflict(err.to_string()),
            ExamGuardError::Db(db) => ApiError::internal(db, "Failed to load exam"),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::NotFound => ApiError::NotFound("Exam not found".to_string()),
            PublishError::NotDraft | PublishError::NoQuestions => {
                ApiError::Conflict(err.to_string())
            }
            PublishError::Db(db) => ApiError::internal(db, "Failed to publish exam"),
        }
    }
}

impl From<SetSourceError> for ApiError {
    fn from(err: SetSourceError) -> Self {
        match err {
            SetSourceError::ExamNotFound => ApiError::NotFound("Exam not found".to_string()),
            SetSourceError::GradeNotFound => {
                ApiError::NotFound("Grade document not found for this submission".to_string())
            }
            SetSourceError::ExamFinalized => ApiError::Conflict(err.to_string()),
            SetSourceError::TotalUnavailable(_) => ApiError::BadRequest(err.to_string()),
            SetSourceError::Db(db) => ApiError::internal(db, "Failed to set definitive source"),
        }
    }
}

impl From<SaveDraftError> for ApiError {
    fn from(err: SaveDraftError) -> Self {
        match err {
            SaveDraftError::Guard(guard) => guard.into(),
            SaveDraftError::SubmissionNotFound => {
                ApiError::NotFound("Submission not found".to_string())
            }
            SaveDraftError::UnknownQuestion(_) => ApiError::BadRequest(err.to_string()),
            SaveDraftError::Db(db) => ApiError::internal(db, "Failed to save draft"),
        }
    }
}

impl From<FinalizeError> for ApiError {
    fn from(err: FinalizeError) -> Self {
        match err {
            FinalizeError::ExamNotFound => ApiError::NotFound("Exam not found".to_string()),
            FinalizeError::ExamNotPublished | FinalizeError::AlreadyFinalized => {
                ApiError::Conflict(err.to_string())
            }
            FinalizeError::Ledger(detail) => {
                ApiError::internal(detail, "Failed to replay finalize result")
            }
            FinalizeError::Db(db) => ApiError::internal(db, "Failed to finalize exam"),
        }
    }
}

impl From<GradeResetError> for ApiError {
    fn from(err: GradeResetError) -> Self {
        match err {
            GradeResetError::Guard(guard) => guard.into(),
            GradeResetError::Db(db) => ApiError::internal(db, "Failed to clear grades"),
        }
    }
}
