use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::GradingJob;
use crate::db::types::{GradeSource, GradingMode, JobStatus};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct InlineCommentPayload {
    #[validate(length(min = 1, message = "inline comment id must not be empty"))]
    pub(crate) id: String,
    pub(crate) start_index: usize,
    pub(crate) end_index: usize,
    #[validate(length(min = 1, max = 1000, message = "inline comment text length is invalid"))]
    pub(crate) text: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerGradeItem {
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[validate(range(min = 0.0, message = "points_awarded must be non-negative"))]
    pub(crate) points_awarded: f64,
    #[serde(default)]
    #[validate(length(max = 4000, message = "comment is too long"))]
    pub(crate) comment: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) inline_comments: Vec<InlineCommentPayload>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SaveDraftRequest {
    #[validate(nested)]
    pub(crate) items: Vec<AnswerGradeItem>,
    #[serde(default)]
    #[validate(length(max = 8000, message = "overall comments are too long"))]
    pub(crate) manual_comments_overall: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveDraftResponse {
    pub(crate) success: bool,
    pub(crate) total_points: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetSourceRequest {
    pub(crate) source: GradeSource,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetSourceResponse {
    pub(crate) success: bool,
    pub(crate) new_total: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleAiGradingRequest {
    #[serde(default)]
    pub(crate) mode: Option<GradingMode>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScheduleAiGradingResponse {
    pub(crate) success: bool,
    pub(crate) job_id: String,
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FinalizeRequest {
    #[serde(default)]
    pub(crate) request_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ClearGradesResponse {
    pub(crate) success: bool,
    pub(crate) cleared: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingJobResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) status: JobStatus,
    pub(crate) mode: GradingMode,
    pub(crate) error: Option<String>,
    pub(crate) created_at: String,
    pub(crate) started_at: Option<String>,
    pub(crate) completed_at: Option<String>,
}

impl GradingJobResponse {
    pub(crate) fn from_model(job: GradingJob) -> Self {
        Self {
            id: job.id,
            exam_id: job.exam_id,
            status: job.status,
            mode: job.mode,
            error: job.error,
            created_at: format_primitive(job.created_at),
            started_at: job.started_at.map(format_primitive),
            completed_at: job.completed_at.map(format_primitive),
        }
    }
}
