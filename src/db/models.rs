use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{ExamState, GradeSource, GradeState, GradingMode, JobStatus, OperationStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) email: String,
    pub(crate) name: Option<String>,
    pub(crate) openai_api_key: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) owner_id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) state: ExamState,
    pub(crate) public_token: Option<String>,
    pub(crate) questions_count: Option<i32>,
    pub(crate) max_total_points: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) published_at: Option<PrimitiveDateTime>,
    pub(crate) finalized_at: Option<PrimitiveDateTime>,
}

/// Immutable once the exam is published.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) order_index: i32,
    pub(crate) text: String,
    pub(crate) max_points: i32,
    pub(crate) rubric_text: String,
    pub(crate) created_at: PrimitiveDateTime,
}

/// Denormalized mirror of the grade totals for cheap listing; `total_points`
/// always tracks whichever source is definitive.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Submission {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) respondent_email: Option<String>,
    pub(crate) respondent_name: Option<String>,
    pub(crate) grade_state: GradeState,
    pub(crate) total_points: Option<f64>,
    pub(crate) definitive_source: Option<GradeSource>,
    pub(crate) manual_total_points: Option<f64>,
    pub(crate) ai_total_points: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Answer {
    pub(crate) submission_id: String,
    pub(crate) question_id: String,
    pub(crate) text: String,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Grade {
    pub(crate) submission_id: String,
    pub(crate) exam_id: String,
    pub(crate) state: GradeState,
    pub(crate) manual_total_points: Option<f64>,
    pub(crate) ai_total_points: Option<f64>,
    pub(crate) manual_comments_overall: Option<String>,
    pub(crate) ai_comments_overall: Option<String>,
    pub(crate) definitive_source: Option<GradeSource>,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) finalized_at: Option<PrimitiveDateTime>,
}

/// An annotation anchored to a character range of the answer text. Offsets
/// are character offsets and satisfy `0 <= start < end <= chars(answer)`
/// once reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct InlineComment {
    pub(crate) id: String,
    pub(crate) start_index: usize,
    pub(crate) end_index: usize,
    pub(crate) text: String,
    pub(crate) source: GradeSource,
    pub(crate) created_at: String,
}

/// Two disjoint score tracks per (submission, question): manual review and
/// model suggestions never overwrite each other's fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct AnswerGrade {
    pub(crate) submission_id: String,
    pub(crate) question_id: String,
    pub(crate) manual_points: Option<f64>,
    pub(crate) manual_comment: Option<String>,
    pub(crate) manual_inline_comments: Json<Vec<InlineComment>>,
    pub(crate) ai_suggested_points: Option<f64>,
    pub(crate) ai_suggested_comment: Option<String>,
    pub(crate) ai_inline_comments: Json<Vec<InlineComment>>,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// Kept as an audit trail; status only moves forward and jobs are never
/// retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradingJob {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) owner_id: String,
    pub(crate) status: JobStatus,
    pub(crate) mode: GradingMode,
    pub(crate) error: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Operation {
    pub(crate) operation: String,
    pub(crate) request_id: String,
    pub(crate) status: OperationStatus,
    pub(crate) result: Option<Json<serde_json::Value>>,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) finished_at: Option<PrimitiveDateTime>,
}
