use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Answer, AnswerGrade, InlineComment, Submission};
use crate::db::types::{GradeSource, GradeState};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerCreate {
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[serde(default)]
    pub(crate) text: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmissionCreate {
    #[serde(default)]
    #[validate(email(message = "respondent_email must be a valid address"))]
    pub(crate) respondent_email: Option<String>,
    #[serde(default)]
    pub(crate) respondent_name: Option<String>,
    #[validate(nested)]
    pub(crate) answers: Vec<AnswerCreate>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) respondent_email: Option<String>,
    pub(crate) respondent_name: Option<String>,
    pub(crate) grade_state: GradeState,
    pub(crate) total_points: Option<f64>,
    pub(crate) definitive_source: Option<GradeSource>,
    pub(crate) manual_total_points: Option<f64>,
    pub(crate) ai_total_points: Option<f64>,
    pub(crate) created_at: String,
}

impl SubmissionResponse {
    pub(crate) fn from_model(submission: Submission) -> Self {
        Self {
            id: submission.id,
            exam_id: submission.exam_id,
            respondent_email: submission.respondent_email,
            respondent_name: submission.respondent_name,
            grade_state: submission.grade_state,
            total_points: submission.total_points,
            definitive_source: submission.definitive_source,
            manual_total_points: submission.manual_total_points,
            ai_total_points: submission.ai_total_points,
            created_at: format_primitive(submission.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerView {
    pub(crate) question_id: String,
    pub(crate) text: String,
}

/// Both score tracks of one answer, side by side, so a grading UI can toggle
/// between them.
#[derive(Debug, Serialize)]
pub(crate) struct AnswerGradeView {
    pub(crate) question_id: String,
    pub(crate) manual_points: Option<f64>,
    pub(crate) manual_comment: Option<String>,
    pub(crate) manual_inline_comments: Vec<InlineComment>,
    pub(crate) ai_suggested_points: Option<f64>,
    pub(crate) ai_suggested_comment: Option<String>,
    pub(crate) ai_inline_comments: Vec<InlineComment>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionDetailResponse {
    #[serde(flatten)]
    pub(crate) submission: SubmissionResponse,
    pub(crate) answers: Vec<AnswerView>,
    pub(crate) answer_grades: Vec<AnswerGradeView>,
}

impl SubmissionDetailResponse {
    pub(crate) fn from_models(
        submission: Submission,
        answers: Vec<Answer>,
        answer_grades: Vec<AnswerGrade>,
    ) -> Self {
        Self {
            submission: SubmissionResponse::from_model(submission),
            answers: answers
                .into_iter()
                .map(|answer| AnswerView { question_id: answer.question_id, text: answer.text })
                .collect(),
            answer_grades: answer_grades
                .into_iter()
                .map(|grade| AnswerGradeView {
                    question_id: grade.question_id,
                    manual_points: grade.manual_points,
                    manual_comment: grade.manual_comment,
                    manual_inline_comments: grade.manual_inline_comments.0,
                    ai_suggested_points: grade.ai_suggested_points,
                    ai_suggested_comment: grade.ai_suggested_comment,
                    ai_inline_comments: grade.ai_inline_comments.0,
                })
                .collect(),
        }
    }
}
