use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Exam, Question};
use crate::db::types::ExamState;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[validate(length(min = 1, message = "question text must not be empty"))]
    pub(crate) text: String,
    #[validate(range(min = 1, message = "max_points must be positive"))]
    pub(crate) max_points: i32,
    #[serde(default)]
    pub(crate) rubric_text: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionCreate>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) order_index: i32,
    pub(crate) text: String,
    pub(crate) max_points: i32,
    pub(crate) rubric_text: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) state: ExamState,
    pub(crate) public_token: Option<String>,
    pub(crate) questions_count: Option<i32>,
    pub(crate) max_total_points: Option<f64>,
    pub(crate) created_at: String,
    pub(crate) published_at: Option<String>,
    pub(crate) finalized_at: Option<String>,
    pub(crate) questions: Vec<QuestionResponse>,
}

/// Respondent-facing view: no rubric, no grading state.
#[derive(Debug, Serialize)]
pub(crate) struct PublicQuestionResponse {
    pub(crate) id: String,
    pub(crate) order_index: i32,
    pub(crate) text: String,
    pub(crate) max_points: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct PublicExamResponse {
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) questions: Vec<PublicQuestionResponse>,
}

impl PublicExamResponse {
    pub(crate) fn from_model(exam: Exam, questions: Vec<Question>) -> Self {
        Self {
            title: exam.title,
            description: exam.description,
            questions: questions
                .into_iter()
                .map(|question| PublicQuestionResponse {
                    id: question.id,
                    order_index: question.order_index,
                    text: question.text,
                    max_points: question.max_points,
                })
                .collect(),
        }
    }
}

impl QuestionResponse {
    pub(crate) fn from_model(question: Question) -> Self {
        Self {
            id: question.id,
            order_index: question.order_index,
            text: question.text,
            max_points: question.max_points,
            rubric_text: question.rubric_text,
        }
    }
}

impl ExamResponse {
    pub(crate) fn from_model(exam: Exam, questions: Vec<Question>) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            description: exam.description,
            state: exam.state,
            public_token: exam.public_token,
            questions_count: exam.questions_count,
            max_total_points: exam.max_total_points,
            created_at: format_primitive(exam.created_at),
            published_at: exam.published_at.map(format_primitive),
            finalized_at: exam.finalized_at.map(format_primitive),
            questions: questions.into_iter().map(QuestionResponse::from_model).collect(),
        }
    }
}
