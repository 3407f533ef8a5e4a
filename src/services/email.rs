use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::Settings;

#[derive(Debug, Error)]
pub(crate) enum EmailError {
    #[error("email provider request failed with status {0}")]
    Provider(StatusCode),
    #[error("email provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct EmailMessage {
    pub(crate) to: String,
    pub(crate) subject: String,
    pub(crate) html: String,
}

/// Thin client for a Resend-style transactional email endpoint. Accept or
/// reject is all it promises; delivery is the provider's problem.
#[derive(Debug, Clone)]
pub(crate) struct Mailer {
    client: Client,
    base_url: String,
    api_key: String,
    from_address: String,
}

impl Mailer {
    /// `None` when no provider key is configured; finalization then counts
    /// every notification as skipped instead of failing.
    pub(crate) fn from_settings(settings: &Settings) -> Result<Option<Self>, EmailError> {
        let email = settings.email();
        if email.api_key.trim().is_empty() {
            return Ok(None);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Some(Self {
            client,
            base_url: email.base_url.trim_end_matches('/').to_string(),
            api_key: email.api_key.clone(),
            from_address: email.from_address.clone(),
        }))
    }

    pub(crate) async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let url = format!("{}/emails", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from_address,
                "to": message.to,
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "Email provider rejected message");
            return Err(EmailError::Provider(status));
        }

        tracing::info!(to = %message.to, "Result email accepted by provider");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AnswerDetail {
    pub(crate) question_text: String,
    pub(crate) max_points: i32,
    pub(crate) answer_text: String,
    pub(crate) points: Option<f64>,
    pub(crate) comment: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResultEmail {
    pub(crate) exam_title: String,
    pub(crate) name_or_email: String,
    pub(crate) total_points: f64,
    pub(crate) comments_overall: Option<String>,
    pub(crate) answers: Vec<AnswerDetail>,
}

pub(crate) fn build_result_email(props: &ResultEmail) -> String {
    let comments_html = props
        .comments_overall
        .as_deref()
        .map(|comments| {
            format!(
                "<p><strong>Overall comments:</strong></p>\
                 <p style=\"padding: 10px; border: 1px solid #eee; background-color: #f9f9f9;\">{comments}</p>"
            )
        })
        .unwrap_or_default();

    let mut answers_html = String::new();
    if !props.answers.is_empty() {
        answers_html.push_str("<h3 style=\"margin-top: 30px;\">Grading detail</h3>");
        for (index, answer) in props.answers.iter().enumerate() {
            let number = index + 1;
            let points = answer.points.unwrap_or(0.0);
            let comment_html = answer
                .comment
                .as_deref()
                .map(|comment| format!("<p><strong>Comment:</strong> {comment}</p>"))
                .unwrap_or_default();
            let answer_text = if answer.answer_text.is_empty() {
                "&lt;no answer&gt;"
            } else {
                answer.answer_text.as_str()
            };

            answers_html.push_str(&format!(
                "<div style=\"margin-bottom: 25px; border: 1px solid #ddd; border-radius: 8px; padding: 15px;\">\
                 <h4 style=\"margin-top: 0;\">Question {number}</h4>\
                 <p><strong>Statement:</strong> {question}</p>\
                 <p><strong>Maximum points:</strong> {max} points</p>\
                 <div style=\"margin: 15px 0; padding: 10px; background-color: #f5f5f5; border-radius: 4px;\">\
                 <p style=\"margin-top: 0;\"><strong>Your answer:</strong></p>\
                 <p style=\"white-space: pre-wrap;\">{answer}</p>\
                 </div>\
                 <p><strong>Points obtained:</strong> {points} / {max} points</p>\
                 {comment}\
                 </div>",
                question = answer.question_text,
                max = answer.max_points,
                answer = answer_text,
                points = points,
                comment = comment_html,
            ));
        }
    }

    format!(
        "<div style=\"font-family: sans-serif; line-height: 1.6; max-width: 800px; margin: 0 auto;\">\
         <h2 style=\"color: #333; border-bottom: 2px solid #007bff; padding-bottom: 10px;\">Exam results: {title}</h2>\
         <p>Hello {name},</p>\
         <p>Your exam has been graded. The details of your evaluation are below.</p>\
         <hr>\
         <p style=\"font-size: 1.5em; text-align: center; margin: 20px 0;\"><strong>Final score: {total} points</strong></p>\
         {comments}\
         {answers}\
         <hr>\
         <p style=\"font-size: 0.8em; color: #777; text-align: center; margin-top: 30px;\">Thank you for participating.</p>\
         </div>",
        title = props.exam_title,
        name = props.name_or_email,
        total = props.total_points,
        comments = comments_html,
        answers = answers_html,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> ResultEmail {
        ResultEmail {
            exam_title: "Biology Midterm".to_string(),
            name_or_email: "ada@example.org".to_string(),
            total_points: 7.0,
            comments_overall: Some("Good overall understanding.".to_string()),
            answers: vec![AnswerDetail {
                question_text: "Define osmosis".to_string(),
                max_points: 10,
                answer_text: "Movement of water across a membrane".to_string(),
                points: Some(7.0),
                comment: Some("Accurate but incomplete.".to_string()),
            }],
        }
    }

    #[test]
    fn result_email_includes_total_and_question_detail() {
        let html = build_result_email(&props());
        assert!(html.contains("Final score: 7 points"));
        assert!(html.contains("Biology Midterm"));
        assert!(html.contains("Question 1"));
        assert!(html.contains("7 / 10 points"));
        assert!(html.contains("Accurate but incomplete."));
        assert!(html.contains("Good overall understanding."));
    }

    #[test]
    fn empty_answer_renders_placeholder_and_no_comment_block() {
        let mut props = props();
        props.comments_overall = None;
        props.answers[0].answer_text = String::new();
        props.answers[0].comment = None;
        props.answers[0].points = None;

        let html = build_result_email(&props);
        assert!(html.contains("&lt;no answer&gt;"));
        assert!(html.contains("0 / 10 points"));
        assert!(!html.contains("Overall comments"));
        assert!(!html.contains("<strong>Comment:</strong>"));
    }
}
