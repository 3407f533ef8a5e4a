use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;
use crate::db::types::GradingMode;
use crate::services::offsets::{self, ProposedSpan, Reconciliation};

const COMMENT_MAX_CHARS: usize = 4000;
const INLINE_TEXT_MAX_CHARS: usize = 1000;
const QUOTE_MAX_CHARS: usize = 400;
const BACKOFF_CAP_MS: u64 = 8000;
const SIMPLIFIED_MAX_TOKENS: u32 = 2000;
const COMMENT_ID_LEN: usize = 9;

#[derive(Debug, Error)]
pub(crate) enum AiGradingError {
    #[error("no model API key is configured")]
    MissingApiKey,
    #[error("the model API key was rejected")]
    InvalidApiKey,
    #[error("model provider request failed with status {0}")]
    Provider(StatusCode),
    #[error("model provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model response could not be decoded: {0}")]
    Decode(String),
}

impl AiGradingError {
    /// Machine-distinguishable code, stored on failed jobs so the UI can
    /// choose specific remediation copy.
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "MISSING_API_KEY",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::Transport(_) => "PROVIDER_UNREACHABLE",
            Self::Decode(_) => "DECODE_ERROR",
        }
    }

    /// Credential problems fail the whole job; everything else degrades to a
    /// zero-point answer.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingApiKey | Self::InvalidApiKey)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GradeAnswerRequest {
    pub(crate) student_label: String,
    pub(crate) rubric_text: String,
    pub(crate) question_text: String,
    pub(crate) max_points: f64,
    pub(crate) answer_text: String,
    pub(crate) mode: GradingMode,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SuggestedInlineComment {
    pub(crate) id: String,
    pub(crate) start_index: usize,
    pub(crate) end_index: usize,
    pub(crate) text: String,
}

/// Fully-validated grading result: points are finite and within
/// `[0, max_points]`, comments are bounded, inline comments reconcile against
/// the real answer text. Invalid model fields are defaulted, never surfaced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradingResponse {
    pub(crate) points_awarded: f64,
    pub(crate) comment: String,
    pub(crate) overall_comment: Option<String>,
    pub(crate) inline_comments: Vec<SuggestedInlineComment>,
}

#[derive(Debug, Clone)]
pub(crate) struct AiGradingService {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    retry_attempts: u32,
}

impl AiGradingService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, AiGradingError> {
        let ai = settings.ai();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(ai.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: ai.base_url.trim_end_matches('/').to_string(),
            model: ai.model.clone(),
            max_tokens: ai.max_tokens,
            retry_attempts: ai.retry_attempts,
        })
    }

    pub(crate) async fn grade_answer(
        &self,
        request: &GradeAnswerRequest,
        api_key: &str,
    ) -> Result<GradingResponse, AiGradingError> {
        if api_key.trim().is_empty() {
            return Err(AiGradingError::MissingApiKey);
        }

        let timer = Instant::now();
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(request.mode)},
                {"role": "user", "content": user_prompt(request)},
            ],
            "response_format": {"type": "json_object"},
            "max_completion_tokens": self.max_tokens,
        });

        let body = self.send_with_retry(&payload, api_key).await?;

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty());

        let finish_reason = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("finish_reason"))
            .and_then(|value| value.as_str());

        let response = match content {
            Some(content) => {
                let parsed: Value = serde_json::from_str(content).map_err(|err| {
                    AiGradingError::Decode(format!("model returned invalid JSON: {err}"))
                })?;
                normalize_response(&parsed, &request.answer_text, request.max_points)
            }
            None if finish_reason == Some("length") => {
                tracing::warn!(
                    max_tokens = self.max_tokens,
                    "Model response truncated by token limit; retrying with simplified prompt"
                );
                self.grade_with_simplified_prompt(request, api_key).await?
            }
            None => {
                return Err(AiGradingError::Decode(
                    "model response did not contain content".to_string(),
                ));
            }
        };

        let duration = timer.elapsed().as_secs_f64();
        metrics::histogram!("ai_grading_call_duration_seconds").record(duration);
        tracing::info!(
            model = %self.model,
            duration_seconds = duration,
            answer_chars = request.answer_text.chars().count(),
            max_points = request.max_points,
            mode = ?request.mode,
            "Model grading call completed"
        );

        Ok(response)
    }

    async fn send_with_retry(
        &self,
        payload: &Value,
        api_key: &str,
    ) -> Result<Value, AiGradingError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0u32;

        loop {
            let result = self.client.post(&url).bearer_auth(api_key).json(payload).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|err| {
                            AiGradingError::Decode(format!("provider body was not JSON: {err}"))
                        });
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status == StatusCode::UNAUTHORIZED {
                        let lowered = body.to_lowercase();
                        if lowered.contains("invalid")
                            || lowered.contains("unauthorized")
                            || lowered.contains("api key")
                        {
                            return Err(AiGradingError::InvalidApiKey);
                        }
                        return Err(AiGradingError::Provider(status));
                    }

                    let transient =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if transient && attempt < self.retry_attempts {
                        let backoff = backoff_ms(attempt);
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            backoff_ms = backoff,
                            "Transient provider error; retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(status = status.as_u16(), body = %body, "Provider request failed");
                    return Err(AiGradingError::Provider(status));
                }
                Err(err) => {
                    // Timeouts and connection resets are retriable; anything
                    // else bubbles up as a transport failure.
                    let transient = err.is_timeout() || err.is_connect() || err.is_request();
                    if transient && attempt < self.retry_attempts {
                        let backoff = backoff_ms(attempt);
                        tracing::warn!(error = %err, attempt, backoff_ms = backoff, "Provider request error; retrying");
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(AiGradingError::Transport(err));
                }
            }
        }
    }

    /// One attempt with a drastically shortened prompt and a higher token
    /// budget. Accepts a comment-only result rather than failing outright.
    async fn grade_with_simplified_prompt(
        &self,
        request: &GradeAnswerRequest,
        api_key: &str,
    ) -> Result<GradingResponse, AiGradingError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": simplified_system_prompt(request.max_points)},
                {"role": "user", "content": simplified_user_prompt(request)},
            ],
            "response_format": {"type": "json_object"},
            "max_completion_tokens": SIMPLIFIED_MAX_TOKENS,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response =
            self.client.post(&url).bearer_auth(api_key).json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(AiGradingError::Provider(response.status()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| AiGradingError::Decode(format!("provider body was not JSON: {err}")))?;
        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                AiGradingError::Decode("simplified retry did not contain content".to_string())
            })?;

        let parsed: Value = serde_json::from_str(content).map_err(|err| {
            AiGradingError::Decode(format!("simplified retry returned invalid JSON: {err}"))
        })?;

        let points = clamp_points(coerce_number(parsed.get("pointsAwarded")), request.max_points);
        let comment = parsed
            .get("comment")
            .and_then(|value| value.as_str())
            .map(|value| truncate_chars(value, COMMENT_MAX_CHARS))
            .unwrap_or_else(|| "Graded with a simplified prompt.".to_string());

        Ok(GradingResponse {
            points_awarded: points,
            comment,
            overall_comment: None,
            inline_comments: Vec::new(),
        })
    }
}

/// Coerces an untrusted model payload into a fully-valid response. Every
/// field is defaulted or clamped; inline comments are reconciled against the
/// real answer text and dropped when their anchor cannot be trusted.
fn normalize_response(parsed: &Value, answer_text: &str, max_points: f64) -> GradingResponse {
    let points = clamp_points(coerce_number(parsed.get("pointsAwarded")), max_points);

    let comment = parsed
        .get("comment")
        .and_then(|value| value.as_str())
        .map(|value| truncate_chars(value, COMMENT_MAX_CHARS))
        .unwrap_or_default();

    let overall_comment = parsed
        .get("overallComment")
        .and_then(|value| value.as_str())
        .map(|value| truncate_chars(value, COMMENT_MAX_CHARS))
        .filter(|value| !value.is_empty());

    let inline_comments = parsed
        .get("inlineComments")
        .and_then(|value| value.as_array())
        .map(|candidates| {
            candidates
                .iter()
                .filter_map(|candidate| normalize_inline_comment(candidate, answer_text))
                .collect()
        })
        .unwrap_or_default();

    GradingResponse { points_awarded: points, comment, overall_comment, inline_comments }
}

fn normalize_inline_comment(candidate: &Value, answer_text: &str) -> Option<SuggestedInlineComment> {
    let text = candidate
        .get("text")
        .and_then(|value| value.as_str())
        .map(|value| truncate_chars(value, INLINE_TEXT_MAX_CHARS))
        .unwrap_or_default();
    if text.is_empty() {
        return None;
    }

    let proposed = ProposedSpan {
        start_index: coerce_optional_number(candidate.get("startIndex")),
        end_index: coerce_optional_number(candidate.get("endIndex")),
        quote: candidate
            .get("quote")
            .and_then(|value| value.as_str())
            .map(|value| truncate_chars(value, QUOTE_MAX_CHARS)),
    };

    // A quote the model invented (no occurrence in the answer) makes the
    // whole annotation untrustworthy; stale numeric offsets are not kept.
    let span = match offsets::reconcile(answer_text, &proposed) {
        Reconciliation::QuoteAnchored(span) | Reconciliation::Numeric(span) => span,
        Reconciliation::QuoteNotFound(_) | Reconciliation::Rejected => return None,
    };

    let id = candidate
        .get("id")
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(random_comment_id);

    Some(SuggestedInlineComment {
        id,
        start_index: span.start_index,
        end_index: span.end_index,
        text,
    })
}

fn coerce_number(value: Option<&Value>) -> f64 {
    coerce_optional_number(value).unwrap_or(0.0)
}

fn coerce_optional_number(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn clamp_points(points: f64, max_points: f64) -> f64 {
    if !points.is_finite() {
        return 0.0;
    }
    points.clamp(0.0, max_points.max(0.0))
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn random_comment_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COMMENT_ID_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

fn backoff_ms(attempt: u32) -> u64 {
    (1000u64.saturating_mul(2u64.saturating_pow(attempt))).min(BACKOFF_CAP_MS)
}

fn mode_instructions(mode: GradingMode) -> &'static str {
    match mode {
        GradingMode::Neutral => {
            "Keep a professional, balanced tone. Penalize and reward fairly, \
             staying close to the rubric."
        }
        GradingMode::Strict => {
            "Be demanding: penalize imprecision, ambiguity and reasoning errors. \
             Do not award points for vague approximations."
        }
        GradingMode::Lenient => {
            "Favor positive reinforcement: value intent and award partial credit \
             when there is reasonable evidence of understanding, while staying \
             consistent with the rubric."
        }
    }
}

fn system_prompt(mode: GradingMode) -> String {
    format!(
        "You are a constructive exam corrector. You evaluate free-text exam \
answers against the professor's RUBRIC, helping the student improve with \
useful, educational feedback.\n\
GRADING MODE: {mode:?}. {instructions}\n\n\
Respond with a JSON object:\n\
- \"pointsAwarded\": numeric score\n\
- \"comment\": general feedback for this answer\n\
- \"overallComment\": overall remark about the answer\n\
- \"inlineComments\": array of comments about specific fragments\n\n\
Each inlineComments element must contain:\n\
- \"id\": unique identifier (e.g. \"c1\", \"c2\")\n\
- \"startIndex\": character position where the fragment starts\n\
- \"endIndex\": character position where the fragment ends\n\
- \"text\": the comment about that fragment\n\
- \"quote\": the EXACT literal substring of the student's answer being \
commented. It must occur verbatim in the answer; keep it to roughly 5-25 \
words.\n\n\
Use inline comments only for long answers with multiple concepts, specific \
mistakes in concrete parts, or notable fragments; never for very short \
answers.\n\
Always return valid JSON.",
        mode = mode,
        instructions = mode_instructions(mode),
    )
}

fn user_prompt(request: &GradeAnswerRequest) -> String {
    format!(
        "STUDENT: \"{student}\"\n\
RUBRIC: \"{rubric}\"\n\
QUESTION: \"{question}\" (maximum {max_points} points)\n\
STUDENT ANSWER: \"{answer}\"\n\n\
Evaluate the answer and produce the general comment plus, only when the \
answer is long enough, inline comments pointing at concrete fragments.\n\
Count character indices from the start of the answer (starting at 0), and \
include in every inline comment the \"quote\" with the EXACT substring you \
are commenting on.\n\
Return ONLY the JSON.",
        student = request.student_label,
        rubric = request.rubric_text,
        question = request.question_text,
        max_points = request.max_points,
        answer = request.answer_text,
    )
}

fn simplified_system_prompt(max_points: f64) -> String {
    format!(
        "Evaluate this exam answer and return JSON with:\n\
- \"pointsAwarded\": numeric score (0-{max_points})\n\
- \"comment\": brief feedback (at most 200 characters)\n\n\
Return ONLY the JSON."
    )
}

fn simplified_user_prompt(request: &GradeAnswerRequest) -> String {
    format!(
        "RUBRIC: \"{rubric}\"\n\
QUESTION: \"{question}\" ({max_points} points maximum)\n\
ANSWER: \"{answer}\"\n\n\
Evaluate and return JSON.",
        rubric = truncate_chars(&request.rubric_text, 500),
        question = truncate_chars(&request.question_text, 300),
        max_points = request.max_points,
        answer = truncate_chars(&request.answer_text, 800),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    #[test]
    fn points_are_clamped_and_non_finite_maps_to_zero() {
        for (raw, expected) in [
            (json!({"pointsAwarded": 6.5}), 6.5),
            (json!({"pointsAwarded": -3}), 0.0),
            (json!({"pointsAwarded": 42}), 10.0),
            (json!({"pointsAwarded": "7"}), 7.0),
            (json!({"pointsAwarded": "not a number"}), 0.0),
            (json!({"pointsAwarded": null}), 0.0),
            (json!({}), 0.0),
        ] {
            let normalized = normalize_response(&raw, "answer", 10.0);
            assert_eq!(normalized.points_awarded, expected, "raw: {raw}");
        }
    }

    #[test]
    fn comments_are_truncated() {
        let long = "x".repeat(COMMENT_MAX_CHARS + 500);
        let raw = json!({"pointsAwarded": 1, "comment": long, "overallComment": long});
        let normalized = normalize_response(&raw, "answer", 5.0);
        assert_eq!(normalized.comment.chars().count(), COMMENT_MAX_CHARS);
        assert_eq!(
            normalized.overall_comment.as_ref().map(|value| value.chars().count()),
            Some(COMMENT_MAX_CHARS)
        );
    }

    #[test]
    fn inline_comment_with_matching_quote_is_anchored() {
        let answer = "water boils at 100 degrees under standard pressure";
        let raw = json!({
            "pointsAwarded": 3,
            "comment": "ok",
            "inlineComments": [
                {"id": "c1", "startIndex": 2, "endIndex": 9, "text": "good", "quote": "100 degrees"}
            ]
        });
        let normalized = normalize_response(&raw, answer, 5.0);
        assert_eq!(normalized.inline_comments.len(), 1);
        let comment = &normalized.inline_comments[0];
        assert_eq!(comment.start_index, answer.find("100 degrees").unwrap());
        assert_eq!(comment.end_index - comment.start_index, "100 degrees".chars().count());
    }

    #[test]
    fn inline_comment_with_unmatched_quote_is_dropped() {
        let raw = json!({
            "pointsAwarded": 3,
            "comment": "ok",
            "inlineComments": [
                {"startIndex": 0, "endIndex": 5, "text": "hm", "quote": "does not occur"}
            ]
        });
        let normalized = normalize_response(&raw, "a real answer", 5.0);
        assert!(normalized.inline_comments.is_empty());
    }

    #[test]
    fn inline_comment_without_text_or_with_empty_span_is_dropped() {
        let raw = json!({
            "pointsAwarded": 3,
            "comment": "ok",
            "inlineComments": [
                {"startIndex": 0, "endIndex": 5, "text": ""},
                {"startIndex": 5, "endIndex": 5, "text": "empty span"},
                "not even an object"
            ]
        });
        let normalized = normalize_response(&raw, "some answer text", 5.0);
        assert!(normalized.inline_comments.is_empty());
    }

    #[test]
    fn inline_comment_without_id_gets_a_random_one() {
        let raw = json!({
            "pointsAwarded": 3,
            "comment": "ok",
            "inlineComments": [{"startIndex": 0, "endIndex": 4, "text": "note"}]
        });
        let normalized = normalize_response(&raw, "some answer", 5.0);
        assert_eq!(normalized.inline_comments.len(), 1);
        assert_eq!(normalized.inline_comments[0].id.len(), COMMENT_ID_LEN);
    }

    #[test]
    fn empty_overall_comment_becomes_none() {
        let raw = json!({"pointsAwarded": 1, "comment": "c", "overallComment": ""});
        let normalized = normalize_response(&raw, "answer", 5.0);
        assert_eq!(normalized.overall_comment, None);
    }

    // Loopback provider tests: a local axum server stands in for the model
    // endpoint so retry and truncation behavior is exercised end to end.

    fn test_service(base_url: String) -> AiGradingService {
        AiGradingService {
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("client"),
            base_url,
            model: "test-model".to_string(),
            max_tokens: 256,
            retry_attempts: 1,
        }
    }

    fn request() -> GradeAnswerRequest {
        GradeAnswerRequest {
            student_label: "Student A".to_string(),
            rubric_text: "full credit for the correct definition".to_string(),
            question_text: "Define osmosis".to_string(),
            max_points: 10.0,
            answer_text: "osmosis moves water across a membrane".to_string(),
            mode: GradingMode::Neutral,
        }
    }

    async fn spawn_provider(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}/v1")
    }

    fn completion_body(content: &Value) -> Value {
        json!({
            "choices": [{
                "message": {"content": content.to_string()},
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn happy_path_returns_normalized_response() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(completion_body(&json!({
                    "pointsAwarded": 6,
                    "comment": "solid answer",
                    "overallComment": "well structured",
                    "inlineComments": [{
                        "id": "c1",
                        "startIndex": 0,
                        "endIndex": 7,
                        "text": "precise term",
                        "quote": "osmosis"
                    }]
                })))
            }),
        );
        let base_url = spawn_provider(router).await;

        let response =
            test_service(base_url).grade_answer(&request(), "sk-test").await.expect("grade");
        assert_eq!(response.points_awarded, 6.0);
        assert_eq!(response.comment, "solid answer");
        assert_eq!(response.overall_comment.as_deref(), Some("well structured"));
        assert_eq!(response.inline_comments.len(), 1);
        assert_eq!(response.inline_comments[0].start_index, 0);
    }

    #[tokio::test]
    async fn transient_429_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(attempts): State<Arc<AtomicUsize>>| async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(axum::http::StatusCode::TOO_MANY_REQUESTS)
                    } else {
                        Ok(Json(completion_body(
                            &json!({"pointsAwarded": 4, "comment": "after retry"}),
                        )))
                    }
                }),
            )
            .with_state(attempts.clone());
        let base_url = spawn_provider(router).await;

        let response =
            test_service(base_url).grade_answer(&request(), "sk-test").await.expect("grade");
        assert_eq!(response.points_awarded, 4.0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unauthorized_with_key_message_maps_to_invalid_api_key() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    "{\"error\":{\"message\":\"Incorrect API key provided\"}}",
                )
            }),
        );
        let base_url = spawn_provider(router).await;

        let err =
            test_service(base_url).grade_answer(&request(), "sk-bad").await.expect_err("error");
        assert!(matches!(err, AiGradingError::InvalidApiKey));
        assert_eq!(err.code(), "INVALID_API_KEY");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn non_transient_client_error_fails_without_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(attempts): State<Arc<AtomicUsize>>| async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::BAD_REQUEST
                }),
            )
            .with_state(attempts.clone());
        let base_url = spawn_provider(router).await;

        let err =
            test_service(base_url).grade_answer(&request(), "sk-test").await.expect_err("error");
        assert!(matches!(err, AiGradingError::Provider(StatusCode::BAD_REQUEST)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn truncated_response_retries_with_simplified_prompt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(attempts): State<Arc<AtomicUsize>>| async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Json(json!({
                            "choices": [{"message": {}, "finish_reason": "length"}],
                            "usage": {"completion_tokens": 256}
                        }))
                    } else {
                        Json(completion_body(
                            &json!({"pointsAwarded": 5, "comment": "short verdict"}),
                        ))
                    }
                }),
            )
            .with_state(attempts.clone());
        let base_url = spawn_provider(router).await;

        let response =
            test_service(base_url).grade_answer(&request(), "sk-test").await.expect("grade");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(response.points_awarded, 5.0);
        assert_eq!(response.comment, "short verdict");
        assert!(response.inline_comments.is_empty());
        assert_eq!(response.overall_comment, None);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let err = test_service("http://127.0.0.1:9".to_string())
            .grade_answer(&request(), "  ")
            .await
            .expect_err("error");
        assert!(matches!(err, AiGradingError::MissingApiKey));
        assert_eq!(err.code(), "MISSING_API_KEY");
    }
}
