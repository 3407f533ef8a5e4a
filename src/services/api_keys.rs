use sqlx::PgPool;

use crate::core::config::Settings;
use crate::repositories;
use crate::services::ai_grading::AiGradingError;

/// Resolves the model credential for a grading job: the exam owner's stored
/// key when present, the system-wide fallback otherwise. Neither configured
/// fails the job before any task starts.
pub(crate) async fn resolve_grading_key(
    pool: &PgPool,
    owner_id: &str,
    settings: &Settings,
) -> Result<String, AiGradingError> {
    match repositories::users::find_by_id(pool, owner_id).await {
        Ok(Some(user)) => {
            if let Some(key) = user.openai_api_key.as_deref() {
                let key = key.trim();
                if !key.is_empty() {
                    tracing::info!(owner_id, "Using the exam owner's model API key");
                    return Ok(key.to_string());
                }
            }
        }
        Ok(None) => {
            tracing::warn!(owner_id, "Grading job owner not found; using fallback key");
        }
        Err(err) => {
            tracing::error!(owner_id, error = %err, "Failed to load owner API key; using fallback");
        }
    }

    let fallback = settings.ai().api_key.trim();
    if fallback.is_empty() {
        return Err(AiGradingError::MissingApiKey);
    }
    Ok(fallback.to_string())
}
