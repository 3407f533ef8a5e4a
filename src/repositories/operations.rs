use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::types::OperationStatus;

/// Outcome of starting an idempotent operation. A completed prior run hands
/// back its stored result for verbatim replay.
pub(crate) enum BeginOutcome {
    AlreadyCompleted(serde_json::Value),
    Started,
}

/// Marks `(operation, request_id)` as in progress unless a prior run already
/// completed. The in-progress record is bookkeeping, not a lock: two callers
/// racing inside the window can both proceed.
pub(crate) async fn begin(
    pool: &PgPool,
    operation: &str,
    request_id: &str,
    now: PrimitiveDateTime,
) -> Result<BeginOutcome, sqlx::Error> {
    let existing = sqlx::query_as::<_, (OperationStatus, Option<Json<serde_json::Value>>)>(
        "SELECT status, result FROM operations WHERE operation = $1 AND request_id = $2",
    )
    .bind(operation)
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    if let Some((OperationStatus::Completed, Some(Json(result)))) = existing {
        return Ok(BeginOutcome::AlreadyCompleted(result));
    }

    sqlx::query(
        "INSERT INTO operations (operation, request_id, status, started_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (operation, request_id)
         DO UPDATE SET status = EXCLUDED.status, started_at = EXCLUDED.started_at",
    )
    .bind(operation)
    .bind(request_id)
    .bind(OperationStatus::InProgress)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(BeginOutcome::Started)
}

pub(crate) async fn complete(
    pool: &PgPool,
    operation: &str,
    request_id: &str,
    result: &serde_json::Value,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE operations
         SET status = $1, result = $2, finished_at = $3
         WHERE operation = $4 AND request_id = $5",
    )
    .bind(OperationStatus::Completed)
    .bind(Json(result))
    .bind(now)
    .bind(operation)
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(())
}
