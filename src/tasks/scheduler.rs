use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::services::ai_grading::AiGradingService;
use crate::tasks::grading;

const JOB_WORKER_CONCURRENCY: usize = 2;
const IDLE_POLL_SECONDS: u64 = 3;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let ai = AiGradingService::from_settings(state.settings())
        .map_err(|err| anyhow!("failed to build AI grading client: {err}"))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(JOB_WORKER_CONCURRENCY);
    for _ in 0..JOB_WORKER_CONCURRENCY {
        handles.push(tokio::spawn(job_worker(state.clone(), ai.clone(), shutdown_rx.clone())));
    }

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to grading workers");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Grading worker join failed");
        }
    }

    Ok(())
}

async fn job_worker(state: AppState, ai: AiGradingService, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match grading::claim_next_job(state.db()).await {
            Ok(Some(job)) => {
                if let Err(err) = grading::process_grading_job(&state, &ai, &job).await {
                    // Unexpected failure: make sure the job does not sit in
                    // processing forever.
                    tracing::error!(job_id = %job.id, error = %err, "Grading job crashed");
                    if let Err(mark_err) = repositories::grading_jobs::mark_failed(
                        state.db(),
                        &job.id,
                        &err.to_string(),
                        primitive_now_utc(),
                    )
                    .await
                    {
                        tracing::error!(
                            job_id = %job.id,
                            error = %mark_err,
                            "Failed to record grading job failure"
                        );
                    }
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Failed to claim grading job"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(Duration::from_secs(IDLE_POLL_SECONDS)) => {}
        }
    }
}
