//! Worker-pool primitive for fanning out independent async tasks against
//! rate-limited collaborators. Used at three levels: answers within a
//! submission, submissions within a grading job, and finalize notifications.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Runs `tasks` with at most `limit` in flight at once. Tasks start in input
/// order and every task starts exactly once; results come back in input order
/// regardless of completion order, so callers can zip them positionally.
///
/// Failure isolation is the caller's contract: tasks that can fail should
/// resolve to a `Result` value rather than propagate.
pub(crate) async fn run_with_concurrency<F, Fut, T>(tasks: Vec<F>, limit: usize) -> Vec<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let limit = limit.max(1);
    stream::iter(tasks.into_iter().map(|task| task())).buffered(limit).collect().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn results_preserve_input_order() {
        // Later tasks finish first; output order must still match input order.
        let tasks: Vec<_> = (0..6u64)
            .map(|index| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(30 - index * 5)).await;
                    index
                }
            })
            .collect();

        let results = run_with_concurrency(tasks, 6).await;
        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn in_flight_tasks_never_exceed_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let current = current.clone();
                let peak = peak.clone();
                move || async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        run_with_concurrency(tasks, 3).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn every_task_runs_exactly_once() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let started = started.clone();
                move || async move {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();

        run_with_concurrency(tasks, 8).await;
        assert_eq!(started.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn failing_tasks_do_not_disturb_siblings() {
        let tasks: Vec<_> = (0..4i32)
            .map(|index| {
                move || async move {
                    if index % 2 == 0 {
                        Ok(index)
                    } else {
                        Err(format!("task {index} failed"))
                    }
                }
            })
            .collect();

        let results = run_with_concurrency(tasks, 2).await;
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Err("task 1 failed".to_string()));
        assert_eq!(results[2], Ok(2));
        assert_eq!(results[3], Err("task 3 failed".to_string()));
    }

    #[tokio::test]
    async fn limit_of_zero_is_treated_as_one() {
        let results = run_with_concurrency(vec![|| async { 7 }], 0).await;
        assert_eq!(results, vec![7]);
    }
}
