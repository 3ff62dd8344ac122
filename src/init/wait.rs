// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

pub type TaskSet = JoinSet<Result<(), BoxError>>;

/// Resolves when the first task in the set exits. An empty set resolves
/// immediately.
pub async fn wait_for_any_task(tasks: &mut TaskSet) -> Result<(), BoxError> {
    match tasks.join_next().await {
        None => Ok(()),
        Some(res) => res?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut TaskSet,
    timeout: Duration,
) -> Result<(), BoxError> {
    wait_for_tasks_with_deadline(tasks, Instant::now() + timeout).await
}

/// Join every task, remembering the last task error. Panicked tasks are
/// logged and otherwise ignored.
pub async fn wait_for_tasks_with_deadline(
    tasks: &mut TaskSet,
    stop_at: Instant,
) -> Result<(), BoxError> {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => return Err("timed out waiting for tasks to complete".into()),
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!(error = %e, "Failed to join with task"),
        }
    }
    result
}
