//! Stage unit contract and the retrying executor.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, info_span, warn, Instrument, Span};

use opnflow_core::{Task, TaskStatus};

use crate::config::BackoffPolicy;

/// Message used when retries run out without a recorded fault.
const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// What a stage unit hands back.
///
/// Units never panic or raise to signal failure: they return the task
/// together with how the failure should be treated.
#[derive(Debug)]
pub enum StageOutcome {
    /// The unit ran; the task's status says how it went.
    Ok(Task),
    /// A transient fault; worth another attempt.
    Retryable(Task, String),
    /// A fault another attempt cannot fix.
    Fatal(Task, String),
}

impl StageOutcome {
    /// Collapse into a task, marking faults as failures.
    pub fn into_task(self) -> Task {
        match self {
            StageOutcome::Ok(task) => task,
            StageOutcome::Retryable(mut task, err) | StageOutcome::Fatal(mut task, err) => {
                fail(&mut task, err);
                task
            }
        }
    }
}

/// One step of the pipeline.
#[async_trait]
pub trait StageUnit: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run the stage, taking ownership of the task for the duration.
    async fn execute(&self, task: Task) -> StageOutcome;
}

/// Wraps a stage unit with bounded retry and exponential backoff.
///
/// The retry budget lives on the task itself, so the executor carries no
/// per-run state and can be shared.
#[derive(Clone)]
pub struct RetryingExecutor {
    unit: Arc<dyn StageUnit>,
    backoff: BackoffPolicy,
    span: Span,
}

impl RetryingExecutor {
    /// Create a new executor around `unit`.
    pub fn new(unit: Arc<dyn StageUnit>, backoff: BackoffPolicy) -> Self {
        let span = info_span!("stage", name = %unit.name());
        Self {
            unit,
            backoff,
            span,
        }
    }

    /// Builder method to attach a parent logging context.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn unit_name(&self) -> &str {
        self.unit.name()
    }

    /// Run the unit until it completes, fails for good, or the task's retry
    /// budget runs out.
    pub async fn run_with_retry(&self, task: Task) -> Task {
        self.retry_loop(task).instrument(self.span.clone()).await
    }

    async fn retry_loop(&self, mut task: Task) -> Task {
        let mut last_fault: Option<String> = None;

        while task.can_retry() {
            info!(
                task_id = %task.id,
                attempt = task.retry_count() + 1,
                max_retries = task.max_retries(),
                "Executing task"
            );

            let fault = match self.unit.execute(task).await {
                StageOutcome::Ok(result) => {
                    task = result;
                    match task.status() {
                        TaskStatus::Completed => return task,
                        TaskStatus::Failed if task.can_retry() => task
                            .error_message()
                            .map(str::to_owned)
                            .unwrap_or_else(|| "stage failed".to_string()),
                        _ => return task,
                    }
                }
                StageOutcome::Retryable(result, err) => {
                    task = result;
                    error!(task_id = %task.id, error = %err, "Stage fault");
                    if !task.can_retry() {
                        fail(&mut task, err);
                        return task;
                    }
                    err
                }
                StageOutcome::Fatal(mut result, err) => {
                    error!(task_id = %result.id, error = %err, "Fatal stage fault");
                    fail(&mut result, err);
                    return result;
                }
            };
            last_fault = Some(fault);

            if let Err(e) = task.increment_retry() {
                warn!(task_id = %task.id, error = %e, "Cannot retry task");
                break;
            }
            if !task.can_retry() {
                break;
            }

            // Delay is keyed to the post-increment count.
            let delay = self.backoff.delay_for(task.retry_count());
            warn!(
                task_id = %task.id,
                retry = task.retry_count(),
                delay_secs = delay.as_secs_f64(),
                "Task failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        let message = last_fault.unwrap_or_else(|| MAX_RETRIES_EXCEEDED.to_string());
        error!(
            task_id = %task.id,
            retries = task.retry_count(),
            error = %message,
            "Task failed after exhausting retries"
        );
        fail(&mut task, message);
        task
    }
}

/// Mark a task failed unless it is already terminal.
fn fail(task: &mut Task, message: String) {
    if let Err(e) = task.mark_failed(message) {
        warn!(task_id = %task.id, error = %e, "Ignoring failure on terminal task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use opnflow_core::{Statistics, TaskId, TaskType};
    use serde_json::Map;
    use tokio::time::Instant;

    /// Unit that plays back a fixed script of results, one per call.
    struct ScriptedUnit {
        script: Mutex<Vec<Step>>,
        calls: AtomicU32,
    }

    #[derive(Clone)]
    enum Step {
        Complete,
        Fail,
        Partial,
        Fault,
        Fatal,
    }

    impl ScriptedUnit {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            let mut script = steps;
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageUnit for ScriptedUnit {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, mut task: Task) -> StageOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop().unwrap_or(Step::Fail);
            task.mark_in_progress().unwrap();
            match step {
                Step::Complete => {
                    task.mark_completed(Some(&Statistics::default())).unwrap();
                    StageOutcome::Ok(task)
                }
                Step::Fail => {
                    task.mark_failed("render error").unwrap();
                    StageOutcome::Ok(task)
                }
                Step::Partial => {
                    task.mark_partial_failure("1 groups failed to generate", None)
                        .unwrap();
                    StageOutcome::Ok(task)
                }
                Step::Fault => StageOutcome::Retryable(task, "connection reset".into()),
                Step::Fatal => StageOutcome::Fatal(task, "renderer missing".into()),
            }
        }
    }

    fn task(max_retries: u32) -> Task {
        Task::new(TaskId::new("grp_1"), TaskType::GroupDocuments, Map::new())
            .with_max_retries(max_retries)
    }

    fn executor(unit: Arc<ScriptedUnit>) -> RetryingExecutor {
        RetryingExecutor::new(unit, BackoffPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_first_try() {
        let unit = ScriptedUnit::new(vec![Step::Complete]);
        let exec = executor(unit.clone());
        assert_eq!(exec.unit_name(), "scripted");
        let result = exec.run_with_retry(task(3)).await;

        assert_eq!(result.status(), TaskStatus::Completed);
        assert_eq!(result.retry_count(), 0);
        assert_eq!(unit.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_completes() {
        let unit = ScriptedUnit::new(vec![Step::Fail, Step::Fault, Step::Complete]);
        let start = Instant::now();
        let result = executor(unit.clone()).run_with_retry(task(3)).await;

        assert_eq!(result.status(), TaskStatus::Completed);
        assert_eq!(result.retry_count(), 2);
        assert_eq!(unit.calls(), 3);
        // 1s after the first retry, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence() {
        let unit = ScriptedUnit::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Complete]);
        let start = Instant::now();
        let result = executor(unit).run_with_retry(task(4)).await;

        assert_eq!(result.status(), TaskStatus::Completed);
        assert_eq!(result.retry_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_marks_failed_with_last_fault() {
        let unit = ScriptedUnit::new(vec![Step::Fault, Step::Fault, Step::Fault]);
        let result = executor(unit.clone()).run_with_retry(task(3)).await;

        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(result.error_message(), Some("connection reset"));
        assert!(result.retry_count() <= result.max_retries());
        assert_eq!(unit.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_failed_results() {
        let unit = ScriptedUnit::new(vec![Step::Fail, Step::Fail]);
        let result = executor(unit.clone()).run_with_retry(task(2)).await;

        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(result.error_message(), Some("render error"));
        assert_eq!(result.retry_count(), 2);
        assert_eq!(unit.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_not_retried() {
        let unit = ScriptedUnit::new(vec![Step::Partial, Step::Complete]);
        let result = executor(unit.clone()).run_with_retry(task(3)).await;

        assert_eq!(result.status(), TaskStatus::PartialFailure);
        assert_eq!(unit.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_not_retried() {
        let unit = ScriptedUnit::new(vec![Step::Fatal, Step::Complete]);
        let result = executor(unit.clone()).run_with_retry(task(3)).await;

        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(result.error_message(), Some("renderer missing"));
        assert_eq!(unit.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_budget_fails_without_running() {
        let unit = ScriptedUnit::new(vec![Step::Complete]);
        let result = executor(unit.clone()).run_with_retry(task(0)).await;

        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(result.error_message(), Some("max retries exceeded"));
        assert_eq!(unit.calls(), 0);
    }
}
