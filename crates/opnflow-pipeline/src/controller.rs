//! Pipeline controller.
//!
//! Composes the stage units into the fixed topology
//! `validate -> { groups, notices } -> merge` and folds their results into
//! one [`PipelineOutcome`].

use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument, Span};

use opnflow_core::{
    PipelineOutcome, PipelineStatus, Statistics, Task, TaskId, TaskStatus, TaskType,
};

use crate::config::{BackoffPolicy, PipelineConfig};
use crate::executor::{RetryingExecutor, StageUnit};
use crate::stages::report_from_task;

/// Result of one generation unit; `Err` when its task never came back.
type UnitResult = Result<Task, String>;

/// Runs one pipeline per [`PipelineController::process`] call.
///
/// The controller holds no per-run state, so one instance can serve
/// concurrent runs.
#[derive(Clone)]
pub struct PipelineController {
    validator: Arc<dyn StageUnit>,
    group_generator: Arc<dyn StageUnit>,
    notice_generator: Arc<dyn StageUnit>,
    merger: Arc<dyn StageUnit>,
    backoff: BackoffPolicy,
    span: Span,
}

impl PipelineController {
    pub fn new(
        validator: Arc<dyn StageUnit>,
        group_generator: Arc<dyn StageUnit>,
        notice_generator: Arc<dyn StageUnit>,
        merger: Arc<dyn StageUnit>,
    ) -> Self {
        Self {
            validator,
            group_generator,
            notice_generator,
            merger,
            backoff: BackoffPolicy::default(),
            span: info_span!("pipeline"),
        }
    }

    /// Builder method to set the backoff between generation retries.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builder method to attach a parent logging context.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run the whole pipeline. Never fails: every error ends up in the outcome.
    pub async fn process(&self, config: PipelineConfig) -> PipelineOutcome {
        let run_span = info_span!(parent: &self.span, "run", run_id = %TaskId::generate());
        self.run(config).instrument(run_span).await
    }

    async fn run(&self, config: PipelineConfig) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::start();

        if let Err(e) = config.validate() {
            error!(error = %e, "Invalid pipeline configuration");
            outcome.errors.push(e.to_string());
            outcome.finalize(PipelineStatus::Failed);
            return outcome;
        }
        info!(
            excel = ?config.excel_path,
            parallel = config.enable_parallel_processing,
            "Starting pipeline"
        );

        // Validation: runs once, a failure stops the run.
        if !self.validate(&config, &mut outcome).await {
            outcome.finalize(PipelineStatus::Failed);
            return outcome;
        }

        // Generation.
        let (group, notice) = self.generate(&config).await;
        let mut combined = Statistics::default();
        let mut has_failures = false;
        for (label, result) in [("Group generation", group), ("Notice generation", notice)] {
            has_failures |= absorb_unit(label, result, &mut combined, &mut outcome);
        }
        outcome.stats = Some(combined.clone());

        if combined.all_failed() {
            error!(total = combined.total_records, "All document generation failed");
            outcome.errors.push("All document generation failed".to_string());
            outcome.finalize(PipelineStatus::Failed);
            return outcome;
        }

        // Merge: a failure here only costs the consolidated folder.
        self.merge(&config, &mut outcome).await;

        let status = if !has_failures {
            PipelineStatus::Success
        } else if combined.successful > 0 {
            PipelineStatus::PartialFailure
        } else {
            PipelineStatus::Failed
        };
        outcome.finalize(status);

        info!(
            status = %status,
            successful = combined.successful,
            total = combined.total_records,
            duration_secs = outcome.duration_seconds(),
            "Pipeline finished"
        );
        outcome
    }

    async fn validate(&self, config: &PipelineConfig, outcome: &mut PipelineOutcome) -> bool {
        let task = self.new_task("val", TaskType::Validation, config);
        let task = self.validator.execute(task).await.into_task();

        if let Some(report) = report_from_task(&task) {
            outcome.warnings.extend(report.warnings.iter().cloned());
            outcome.validation = Some(report);
        }

        if task.status() == TaskStatus::Completed {
            return true;
        }

        let reported: Vec<String> = outcome
            .validation
            .as_ref()
            .map(|r| r.errors.clone())
            .unwrap_or_default();
        if reported.is_empty() {
            let message = task.error_message().unwrap_or("unknown error");
            outcome.errors.push(format!("Validation failed: {message}"));
        } else {
            outcome.errors.extend(reported);
        }
        error!(task_id = %task.id, "Validation failed, skipping generation");
        false
    }

    async fn generate(&self, config: &PipelineConfig) -> (UnitResult, UnitResult) {
        let group_exec = RetryingExecutor::new(self.group_generator.clone(), self.backoff);
        let notice_exec = RetryingExecutor::new(self.notice_generator.clone(), self.backoff);
        let group_task = self.new_task("grp", TaskType::GroupDocuments, config);
        let notice_task = self.new_task("ntc", TaskType::NoticeDocuments, config);
        info!(
            group = group_exec.unit_name(),
            notice = notice_exec.unit_name(),
            parallel = config.enable_parallel_processing,
            "Starting document generation"
        );

        if !config.enable_parallel_processing {
            let group = group_exec.run_with_retry(group_task).await;
            let notice = notice_exec.run_with_retry(notice_task).await;
            return (Ok(group), Ok(notice));
        }

        // Both units are joined before aggregation; one failing never
        // cancels the other.
        let group = tokio::spawn(
            async move { group_exec.run_with_retry(group_task).await }.in_current_span(),
        );
        let notice = tokio::spawn(
            async move { notice_exec.run_with_retry(notice_task).await }.in_current_span(),
        );
        let (group, notice) = tokio::join!(group, notice);
        (
            group.map_err(|e| e.to_string()),
            notice.map_err(|e| e.to_string()),
        )
    }

    async fn merge(&self, config: &PipelineConfig, outcome: &mut PipelineOutcome) {
        let task = self.new_task("mrg", TaskType::MergedOutput, config);
        let task = self.merger.execute(task).await.into_task();
        let message = task.error_message().unwrap_or("unknown error");

        match task.status() {
            TaskStatus::Completed => {
                outcome.output_folder = Some(config.merged_folder().display().to_string());
            }
            TaskStatus::PartialFailure => {
                warn!(task_id = %task.id, error = message, "Merge incomplete");
                outcome.warnings.push(format!("Merge incomplete: {message}"));
                outcome.output_folder = Some(config.merged_folder().display().to_string());
            }
            _ => {
                warn!(task_id = %task.id, error = message, "Merge failed");
                outcome.warnings.push(format!("Merge failed: {message}"));
            }
        }
    }

    fn new_task(&self, prefix: &str, task_type: TaskType, config: &PipelineConfig) -> Task {
        Task::new(TaskId::with_prefix(prefix), task_type, config.to_task_input())
            .with_max_retries(config.max_retries)
    }
}

/// Fold one generation unit into the run. Returns true if the unit failed
/// in whole or in part.
fn absorb_unit(
    label: &str,
    result: UnitResult,
    combined: &mut Statistics,
    outcome: &mut PipelineOutcome,
) -> bool {
    let task = match result {
        Ok(task) => task,
        Err(e) => {
            error!(unit = label, error = %e, "Generation unit aborted");
            outcome.errors.push(format!("{label} aborted: {e}"));
            return true;
        }
    };

    if let Some(stats) = task.stats() {
        *combined = std::mem::take(combined).merge(stats);
    }

    let message = task.error_message().unwrap_or("unknown error");
    match task.status() {
        TaskStatus::Completed => false,
        TaskStatus::PartialFailure => {
            outcome.warnings.push(format!("{label} partial failure: {message}"));
            true
        }
        _ => {
            outcome.errors.push(format!("{label} failed: {message}"));
            true
        }
    }
}
