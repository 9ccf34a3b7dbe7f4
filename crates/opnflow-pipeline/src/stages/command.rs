//! Generation through an external renderer command.
//!
//! Spreadsheet and template rendering are swappable adapters: the stage
//! spawns the configured program, writes the task as JSON to its stdin and
//! reads a statistics map from its stdout:
//!
//! ```json
//! {"total_records": 10, "successful": 9, "failed": 1, "skipped": 0,
//!  "output_files": ["..."], "errors": ["..."]}
//! ```

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use opnflow_core::{Statistics, Task};

use crate::error::PipelineError;
use crate::executor::{StageOutcome, StageUnit};

/// Generation unit backed by a renderer command.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    /// Input key holding this unit's output folder.
    output_key: &'static str,
    /// Extra input keys the renderer cannot run without.
    required_keys: Vec<&'static str>,
    /// What one record produces, for messages ("groups", "notices").
    noun: &'static str,
}

impl CommandStage {
    /// Group spreadsheet generator writing under `output_group_folder`.
    pub fn group(program: impl Into<String>) -> Self {
        Self {
            name: "group_generator".to_string(),
            program: program.into(),
            args: Vec::new(),
            output_key: "output_group_folder",
            required_keys: vec!["excel_path"],
            noun: "groups",
        }
    }

    /// Notice generator writing under `output_notice_folder`.
    pub fn notice(program: impl Into<String>) -> Self {
        Self {
            name: "notice_generator".to_string(),
            program: program.into(),
            args: Vec::new(),
            output_key: "output_notice_folder",
            required_keys: vec!["excel_path", "template_docx"],
            noun: "notices",
        }
    }

    /// Builder method to add a command-line argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Run the renderer and parse its statistics.
    async fn render(&self, task: &Task, output_dir: &Path) -> Result<Statistics, RenderError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| RenderError::Transient(PipelineError::Io(e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("OPNFLOW_OUTPUT_DIR", output_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = ?cmd, "Spawning renderer");
        let mut child = cmd.spawn().map_err(|source| {
            RenderError::Fatal(PipelineError::Spawn {
                program: self.program.clone(),
                source,
            })
        })?;

        let request = json!({
            "task_id": task.id,
            "task_type": task.task_type,
            "input": task.input,
        });
        if let Some(mut stdin) = child.stdin.take() {
            let body = request.to_string();
            if let Err(e) = stdin.write_all(body.as_bytes()).await {
                warn!(error = %e, "Renderer did not accept the request on stdin");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RenderError::Transient(PipelineError::Io(e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(RenderError::Transient(PipelineError::InvalidOutput(format!(
                "renderer exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                detail.trim()
            ))));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| RenderError::Transient(PipelineError::Json(e)))?;
        if !value.is_object() {
            return Err(RenderError::Transient(PipelineError::InvalidOutput(
                "expected a statistics object".to_string(),
            )));
        }
        Ok(Statistics::from_metadata(&value))
    }
}

enum RenderError {
    Transient(PipelineError),
    Fatal(PipelineError),
}

#[async_trait]
impl StageUnit for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut task: Task) -> StageOutcome {
        let started = Instant::now();
        if let Err(e) = task.mark_in_progress() {
            return StageOutcome::Fatal(task, e.to_string());
        }
        info!(task_id = %task.id, stage = %self.name, "Starting generation");

        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .chain(std::iter::once(&self.output_key))
            .copied()
            .filter(|key| task.input_str(key).is_none())
            .collect();
        if !missing.is_empty() {
            let msg = format!("Missing required input_data fields: {:?}", missing);
            return StageOutcome::Fatal(task, msg);
        }
        let output_dir = task
            .input_str(self.output_key)
            .map(|s| Path::new(s).to_path_buf())
            .unwrap_or_default();

        let mut stats = match self.render(&task, &output_dir).await {
            Ok(stats) => stats,
            Err(RenderError::Transient(e)) => {
                error!(task_id = %task.id, error = %e, "Generation error");
                return StageOutcome::Retryable(task, e.to_string());
            }
            Err(RenderError::Fatal(e)) => {
                error!(task_id = %task.id, error = %e, "Generation cannot run");
                return StageOutcome::Fatal(task, e.to_string());
            }
        };
        if stats.duration.is_zero() {
            stats.duration = started.elapsed();
        }

        let result = if stats.failed == 0 {
            info!(
                task_id = %task.id,
                created = stats.successful,
                skipped = stats.skipped,
                "Generation completed"
            );
            task.mark_completed(Some(&stats))
        } else {
            warn!(
                task_id = %task.id,
                successful = stats.successful,
                failed = stats.failed,
                "Partial failure"
            );
            task.mark_partial_failure(
                format!("{} {} failed to generate", stats.failed, self.noun),
                Some(&stats),
            )
        };

        match result {
            Ok(()) => StageOutcome::Ok(task),
            Err(e) => StageOutcome::Fatal(task, e.to_string()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use opnflow_core::{TaskId, TaskStatus, TaskType};
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    fn shell(script: &str) -> CommandStage {
        CommandStage::group("sh").with_arg("-c").with_arg(script)
    }

    fn task(dir: &TempDir) -> Task {
        let mut input = Map::new();
        input.insert("excel_path".into(), Value::String("claims.xlsx".into()));
        input.insert(
            "output_group_folder".into(),
            Value::String(dir.path().join("groups").display().to_string()),
        );
        Task::new(TaskId::new("grp_1"), TaskType::GroupDocuments, input)
    }

    #[tokio::test]
    async fn test_successful_render_records_stats() {
        let dir = TempDir::new().unwrap();
        let stage = shell(
            r#"cat > /dev/null; echo '{"total_records": 3, "successful": 3, "output_files": ["a.xlsx"]}'"#,
        );
        let result = stage.execute(task(&dir)).await.into_task();

        assert_eq!(result.status(), TaskStatus::Completed);
        let stats = result.stats().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.successful, 3);
        assert!(dir.path().join("groups").is_dir());
    }

    #[tokio::test]
    async fn test_failed_records_mark_partial_failure() {
        let dir = TempDir::new().unwrap();
        let stage = shell(
            r#"cat > /dev/null; echo '{"total_records": 3, "successful": 2, "failed": 1, "errors": ["NPI 42"]}'"#,
        );
        let result = stage.execute(task(&dir)).await.into_task();

        assert_eq!(result.status(), TaskStatus::PartialFailure);
        assert_eq!(result.error_message(), Some("1 groups failed to generate"));
        assert_eq!(result.stats().unwrap().errors, vec!["NPI 42"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_retryable() {
        let dir = TempDir::new().unwrap();
        let stage = shell("echo 'workbook locked' >&2; exit 3");
        match stage.execute(task(&dir)).await {
            StageOutcome::Retryable(_, err) => {
                assert!(err.contains("code 3"));
                assert!(err.contains("workbook locked"));
            }
            other => panic!("expected retryable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_fatal() {
        let dir = TempDir::new().unwrap();
        let stage = CommandStage::group("/nonexistent/renderer");
        assert!(matches!(
            stage.execute(task(&dir)).await,
            StageOutcome::Fatal(_, _)
        ));
    }

    #[tokio::test]
    async fn test_missing_template_is_fatal_for_notices() {
        let dir = TempDir::new().unwrap();
        let stage = CommandStage::notice("true");
        match stage.execute(task(&dir)).await {
            StageOutcome::Fatal(_, err) => assert!(err.contains("template_docx")),
            other => panic!("expected fatal, got {:?}", other),
        }
    }
}
