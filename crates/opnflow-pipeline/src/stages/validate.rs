//! Input validation stage.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use opnflow_core::{Task, ValidationReport};

use crate::executor::{StageOutcome, StageUnit};

/// Columns the group spreadsheets are built from.
pub const REQUIRED_COLUMNS_GROUP: &[&str] = &[
    "ProvOrgNPI",
    "Provider",
    "InsurancePlanName",
    "OpenNegGroup",
    "CPT_Description",
    "Claim Number",
    "Date of item(s) or service(s)",
    "Service code(s)",
    "Initial Payment",
    "Offer",
];

/// Columns the notice documents are built from.
pub const REQUIRED_COLUMNS_NOTICE: &[&str] = &[
    "ProvOrgNPI",
    "Hospital Name",
    "Provider",
    "InsurancePlanName",
    "OpenNegNotice",
    "Notice Date",
    "CMS Date1",
    "CMS Date2",
];

const WORKBOOK_EXTENSIONS: &[&str] = &["xls", "xlsx"];
const TEMPLATE_EXTENSIONS: &[&str] = &["doc", "docx"];
const OUTPUT_FOLDER_KEYS: &[&str] = &[
    "output_group_folder",
    "output_notice_folder",
    "merged_output_folder",
];

/// Shape of a claim workbook, as reported by a spreadsheet reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookSummary {
    /// Header names, already trimmed.
    pub columns: Vec<String>,

    /// Data rows.
    pub total_records: u64,

    /// Rows usable for generation.
    pub validated_records: u64,

    /// Data-quality findings (missing NPIs, duplicate claims, ...).
    pub warnings: Vec<String>,
}

/// Reads claim workbooks. Spreadsheet parsing lives outside this crate.
#[async_trait]
pub trait WorkbookInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<WorkbookSummary, String>;
}

/// Validates the pipeline inputs before any generation starts.
///
/// Missing or malformed input files fail the task. Data-quality issues and
/// non-empty output folders only produce warnings.
pub struct ValidationStage {
    inspector: Option<Arc<dyn WorkbookInspector>>,
}

impl ValidationStage {
    /// Create a stage that only checks files on disk.
    pub fn new() -> Self {
        Self { inspector: None }
    }

    /// Builder method to add column and record checks.
    pub fn with_inspector(mut self, inspector: Arc<dyn WorkbookInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    async fn validate_workbook(&self, path: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !check_file(path, WORKBOOK_EXTENSIONS, "Excel file", &mut report).await {
            return report;
        }

        let Some(inspector) = &self.inspector else {
            debug!(path = %path.display(), "No workbook inspector, skipping column checks");
            return report;
        };

        match inspector.inspect(path).await {
            Ok(summary) => {
                report.total_records = summary.total_records;
                report.validated_records = summary.validated_records;
                report.warnings.extend(summary.warnings);

                let actual: BTreeSet<&str> = summary.columns.iter().map(|c| c.trim()).collect();
                let missing_group = missing_columns(REQUIRED_COLUMNS_GROUP, &actual);
                if !missing_group.is_empty() {
                    report.add_error(format!("Missing required columns: {:?}", missing_group));
                }
                let missing_notice = missing_columns(REQUIRED_COLUMNS_NOTICE, &actual);
                if !missing_notice.is_empty() {
                    report.add_warning(format!(
                        "Missing notice columns, notice generation may fail: {:?}",
                        missing_notice
                    ));
                }
                if summary.total_records > 0 && summary.validated_records == 0 {
                    report.add_error("No valid OpenNegGroup values found");
                }
            }
            Err(e) => report.add_error(format!("Failed to read Excel file: {}", e)),
        }

        report
    }

    async fn validate_output_folder(&self, path: &Path, key: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Ok(metadata) = tokio::fs::metadata(path).await else {
            debug!(folder = key, path = %path.display(), "Output folder will be created");
            return report;
        };

        if metadata.permissions().readonly() {
            report.add_warning(format!(
                "Output folder {} may not be writable: {}",
                key,
                path.display()
            ));
        }

        let existing = count_files(path).await;
        if existing > 0 {
            report.add_warning(format!(
                "Output folder {} contains {} existing files",
                key, existing
            ));
        }
        report
    }
}

impl Default for ValidationStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageUnit for ValidationStage {
    fn name(&self) -> &str {
        "validator"
    }

    async fn execute(&self, mut task: Task) -> StageOutcome {
        if let Err(e) = task.mark_in_progress() {
            return StageOutcome::Fatal(task, e.to_string());
        }
        info!(task_id = %task.id, "Starting validation");

        let mut report = ValidationReport::default();

        match task.input_str("excel_path") {
            Some(excel) => report.absorb(self.validate_workbook(Path::new(excel)).await),
            None => report.add_error("Missing excel_path"),
        }

        if let Some(template) = task.input_str("template_docx") {
            let mut template_report = ValidationReport::default();
            check_file(
                Path::new(template),
                TEMPLATE_EXTENSIONS,
                "Template file",
                &mut template_report,
            )
            .await;
            report.absorb(template_report);
        }

        for key in OUTPUT_FOLDER_KEYS {
            if let Some(folder) = task.input_str(key) {
                let folder_report = self.validate_output_folder(Path::new(folder), key).await;
                report.warnings.extend(folder_report.warnings);
            }
        }

        let report_json = match serde_json::to_value(&report) {
            Ok(v) => v,
            Err(e) => return StageOutcome::Fatal(task, e.to_string()),
        };
        task.metadata.insert("validation_result".into(), report_json);

        if !report.warnings.is_empty() {
            warn!(task_id = %task.id, warnings = ?report.warnings, "Validation warnings");
        }

        let result = if report.is_valid {
            info!(
                task_id = %task.id,
                validated = report.validated_records,
                total = report.total_records,
                "Validation passed"
            );
            task.mark_completed(None)
        } else {
            error!(task_id = %task.id, errors = report.errors.len(), "Validation failed");
            task.mark_failed(report.errors.join("; "))
        };

        match result {
            Ok(()) => StageOutcome::Ok(task),
            Err(e) => StageOutcome::Fatal(task, e.to_string()),
        }
    }
}

/// Check existence and extension; returns true when the file is usable.
async fn check_file(
    path: &Path,
    extensions: &[&str],
    label: &str,
    report: &mut ValidationReport,
) -> bool {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        report.add_error(format!("{} not found: {}", label, path.display()));
        return false;
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !extensions.contains(&ext.as_str()) {
        let expected: Vec<String> = extensions.iter().map(|e| format!(".{e}")).collect();
        report.add_error(format!(
            "Invalid file format: {}. Expected {}",
            path.display(),
            expected.join(" or ")
        ));
        return false;
    }
    true
}

fn missing_columns(required: &[&'static str], actual: &BTreeSet<&str>) -> Vec<&'static str> {
    required
        .iter()
        .copied()
        .filter(|c| !actual.contains(c))
        .collect()
}

async fn count_files(path: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            count += 1;
        }
    }
    count
}

/// Parse the report a validation task stored.
pub(crate) fn report_from_task(task: &Task) -> Option<ValidationReport> {
    task.metadata
        .get("validation_result")
        .and_then(|v: &Value| ValidationReport::from_metadata(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    use opnflow_core::{TaskId, TaskStatus, TaskType};
    use serde_json::{json, Map};
    use tempfile::TempDir;

    struct FixedInspector(WorkbookSummary);

    #[async_trait]
    impl WorkbookInspector for FixedInspector {
        async fn inspect(&self, _path: &Path) -> Result<WorkbookSummary, String> {
            Ok(self.0.clone())
        }
    }

    fn task_with(input: Value) -> Task {
        let input: Map<String, Value> = serde_json::from_value(input).unwrap();
        Task::new(TaskId::new("val_1"), TaskType::Validation, input)
    }

    fn all_columns() -> Vec<String> {
        REQUIRED_COLUMNS_GROUP
            .iter()
            .chain(REQUIRED_COLUMNS_NOTICE)
            .map(|c| c.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_missing_workbook_fails() {
        let stage = ValidationStage::new();
        let task = task_with(json!({"excel_path": "/nonexistent/claims.xlsx"}));
        let result = stage.execute(task).await.into_task();

        assert_eq!(result.status(), TaskStatus::Failed);
        assert!(result.error_message().unwrap().contains("Excel file not found"));
    }

    #[tokio::test]
    async fn test_wrong_extension_fails() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("claims.csv");
        std::fs::write(&csv, "a,b").unwrap();

        let stage = ValidationStage::new();
        let task = task_with(json!({"excel_path": csv.display().to_string()}));
        let result = stage.execute(task).await.into_task();

        assert_eq!(result.status(), TaskStatus::Failed);
        assert!(result.error_message().unwrap().contains("Invalid file format"));
    }

    #[tokio::test]
    async fn test_missing_columns_fail_and_quality_warnings_pass() {
        let dir = TempDir::new().unwrap();
        let excel = dir.path().join("CEP W6.xlsx");
        std::fs::write(&excel, b"stub").unwrap();

        let missing = FixedInspector(WorkbookSummary {
            columns: vec!["ProvOrgNPI".into()],
            total_records: 4,
            validated_records: 4,
            warnings: vec![],
        });
        let stage = ValidationStage::new().with_inspector(Arc::new(missing));
        let task = task_with(json!({"excel_path": excel.display().to_string()}));
        let result = stage.execute(task).await.into_task();
        assert_eq!(result.status(), TaskStatus::Failed);
        assert!(result.error_message().unwrap().contains("Missing required columns"));

        let good = FixedInspector(WorkbookSummary {
            columns: all_columns(),
            total_records: 4,
            validated_records: 3,
            warnings: vec!["1 rows with missing ProvOrgNPI".into()],
        });
        let stage = ValidationStage::new().with_inspector(Arc::new(good));
        let task = task_with(json!({"excel_path": excel.display().to_string()}));
        let result = stage.execute(task).await.into_task();
        assert_eq!(result.status(), TaskStatus::Completed);

        let report = report_from_task(&result).unwrap();
        assert_eq!(report.total_records, 4);
        assert_eq!(report.validated_records, 3);
        assert_eq!(report.warnings, vec!["1 rows with missing ProvOrgNPI"]);
    }

    #[tokio::test]
    async fn test_existing_output_files_warn() {
        let dir = TempDir::new().unwrap();
        let excel = dir.path().join("claims.xlsx");
        std::fs::write(&excel, b"stub").unwrap();
        let groups = dir.path().join("groups");
        std::fs::create_dir(&groups).unwrap();
        std::fs::write(groups.join("old.xlsx"), b"old").unwrap();

        let stage = ValidationStage::new();
        let task = task_with(json!({
            "excel_path": excel.display().to_string(),
            "output_group_folder": groups.display().to_string(),
        }));
        let result = stage.execute(task).await.into_task();

        assert_eq!(result.status(), TaskStatus::Completed);
        let report = report_from_task(&result).unwrap();
        assert_eq!(
            report.warnings,
            vec!["Output folder output_group_folder contains 1 existing files"]
        );
    }
}
