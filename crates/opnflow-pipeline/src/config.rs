//! Pipeline configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

/// Default folder for grouped claim spreadsheets.
pub const DEFAULT_GROUP_FOLDER: &str = "output/groups";
/// Default folder for notice documents.
pub const DEFAULT_NOTICE_FOLDER: &str = "output/notices";
/// Default folder for the merged tree.
pub const DEFAULT_MERGED_FOLDER: &str = "output/merged";

/// Exponential backoff between stage retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Factor applied to the delay for each further retry.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry_count` (1-based, post-increment).
    ///
    /// `base_delay * multiplier^(retry_count - 1)`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

/// Settings for the pipeline server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub bind_addr: String,

    /// Renderer command for group spreadsheets.
    pub group_renderer: String,
    pub group_renderer_args: Vec<String>,

    /// Renderer command for notice documents.
    pub notice_renderer: String,
    pub notice_renderer_args: Vec<String>,

    /// Backoff between generation retries.
    pub backoff: BackoffPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            group_renderer: "opnflow-render-groups".to_string(),
            group_renderer_args: Vec::new(),
            notice_renderer: "opnflow-render-notices".to_string(),
            notice_renderer_args: Vec::new(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Configuration for one pipeline run, as sent by the caller.
///
/// Output folders left out fall back to `output/{groups,notices,merged}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Claim workbook; required.
    #[serde(default)]
    pub excel_path: Option<PathBuf>,

    /// Notice template.
    #[serde(default)]
    pub template_docx: Option<PathBuf>,

    #[serde(default)]
    pub output_group_folder: Option<PathBuf>,

    #[serde(default)]
    pub output_notice_folder: Option<PathBuf>,

    #[serde(default)]
    pub merged_output_folder: Option<PathBuf>,

    /// Run both generation units concurrently.
    #[serde(default = "default_parallel")]
    pub enable_parallel_processing: bool,

    /// Attempt budget for each generation unit.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_parallel() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            excel_path: None,
            template_docx: None,
            output_group_folder: None,
            output_notice_folder: None,
            merged_output_folder: None,
            enable_parallel_processing: default_parallel(),
            max_retries: default_max_retries(),
        }
    }
}

impl PipelineConfig {
    /// Create a config for the given workbook with default folders.
    pub fn new(excel_path: impl Into<PathBuf>) -> Self {
        Self {
            excel_path: Some(excel_path.into()),
            ..Default::default()
        }
    }

    /// Check preconditions once, before any stage runs.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let has_excel = self
            .excel_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if !has_excel {
            return Err(PipelineError::MissingConfig(vec!["excel_path"]));
        }
        if self.max_retries == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn group_folder(&self) -> PathBuf {
        folder_or(&self.output_group_folder, DEFAULT_GROUP_FOLDER)
    }

    pub fn notice_folder(&self) -> PathBuf {
        folder_or(&self.output_notice_folder, DEFAULT_NOTICE_FOLDER)
    }

    pub fn merged_folder(&self) -> PathBuf {
        folder_or(&self.merged_output_folder, DEFAULT_MERGED_FOLDER)
    }

    /// Fill unset output folders from paths derived off the workbook name.
    pub fn with_derived_outputs(mut self) -> Self {
        if self.merged_output_folder.is_some() {
            return self;
        }
        if let Some(excel) = &self.excel_path {
            let derived = derive_output_paths(excel);
            self.output_group_folder.get_or_insert(derived.group);
            self.output_notice_folder.get_or_insert(derived.notice);
            self.merged_output_folder = Some(derived.merged);
        }
        self
    }

    /// Task input payload handed to every stage, with defaults applied.
    pub fn to_task_input(&self) -> Map<String, Value> {
        let mut input = Map::new();
        let mut put = |key: &str, path: &Path| {
            input.insert(key.to_string(), Value::String(path.display().to_string()));
        };
        if let Some(excel) = &self.excel_path {
            put("excel_path", excel);
        }
        if let Some(template) = &self.template_docx {
            put("template_docx", template);
        }
        put("output_group_folder", &self.group_folder());
        put("output_notice_folder", &self.notice_folder());
        put("merged_output_folder", &self.merged_folder());
        input
    }
}

fn folder_or(value: &Option<PathBuf>, default: &str) -> PathBuf {
    match value {
        Some(p) if !p.as_os_str().is_empty() => p.clone(),
        _ => PathBuf::from(default),
    }
}

/// Output folders derived from a workbook path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub group: PathBuf,
    pub notice: PathBuf,
    pub merged: PathBuf,
}

/// Derive output folders from the workbook name.
///
/// `Data/Input/CEP W6 OPNNEG TEMPLATE.xlsx` gives
/// `Data/Output/CEP W6/CEP W6 OPN GROUP` and its notice/merged siblings.
pub fn derive_output_paths(excel_path: &Path) -> OutputPaths {
    let stem = excel_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let words: Vec<&str> = stem.split_whitespace().collect();
    let prefix = if words.len() >= 2 {
        format!("{} {}", words[0], words[1])
    } else {
        stem.clone()
    };

    let data_dir = excel_path
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new(""));
    let base = data_dir.join("Output").join(&prefix);

    OutputPaths {
        group: base.join(format!("{prefix} OPN GROUP")),
        notice: base.join(format!("{prefix} OPN NOTICE")),
        merged: base.join(format!("{prefix} OPN GROUP & NOTICE")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 10.0,
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_missing_excel_path_rejected() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::MissingConfig(keys)) if keys == vec!["excel_path"]
        ));
    }

    #[test]
    fn test_default_output_folders() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"excel_path": "claims.xlsx"}"#).unwrap();
        config.validate().unwrap();
        assert!(config.enable_parallel_processing);
        assert_eq!(config.max_retries, 3);

        let input = config.to_task_input();
        assert_eq!(input["output_group_folder"], "output/groups");
        assert_eq!(input["output_notice_folder"], "output/notices");
        assert_eq!(input["merged_output_folder"], "output/merged");
        assert!(input.get("template_docx").is_none());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = PipelineConfig::new("claims.xlsx");
        config.max_retries = 0;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_derive_output_paths() {
        let paths = derive_output_paths(Path::new("Data/Input/CEP W6 OPNNEG TEMPLATE.xlsx"));
        assert_eq!(paths.group, PathBuf::from("Data/Output/CEP W6/CEP W6 OPN GROUP"));
        assert_eq!(paths.notice, PathBuf::from("Data/Output/CEP W6/CEP W6 OPN NOTICE"));
        assert_eq!(
            paths.merged,
            PathBuf::from("Data/Output/CEP W6/CEP W6 OPN GROUP & NOTICE")
        );
    }

    #[test]
    fn test_derived_outputs_keep_explicit_folders() {
        let mut config = PipelineConfig::new("Data/Input/CEP W6.xlsx");
        config.output_group_folder = Some(PathBuf::from("custom/groups"));
        let config = config.with_derived_outputs();

        assert_eq!(config.group_folder(), PathBuf::from("custom/groups"));
        assert_eq!(
            config.merged_folder(),
            PathBuf::from("Data/Output/CEP W6/CEP W6 OPN GROUP & NOTICE")
        );
    }
}
