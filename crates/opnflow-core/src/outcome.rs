//! Validation report and pipeline outcome.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::stats::round2;
use crate::Statistics;

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Success,
    PartialFailure,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Result of the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub validated_records: u64,
    #[serde(default)]
    pub total_records: u64,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            validated_records: 0,
            total_records: 0,
        }
    }
}

impl ValidationReport {
    /// Add a blocking error.
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.is_valid = false;
    }

    /// Add a non-blocking warning.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Fold another report into this one.
    pub fn absorb(&mut self, other: ValidationReport) {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.validated_records += other.validated_records;
        self.total_records += other.total_records;
    }

    /// Parse the report a validation stage stored in task metadata.
    pub fn from_metadata(value: &Value) -> Option<ValidationReport> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Outcome of one pipeline run.
///
/// Created when the run starts and finalized exactly once: later calls to
/// [`PipelineOutcome::finalize`] are ignored.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: Option<PipelineStatus>,
    pub output_folder: Option<String>,
    pub stats: Option<Statistics>,
    pub validation: Option<ValidationReport>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Default for PipelineOutcome {
    fn default() -> Self {
        Self::start()
    }
}

impl PipelineOutcome {
    /// Begin a new outcome, stamping the start time.
    pub fn start() -> Self {
        Self {
            status: None,
            output_folder: None,
            stats: None,
            validation: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Set the final status. Returns false if the outcome was already final.
    pub fn finalize(&mut self, status: PipelineStatus) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.status = Some(status);
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn is_final(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Final status; an unfinalized outcome reports `FAILED`.
    pub fn final_status(&self) -> PipelineStatus {
        self.status.unwrap_or(PipelineStatus::Failed)
    }

    /// Wall-clock duration, zero until finalized.
    pub fn duration_seconds(&self) -> f64 {
        match self.completed_at {
            Some(done) => (done - self.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            None => 0.0,
        }
    }
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    status: PipelineStatus,
    output_folder: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<&'a ValidationReport>,
    errors: &'a [String],
    warnings: &'a [String],
    duration_seconds: f64,
}

impl Serialize for PipelineOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OutcomeView {
            status: self.final_status(),
            output_folder: self.output_folder.as_deref(),
            stats: self.stats.as_ref().map(Statistics::summary),
            validation: self.validation.as_ref(),
            errors: &self.errors,
            warnings: &self.warnings,
            duration_seconds: round2(self.duration_seconds()),
        }
        .serialize(serializer)
    }
}
