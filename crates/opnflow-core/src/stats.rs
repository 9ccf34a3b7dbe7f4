//! Mergeable per-stage statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Counters produced by one stage.
///
/// Sibling outcomes combine with [`Statistics::merge`]: counts and durations
/// add (saturating), lists concatenate. The merge is associative and
/// commutative on the counts, so aggregation order across parallel stages
/// never changes the totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_records: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub output_files: Vec<String>,
    pub errors: Vec<String>,
}

impl Statistics {
    /// Record a successful record, optionally with the artifact it produced.
    pub fn add_success(&mut self, artifact: Option<String>) {
        self.successful = self.successful.saturating_add(1);
        if let Some(path) = artifact {
            self.output_files.push(path);
        }
    }

    /// Record a failed record.
    pub fn add_failure(&mut self, error: impl Into<String>) {
        self.failed = self.failed.saturating_add(1);
        self.errors.push(error.into());
    }

    /// Record a skipped record.
    pub fn add_skipped(&mut self) {
        self.skipped = self.skipped.saturating_add(1);
    }

    /// Success rate as a percentage; 0 when there was nothing to do.
    pub fn success_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_records as f64 * 100.0
    }

    /// True when nothing failed and nothing was skipped.
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// True when there was work and none of it succeeded.
    pub fn all_failed(&self) -> bool {
        self.total_records > 0 && self.successful == 0
    }

    /// Combine with a sibling outcome.
    pub fn merge(mut self, other: Statistics) -> Statistics {
        self.total_records = self.total_records.saturating_add(other.total_records);
        self.successful = self.successful.saturating_add(other.successful);
        self.failed = self.failed.saturating_add(other.failed);
        self.skipped = self.skipped.saturating_add(other.skipped);
        self.duration = self.duration.saturating_add(other.duration);
        self.output_files.extend(other.output_files);
        self.errors.extend(other.errors);
        self
    }

    /// Map stored in `Task::metadata["stats"]`.
    ///
    /// Keeps the full artifact list so the map can be read back losslessly.
    pub fn to_metadata(&self) -> Value {
        json!({
            "total_records": self.total_records,
            "successful": self.successful,
            "failed": self.failed,
            "skipped": self.skipped,
            "duration_seconds": self.duration.as_secs_f64(),
            "output_files": self.output_files,
            "errors": self.errors,
        })
    }

    /// Read a Statistics-shaped map; missing or mistyped fields count as zero.
    pub fn from_metadata(value: &Value) -> Statistics {
        let count = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
                .unwrap_or(0)
        };
        let strings = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default()
        };
        let seconds = value
            .get("duration_seconds")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or(0.0);

        Statistics {
            total_records: count("total_records"),
            successful: count("successful"),
            failed: count("failed"),
            skipped: count("skipped"),
            duration: secs_to_duration(seconds),
            output_files: strings("output_files"),
            errors: strings("errors"),
        }
    }

    /// Summary shape returned to callers.
    pub fn summary(&self) -> Value {
        json!({
            "total_records": self.total_records,
            "successful": self.successful,
            "failed": self.failed,
            "skipped": self.skipped,
            "success_rate": round2(self.success_rate()),
            "duration_seconds": round2(self.duration.as_secs_f64()),
            "output_files_count": self.output_files.len(),
            "errors": self.errors,
        })
    }
}

/// Clamps values too large for a `Duration` to `Duration::MAX`.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(super::secs_to_duration(secs))
    }
}
