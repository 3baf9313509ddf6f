use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
            CheckStatus::Skip => "SKIP",
        };
        f.write_str(s)
    }
}

/// One evaluated check. Created by a checker right after parsing a command's
/// output and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default = "empty_details")]
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn empty_details() -> Value {
    Value::Object(serde_json::Map::new())
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            details: empty_details(),
            raw_output: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = Some(raw_output.into());
        self
    }
}

/// Aggregate over one host's results, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warning: usize,
    pub skipped: usize,
    pub overall_status: CheckStatus,
}

impl Summary {
    pub fn of(results: &[CheckResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let failed = count(CheckStatus::Fail);
        Self {
            total: results.len(),
            passed: count(CheckStatus::Pass),
            failed,
            warning: count(CheckStatus::Warn),
            skipped: count(CheckStatus::Skip),
            overall_status: if failed > 0 {
                CheckStatus::Fail
            } else {
                CheckStatus::Pass
            },
        }
    }

    /// Placeholder summary for a host whose run never produced results,
    /// e.g. because the connection could not be established.
    pub fn failed_run() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 1,
            warning: 0,
            skipped: 0,
            overall_status: CheckStatus::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_counts_by_status() {
        let results = vec![
            CheckResult::new("disk_usage", CheckStatus::Pass, "ok"),
            CheckResult::new("memory", CheckStatus::Warn, "high"),
            CheckResult::new("services", CheckStatus::Fail, "2 failed"),
            CheckResult::new("network", CheckStatus::Pass, "ok"),
        ];

        let summary = Summary::of(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.warning, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.overall_status, CheckStatus::Fail);
    }

    #[test]
    fn summary_without_failures_is_pass() {
        let results = vec![
            CheckResult::new("disk_usage", CheckStatus::Pass, "ok"),
            CheckResult::new("memory", CheckStatus::Warn, "high"),
        ];

        let summary = Summary::of(&results);
        assert_eq!(summary.overall_status, CheckStatus::Pass);
    }

    #[test]
    fn summary_of_empty_slice_is_zeroed() {
        let summary = Summary::of(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.overall_status, CheckStatus::Pass);
    }

    #[test]
    fn status_serializes_upper_case() {
        let result = CheckResult::new("memory", CheckStatus::Warn, "high")
            .with_details(json!({"usage_percent": 93}));
        let encoded = serde_json::to_value(&result).expect("serialize");

        assert_eq!(encoded["status"], "WARN");
        assert_eq!(encoded["details"]["usage_percent"], 93);
        assert!(encoded.get("raw_output").is_none());
    }

    #[test]
    fn raw_output_round_trips_when_present() {
        let result = CheckResult::new("cpu_load", CheckStatus::Pass, "ok")
            .with_raw_output("load average: 0.10, 0.20, 0.30");
        let text = serde_json::to_string(&result).expect("serialize");
        let back: CheckResult = serde_json::from_str(&text).expect("deserialize");

        assert_eq!(back.raw_output.as_deref(), Some("load average: 0.10, 0.20, 0.30"));
        assert_eq!(back.status, CheckStatus::Pass);
    }
}
