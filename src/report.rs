use crate::checker::OsType;
use crate::config::ReportSettings;
use crate::result::{CheckResult, Summary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to create report directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report payload: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {format} report to {path}: {source}")]
    Write {
        format: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a report carries for one host. The renderers are pure
/// functions of this payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub host: String,
    pub os_type: OsType,
    pub timestamp: DateTime<Utc>,
    pub summary: Summary,
    pub results: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub report_files: BTreeMap<String, PathBuf>,
}

/// Batch wrapper over several hosts' payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub timestamp: DateTime<Utc>,
    pub total_hosts: usize,
    pub reports: Vec<ReportPayload>,
}

/// Renders check results into the configured formats without mutating the
/// underlying results.
pub struct ReportGenerator {
    output_dir: PathBuf,
    formats: Vec<String>,
    include_raw_output: bool,
}

impl ReportGenerator {
    pub fn new(settings: &ReportSettings) -> Result<Self, ReportError> {
        fs::create_dir_all(&settings.output_dir).map_err(|source| ReportError::CreateDir {
            path: settings.output_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            output_dir: settings.output_dir.clone(),
            formats: settings.formats.clone(),
            include_raw_output: settings.include_raw_output,
        })
    }

    /// Write one report per configured format. Unsupported formats are
    /// skipped with a warning; a failing format is skipped after logging and
    /// the first failure is returned once the remaining formats have run.
    pub fn generate_report(
        &self,
        host: &str,
        os_type: OsType,
        results: &[CheckResult],
        summary: &Summary,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<String, PathBuf>, ReportError> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let payload = ReportPayload {
            host: host.to_string(),
            os_type,
            timestamp,
            summary: *summary,
            results: self.prepare_results(results),
            error: None,
            report_files: BTreeMap::new(),
        };

        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        let mut generated = BTreeMap::new();
        let mut first_failure = None;

        for format in &self.formats {
            let format = format.to_lowercase();
            let (extension, content) = match format.as_str() {
                "json" => {
                    let text = serde_json::to_string_pretty(&payload)
                        .map_err(|source| ReportError::Serialize { source })?;
                    ("json", text)
                }
                "html" => ("html", render_html(&payload)),
                "text" => ("txt", render_text(&payload)),
                other => {
                    warn!(format = other, "unsupported report format");
                    continue;
                }
            };

            let path = self
                .output_dir
                .join(format!("{host}_{stamp}_health_check.{extension}"));
            match fs::write(&path, content) {
                Ok(()) => {
                    info!(format = %format, path = %path.display(), "report generated");
                    generated.insert(format, path);
                }
                Err(source) => {
                    let err = ReportError::Write {
                        format: format.clone(),
                        path: path.display().to_string(),
                        source,
                    };
                    error!(error = %err, "failed to generate report");
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(generated),
        }
    }

    /// Wrap several hosts' payloads into one JSON document.
    pub fn generate_batch_report(&self, reports: &[ReportPayload]) -> Result<PathBuf, ReportError> {
        let timestamp = Utc::now();
        let batch = BatchReport {
            timestamp,
            total_hosts: reports.len(),
            reports: reports.to_vec(),
        };

        let path = self.output_dir.join(format!(
            "batch_report_{}.json",
            timestamp.format("%Y%m%d_%H%M%S")
        ));
        let text = serde_json::to_string_pretty(&batch)
            .map_err(|source| ReportError::Serialize { source })?;
        fs::write(&path, text).map_err(|source| ReportError::Write {
            format: "json".to_string(),
            path: path.display().to_string(),
            source,
        })?;

        info!(path = %path.display(), total_hosts = batch.total_hosts, "batch report generated");
        Ok(path)
    }

    fn prepare_results(&self, results: &[CheckResult]) -> Vec<CheckResult> {
        results
            .iter()
            .cloned()
            .map(|mut result| {
                if !self.include_raw_output {
                    result.raw_output = None;
                }
                result
            })
            .collect()
    }
}

const STATUS_COLORS: &[(&str, &str)] = &[
    ("PASS", "#28a745"),
    ("FAIL", "#dc3545"),
    ("WARN", "#ffc107"),
    ("SKIP", "#6c757d"),
];

fn status_color(status: &str) -> &'static str {
    STATUS_COLORS
        .iter()
        .find(|(name, _)| *name == status)
        .map(|(_, color)| *color)
        .unwrap_or("#6c757d")
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Pure HTML rendering of a report payload.
pub fn render_html(payload: &ReportPayload) -> String {
    let overall = payload.summary.overall_status.to_string();
    let mut html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Health Check Report - {host}</title>
<style>
body {{ font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }}
.container {{ max-width: 1200px; margin: 0 auto; background-color: white; padding: 20px; border-radius: 8px; }}
.header {{ text-align: center; margin-bottom: 30px; padding-bottom: 20px; border-bottom: 2px solid #eee; }}
.status-badge {{ display: inline-block; padding: 10px 20px; border-radius: 5px; color: white; font-weight: bold; background-color: {badge_color}; }}
.summary {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(160px, 1fr)); gap: 15px; margin-bottom: 30px; }}
.summary-item {{ background-color: #f8f9fa; padding: 15px; border-radius: 5px; text-align: center; }}
.summary-item .value {{ font-size: 24px; font-weight: bold; color: #007bff; }}
.result-item {{ margin-bottom: 20px; border: 1px solid #ddd; border-radius: 5px; overflow: hidden; }}
.result-header {{ padding: 15px; font-weight: bold; display: flex; justify-content: space-between; }}
.status-pass {{ background-color: #d4edda; color: #155724; }}
.status-fail {{ background-color: #f8d7da; color: #721c24; }}
.status-warn {{ background-color: #fff3cd; color: #856404; }}
.status-skip {{ background-color: #e2e3e5; color: #383d41; }}
.result-details {{ padding: 15px; background-color: #f8f9fa; }}
.raw-output {{ margin-top: 10px; padding: 10px; background-color: #f1f3f4; border-radius: 3px; font-family: monospace; font-size: 12px; white-space: pre-wrap; max-height: 200px; overflow-y: auto; }}
.footer {{ margin-top: 30px; padding-top: 20px; border-top: 1px solid #eee; text-align: center; color: #6c757d; }}
</style>
</head>
<body>
<div class="container">
<div class="header">
<h1>Health Check Report</h1>
<p><strong>Host:</strong> {host} | <strong>OS:</strong> {os_type} | <strong>Time:</strong> {timestamp}</p>
<div class="status-badge">Overall Status: {overall}</div>
</div>
<div class="summary">
<div class="summary-item"><h3>Total Checks</h3><div class="value">{total}</div></div>
<div class="summary-item"><h3>Passed</h3><div class="value">{passed}</div></div>
<div class="summary-item"><h3>Failed</h3><div class="value">{failed}</div></div>
<div class="summary-item"><h3>Warnings</h3><div class="value">{warning}</div></div>
<div class="summary-item"><h3>Skipped</h3><div class="value">{skipped}</div></div>
</div>
<div class="results">
<h2>Check Results</h2>
"#,
        host = html_escape(&payload.host),
        badge_color = status_color(&overall),
        os_type = payload.os_type,
        timestamp = payload.timestamp.to_rfc3339(),
        overall = overall,
        total = payload.summary.total,
        passed = payload.summary.passed,
        failed = payload.summary.failed,
        warning = payload.summary.warning,
        skipped = payload.summary.skipped,
    );

    for result in &payload.results {
        let status = result.status.to_string();
        let _ = write!(
            html,
            r#"<div class="result-item">
<div class="result-header status-{status_class}"><span>{name}</span><span>{status}</span></div>
<div class="result-details">
<p><strong>Message:</strong> {message}</p>
<p><strong>Timestamp:</strong> {timestamp}</p>
"#,
            status_class = status.to_lowercase(),
            name = html_escape(&result.name),
            status = status,
            message = html_escape(&result.message),
            timestamp = result.timestamp.to_rfc3339(),
        );

        if let Value::Object(details) = &result.details {
            if !details.is_empty() {
                html.push_str("<h4>Details:</h4><ul>\n");
                for (key, value) in details {
                    let _ = write!(
                        html,
                        "<li><strong>{}:</strong> {}</li>\n",
                        html_escape(key),
                        html_escape(&value.to_string())
                    );
                }
                html.push_str("</ul>\n");
            }
        }

        if let Some(raw) = &result.raw_output {
            let _ = write!(html, "<div class=\"raw-output\">{}</div>\n", html_escape(raw));
        }

        html.push_str("</div></div>\n");
    }

    html.push_str(
        "</div>\n<div class=\"footer\"><p>Generated by fleetcheck</p></div>\n</div>\n</body>\n</html>\n",
    );
    html
}

/// Pure plain-text rendering of a report payload.
pub fn render_text(payload: &ReportPayload) -> String {
    let mut text = format!(
        "HEALTH CHECK REPORT\n\
         ===================\n\n\
         Host: {}\n\
         OS Type: {}\n\
         Timestamp: {}\n\
         Overall Status: {}\n\n\
         SUMMARY\n\
         -------\n\
         Total Checks: {}\n\
         Passed: {}\n\
         Failed: {}\n\
         Warnings: {}\n\
         Skipped: {}\n\n\
         CHECK RESULTS\n\
         -------------\n",
        payload.host,
        payload.os_type,
        payload.timestamp.to_rfc3339(),
        payload.summary.overall_status,
        payload.summary.total,
        payload.summary.passed,
        payload.summary.failed,
        payload.summary.warning,
        payload.summary.skipped,
    );

    for result in &payload.results {
        let _ = write!(
            text,
            "\n{}\n{}\nStatus: {}\nMessage: {}\nTimestamp: {}\n",
            result.name.to_uppercase(),
            "-".repeat(result.name.len()),
            result.status,
            result.message,
            result.timestamp.to_rfc3339(),
        );

        if let Value::Object(details) = &result.details {
            if !details.is_empty() {
                text.push_str("Details:\n");
                for (key, value) in details {
                    let _ = writeln!(text, "  {key}: {value}");
                }
            }
        }

        if let Some(raw) = &result.raw_output {
            let _ = write!(text, "Raw Output:\n{raw}\n");
        }
    }

    text.push_str("\nGenerated by fleetcheck\n");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CheckStatus;
    use serde_json::json;

    fn sample_results() -> Vec<CheckResult> {
        vec![
            CheckResult::new("disk_usage", CheckStatus::Pass, "0 filesystem(s) above 90%")
                .with_details(json!({"warning_count": 0}))
                .with_raw_output("Filesystem Size Used Avail Use% Mounted on"),
            CheckResult::new("memory", CheckStatus::Warn, "Memory usage: 93%")
                .with_details(json!({"usage_percent": 93}))
                .with_raw_output("Mem: 16000 14880 ..."),
        ]
    }

    fn settings(dir: &std::path::Path, formats: &[&str], include_raw: bool) -> ReportSettings {
        ReportSettings {
            output_dir: dir.to_path_buf(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            include_raw_output: include_raw,
        }
    }

    #[test]
    fn json_report_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator =
            ReportGenerator::new(&settings(dir.path(), &["json"], true)).expect("generator");
        let results = sample_results();
        let summary = Summary::of(&results);

        let files = generator
            .generate_report("web01", OsType::Linux, &results, &summary, None)
            .expect("generate");
        let path = files.get("json").expect("json path");

        let text = fs::read_to_string(path).expect("read back");
        let payload: ReportPayload = serde_json::from_str(&text).expect("parse");
        assert_eq!(payload.host, "web01");
        assert_eq!(payload.os_type, OsType::Linux);
        assert_eq!(payload.summary, summary);
        let names: Vec<&str> = payload.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["disk_usage", "memory"]);
        assert!(payload.results[0].raw_output.is_some());
    }

    #[test]
    fn raw_output_is_stripped_when_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator =
            ReportGenerator::new(&settings(dir.path(), &["json"], false)).expect("generator");
        let results = sample_results();
        let summary = Summary::of(&results);

        let files = generator
            .generate_report("web01", OsType::Linux, &results, &summary, None)
            .expect("generate");

        let text = fs::read_to_string(files.get("json").expect("path")).expect("read back");
        let value: Value = serde_json::from_str(&text).expect("parse");
        for result in value["results"].as_array().expect("results array") {
            assert!(result.get("raw_output").is_none());
        }
        // In-memory results are untouched.
        assert!(results[0].raw_output.is_some());
    }

    #[test]
    fn unsupported_format_is_skipped_with_no_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator =
            ReportGenerator::new(&settings(dir.path(), &["json", "xml"], false)).expect("generator");
        let results = sample_results();
        let summary = Summary::of(&results);

        let files = generator
            .generate_report("web01", OsType::Linux, &results, &summary, None)
            .expect("generate");
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("json"));
    }

    #[test]
    fn write_failure_names_the_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator =
            ReportGenerator::new(&settings(dir.path(), &["json", "html"], false)).expect("generator");
        let results = sample_results();
        let summary = Summary::of(&results);

        fs::remove_dir_all(dir.path()).expect("remove dir");
        let err = generator
            .generate_report("web01", OsType::Linux, &results, &summary, None)
            .expect_err("must fail");
        assert!(matches!(err, ReportError::Write { ref format, .. } if format == "json"));
    }

    #[test]
    fn all_three_formats_are_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = ReportGenerator::new(&settings(dir.path(), &["json", "html", "text"], true))
            .expect("generator");
        let results = sample_results();
        let summary = Summary::of(&results);

        let files = generator
            .generate_report("aix01", OsType::Aix, &results, &summary, None)
            .expect("generate");
        assert_eq!(files.len(), 3);
        for path in files.values() {
            assert!(path.exists());
        }
    }

    #[test]
    fn batch_report_wraps_all_hosts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator =
            ReportGenerator::new(&settings(dir.path(), &["json"], false)).expect("generator");
        let results = sample_results();
        let summary = Summary::of(&results);
        let payload = ReportPayload {
            host: "web01".to_string(),
            os_type: OsType::Linux,
            timestamp: Utc::now(),
            summary,
            results,
            error: None,
            report_files: BTreeMap::new(),
        };

        let path = generator
            .generate_batch_report(&[payload.clone(), payload])
            .expect("batch");
        let text = fs::read_to_string(path).expect("read back");
        let batch: BatchReport = serde_json::from_str(&text).expect("parse");
        assert_eq!(batch.total_hosts, 2);
        assert_eq!(batch.reports.len(), 2);
        assert_eq!(batch.reports[0].host, "web01");
    }

    #[test]
    fn html_renderer_is_pure_and_escapes() {
        let results = vec![CheckResult::new(
            "services",
            CheckStatus::Fail,
            "Found <2> failed service(s)",
        )];
        let payload = ReportPayload {
            host: "web01".to_string(),
            os_type: OsType::Linux,
            timestamp: Utc::now(),
            summary: Summary::of(&results),
            results,
            error: None,
            report_files: BTreeMap::new(),
        };

        let html = render_html(&payload);
        assert!(html.contains("Health Check Report"));
        assert!(html.contains("web01"));
        assert!(html.contains("Found &lt;2&gt; failed service(s)"));
        assert!(html.contains("status-fail"));
    }

    #[test]
    fn text_renderer_lists_every_check() {
        let results = sample_results();
        let payload = ReportPayload {
            host: "aix01".to_string(),
            os_type: OsType::Aix,
            timestamp: Utc::now(),
            summary: Summary::of(&results),
            results,
            error: None,
            report_files: BTreeMap::new(),
        };

        let text = render_text(&payload);
        assert!(text.contains("HEALTH CHECK REPORT"));
        assert!(text.contains("DISK_USAGE"));
        assert!(text.contains("MEMORY"));
        assert!(text.contains("Overall Status: PASS"));
        assert!(text.contains("Raw Output:"));
    }
}
