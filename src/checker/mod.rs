pub mod aix;
pub mod linux;

use crate::config::CommandMap;
use crate::connector::{CommandChannel, CommandOutput};
use crate::result::{CheckResult, CheckStatus, Summary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

pub use aix::AixProfile;
pub use linux::LinuxProfile;

/// OS family a checker profile supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Aix,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsType::Linux => f.write_str("linux"),
            OsType::Aix => f.write_str("aix"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("remote connection is not active")]
    ConnectionDown,
    #[error("empty command for check: {name}")]
    EmptyCommand { name: String },
}

/// Per-OS parsing rules. The channel is passed in for ancillary lookups
/// (e.g. the cpu count behind the load-average check).
pub trait CheckProfile {
    fn os_type(&self) -> OsType;
    fn default_commands(&self) -> CommandMap;
    fn parse_result(
        &self,
        channel: &dyn CommandChannel,
        name: &str,
        output: &CommandOutput,
    ) -> CheckResult;
}

/// Owns the check catalog for one host and turns each command's output into
/// a [`CheckResult`]. A single check failing never aborts the run.
pub struct CheckerEngine<'a> {
    channel: &'a dyn CommandChannel,
    profile: Box<dyn CheckProfile>,
    commands: CommandMap,
    results: Vec<CheckResult>,
}

impl<'a> CheckerEngine<'a> {
    /// The profile is selected from the `os_type` tag; an empty command map
    /// falls back to the profile defaults.
    pub fn new(channel: &'a dyn CommandChannel, os_type: OsType, commands: CommandMap) -> Self {
        let profile: Box<dyn CheckProfile> = match os_type {
            OsType::Linux => Box::new(LinuxProfile),
            OsType::Aix => Box::new(AixProfile),
        };
        let commands = if commands.is_empty() {
            profile.default_commands()
        } else {
            commands
        };
        Self {
            channel,
            profile,
            commands,
            results: Vec::new(),
        }
    }

    pub fn os_type(&self) -> OsType {
        self.profile.os_type()
    }

    pub fn commands(&self) -> &CommandMap {
        &self.commands
    }

    pub fn validate_prerequisites(&self) -> Result<(), ValidationError> {
        if !self.channel.test_connection() {
            return Err(ValidationError::ConnectionDown);
        }
        for (name, command) in self.commands.iter() {
            if command.trim().is_empty() {
                return Err(ValidationError::EmptyCommand {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run one check; execution errors are folded into a FAIL result.
    pub fn execute_check(&self, name: &str, command: &str) -> CheckResult {
        info!(check = name, "executing check");
        match self.channel.execute(command, None) {
            Ok(output) => {
                let result = self.profile.parse_result(self.channel, name, &output);
                info!(check = name, status = %result.status, "check completed");
                result
            }
            Err(err) => {
                error!(check = name, error = %err, "check execution failed");
                CheckResult::new(name, CheckStatus::Fail, format!("Error executing check: {err}"))
                    .with_details(json!({
                        "error": err.to_string(),
                        "command": command,
                    }))
            }
        }
    }

    /// Validate prerequisites, then run every configured check in catalog
    /// order. A prerequisite failure yields a single synthetic result.
    pub fn run_all_checks(&mut self) -> &[CheckResult] {
        self.results.clear();

        if let Err(err) = self.validate_prerequisites() {
            error!(error = %err, "prerequisites validation failed");
            self.results.push(CheckResult::new(
                "prerequisites",
                CheckStatus::Fail,
                format!("Prerequisites validation failed: {err}"),
            ));
            return &self.results;
        }

        if self.commands.is_empty() {
            warn!("no commands configured for checks");
            return &self.results;
        }

        let checks: Vec<(String, String)> = self
            .commands
            .iter()
            .map(|(name, command)| (name.to_string(), command.to_string()))
            .collect();
        for (name, command) in checks {
            let result = self.execute_check(&name, &command);
            self.results.push(result);
        }
        &self.results
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.results)
    }
}

/// Fallback for check names without a dedicated parser: verdict keyed purely
/// on the exit code.
pub(crate) fn generic_result(name: &str, output: &CommandOutput) -> CheckResult {
    let status = if output.exit_code == 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    CheckResult::new(
        name,
        status,
        format!("Command executed with exit code {}", output.exit_code),
    )
    .with_details(json!({"exit_code": output.exit_code}))
    .with_raw_output(output.stdout.clone())
}

/// FAIL result for a command that exited non-zero; parsing is skipped.
pub(crate) fn command_failed(name: &str, what: &str, output: &CommandOutput) -> CheckResult {
    CheckResult::new(
        name,
        CheckStatus::Fail,
        format!("Failed to get {what}: {}", output.stderr.trim()),
    )
    .with_raw_output(output.stdout.clone())
}

/// Extract the three load averages from `uptime` output.
pub(crate) fn parse_load_averages(stdout: &str) -> Option<(f64, f64, f64)> {
    let idx = stdout.find("load average:")?;
    let rest = &stdout[idx + "load average:".len()..];
    let mut parts = rest.split(',');
    let load_1 = parts.next()?.trim().parse().ok()?;
    let load_5 = parts.next()?.trim().parse().ok()?;
    let load_15 = parts.next()?.trim().parse().ok()?;
    Some((load_1, load_5, load_15))
}

/// Fetch the CPU count via an ancillary command; any failure defaults to 1.
pub(crate) fn cpu_count(channel: &dyn CommandChannel, command: &str) -> u32 {
    match channel.execute(command, None) {
        Ok(output) if output.exit_code == 0 => {
            output.stdout.trim().parse::<u32>().unwrap_or(1).max(1)
        }
        _ => 1,
    }
}

/// First run of digits in the text, like the original column-free parsers.
pub(crate) fn first_number(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}
