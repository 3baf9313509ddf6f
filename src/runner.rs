use crate::checker::OsType;
use crate::connector::{CommandChannel, CommandOutput, ConnectorError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Substrings that mark a command as destructive. Advisory only: callers
/// decide whether a match blocks execution.
const DENYLIST: &[&str] = &[
    "rm -rf /",
    "mkfs",
    "dd if=",
    "format",
    "fdisk",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
];

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command file not found: {path}")]
    CatalogNotFound { path: String },
    #[error("failed to read command file {path}: {source}")]
    CatalogRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to execute command '{command}': {source}")]
    Execution {
        command: String,
        #[source]
        source: ConnectorError,
    },
}

struct CacheEntry {
    captured_at: Instant,
    output: CommandOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl: Duration,
}

/// One entry of a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchEntry {
    pub name: String,
    pub command: String,
    pub params: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// Outcome of one batch entry; a failed entry never aborts the batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub name: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    pub error: Option<String>,
}

/// Turns command templates plus parameters into executed, optionally cached
/// results. Owns the named-command table and the result cache exclusively.
pub struct CommandRunner<'a> {
    channel: &'a dyn CommandChannel,
    cache_ttl: Duration,
    cache: HashMap<String, CacheEntry>,
    catalog: HashMap<String, String>,
}

impl<'a> CommandRunner<'a> {
    pub fn new(channel: &'a dyn CommandChannel, cache_ttl: Duration) -> Self {
        Self {
            channel,
            cache_ttl,
            cache: HashMap::new(),
            catalog: HashMap::new(),
        }
    }

    /// Load `NAME="command"` definitions and merge them into the named-command
    /// table. A path that does not exist is retried under a sibling
    /// `commands/` directory before failing.
    pub fn load_catalog_file(&mut self, path: &Path, os_type: OsType) -> Result<usize, CommandError> {
        let resolved = if path.exists() {
            path.to_path_buf()
        } else {
            PathBuf::from("commands").join(path)
        };
        if !resolved.exists() {
            return Err(CommandError::CatalogNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(&resolved).map_err(|source| CommandError::CatalogRead {
            path: resolved.display().to_string(),
            source,
        })?;

        let commands = parse_catalog(&content);
        let loaded = commands.len();
        self.catalog.extend(commands);
        info!(
            path = %resolved.display(),
            os_type = %os_type,
            loaded,
            "loaded command definitions"
        );
        Ok(loaded)
    }

    /// Look up a named command from the loaded catalog.
    pub fn catalog_command(&self, name: &str) -> Option<&str> {
        self.catalog.get(name).map(String::as_str)
    }

    /// Replace every `${key}` placeholder present in `params`; placeholders
    /// without a matching key are left untouched.
    pub fn inject_parameters(command: &str, params: &BTreeMap<String, String>) -> String {
        let mut formatted = command.to_string();
        for (key, value) in params {
            let placeholder = format!("${{{key}}}");
            if formatted.contains(&placeholder) {
                formatted = formatted.replace(&placeholder, value);
            }
        }
        formatted
    }

    /// Execute a command (or a catalog name), injecting parameters and
    /// consulting the cache. Results are cached even on non-zero exit codes.
    pub fn execute(
        &mut self,
        command: &str,
        params: &BTreeMap<String, String>,
        use_cache: bool,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        let template = self
            .catalog
            .get(command)
            .cloned()
            .unwrap_or_else(|| command.to_string());
        let formatted = Self::inject_parameters(&template, params);

        let cache_key = fingerprint(&formatted, params);
        if use_cache {
            if let Some(entry) = self.cache.get(&cache_key) {
                if entry.captured_at.elapsed() < self.cache_ttl {
                    debug!(command = %formatted, "using cached result");
                    return Ok(entry.output.clone());
                }
            }
        }

        debug!(command = %formatted, "executing command");
        let output = self
            .channel
            .execute(&formatted, timeout)
            .map_err(|source| CommandError::Execution {
                command: formatted.clone(),
                source,
            })?;

        if use_cache {
            self.cache.insert(
                cache_key,
                CacheEntry {
                    captured_at: Instant::now(),
                    output: output.clone(),
                },
            );
        }

        Ok(output)
    }

    /// Run a sequence of commands independently; results keep input order and
    /// a failed entry carries the error text instead of aborting the batch.
    pub fn execute_batch(&mut self, entries: &[BatchEntry]) -> Vec<BatchResult> {
        entries
            .iter()
            .map(|entry| {
                match self.execute(&entry.command, &entry.params, true, entry.timeout) {
                    Ok(output) => BatchResult {
                        name: entry.name.clone(),
                        command: entry.command.clone(),
                        stdout: output.stdout,
                        stderr: output.stderr,
                        success: output.exit_code == 0,
                        exit_code: output.exit_code,
                        error: None,
                    },
                    Err(err) => BatchResult {
                        name: entry.name.clone(),
                        command: entry.command.clone(),
                        stdout: String::new(),
                        stderr: err.to_string(),
                        exit_code: -1,
                        success: false,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect()
    }

    /// Advisory safety check: false when the command contains a destructive
    /// substring from the denylist.
    pub fn validate_command(command: &str) -> bool {
        let lowered = command.to_lowercase();
        for pattern in DENYLIST {
            if lowered.contains(pattern) {
                warn!(command, pattern, "destructive command detected");
                return false;
            }
        }
        true
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        info!("command cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        let total_entries = self.cache.len();
        let valid_entries = self
            .cache
            .values()
            .filter(|entry| entry.captured_at.elapsed() < self.cache_ttl)
            .count();
        CacheStats {
            total_entries,
            valid_entries,
            expired_entries: total_entries - valid_entries,
            ttl: self.cache_ttl,
        }
    }
}

/// Stable fingerprint over the resolved command plus the canonical
/// (sorted-key) parameter serialization.
fn fingerprint(command: &str, params: &BTreeMap<String, String>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(command.as_bytes());
    for (key, value) in params {
        hasher.update(b"\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Parse `NAME="command"` lines; blank lines and `#` comments are skipped and
/// surrounding quotes are stripped.
fn parse_catalog(content: &str) -> HashMap<String, String> {
    let mut commands = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((name, command)) = line.split_once('=') {
            let name = name.trim();
            let command = command.trim().trim_matches(|c| c == '"' || c == '\'');
            if !name.is_empty() {
                commands.insert(name.to_string(), command.to_string());
            }
        }
    }
    commands
}
