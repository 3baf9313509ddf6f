use crate::checker::OsType;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Check-name → command-template map that keeps YAML declaration order,
/// because that order is the execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMap(Vec<(String, String)>);

impl CommandMap {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CommandMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CommandMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = CommandMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of check name to command template")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    entries.push((key, value));
                }
                Ok(CommandMap(entries))
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub report: ReportSettings,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChecksConfig {
    #[serde(default)]
    pub linux: OsChecks,
    #[serde(default)]
    pub aix: OsChecks,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OsChecks {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub commands: CommandMap,
    #[serde(default)]
    pub commands_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default)]
    pub include_raw_output: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            port: default_port(),
            key_file: None,
        }
    }
}

impl Default for OsChecks {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            commands: CommandMap::default(),
            commands_file: None,
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            formats: default_formats(),
            include_raw_output: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Missing config file means built-in defaults; any other failure is an
    /// error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            info!(path = %path_ref.display(), "no configuration file, using defaults");
            return Ok(Config::default());
        }
        Self::load_from_file(path_ref)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh.timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "ssh.timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.ssh.port == 0 {
            return Err(ConfigError::Validation(
                "ssh.port must be in the range 1..65535".to_string(),
            ));
        }

        validate_os_checks("linux", &self.checks.linux)?;
        validate_os_checks("aix", &self.checks.aix)?;

        if self.report.formats.is_empty() {
            return Err(ConfigError::Validation(
                "report.formats must list at least one format".to_string(),
            ));
        }

        Ok(())
    }

    pub fn os_checks(&self, os_type: OsType) -> &OsChecks {
        match os_type {
            OsType::Linux => &self.checks.linux,
            OsType::Aix => &self.checks.aix,
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_os_checks(os_name: &str, checks: &OsChecks) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for (name, _) in checks.commands.iter() {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "checks.{os_name}.commands contains an empty check name"
            )));
        }
        if !names.insert(name.to_string()) {
            return Err(ConfigError::Validation(format!(
                "check name '{name}' in checks.{os_name}.commands must be unique"
            )));
        }
    }
    Ok(())
}

/// One target host, from the CLI or a batch hosts file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_os_type")]
    pub os_type: OsType,
}

impl HostConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "host must not be empty".to_string(),
            ));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "username for host '{}' must not be empty",
                self.host
            )));
        }
        if self.port == Some(0) {
            return Err(ConfigError::Validation(format!(
                "port for host '{}' must be in the range 1..65535",
                self.host
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct HostsFile {
    #[serde(default)]
    hosts: Vec<HostConfig>,
}

/// Load and validate the batch hosts file.
pub fn load_hosts_file(path: impl AsRef<Path>) -> Result<Vec<HostConfig>, ConfigError> {
    let path_ref = path.as_ref();
    let path_display = path_ref.display().to_string();
    let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_display.clone(),
        source,
    })?;
    let file: HostsFile = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path_display,
        source,
    })?;

    if file.hosts.is_empty() {
        return Err(ConfigError::Validation(
            "no hosts found in configuration file".to_string(),
        ));
    }
    for host in &file.hosts {
        host.validate()?;
    }
    Ok(file.hosts)
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_secs() -> u64 {
    5
}

const fn default_port() -> u16 {
    22
}

const fn default_enabled() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_formats() -> Vec<String> {
    vec!["json".to_string(), "html".to_string()]
}

const fn default_cache_ttl_secs() -> u64 {
    300
}

const fn default_os_type() -> OsType {
    OsType::Linux
}
