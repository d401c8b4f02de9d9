//! Configuration loading and per-host validation.
//!
//! The config file is YAML with a top-level `checks:` list; every entry
//! describes one SFTP host. Environment variables referenced as `$NAME` or
//! `${NAME}` are substituted before the document is parsed.

use crate::dates::{DateError, DatedTemplate};
use chrono::Local;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_USERNAME: &str = "sftp";
pub const DEFAULT_FOLDER: &str = "www";
pub const DEFAULT_PATTERN: &str = "*";
pub const DEFAULT_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_BASE_DATE: &str = "today";
pub const DEFAULT_CHECK_FILE_NAME: &str = ".sftp-exporter-health-check";

/// Errors that make the whole config file unusable.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("undefined environment variable ${0} referenced in config")]
    UndefinedVariable(String),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid variable pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl LoadError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::Missing(_) => 1,
            _ => 2,
        }
    }
}

/// Errors for a single host entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed check entry: {0}")]
    Malformed(String),
    #[error("host not specified")]
    MissingHost,
    #[error("invalid port value")]
    InvalidPort,
    #[error("either password or client key should be used, but not both")]
    BothCredentials,
    #[error("at least one of \"password\", \"client_key_file\" should be specified")]
    MissingCredentials,
    #[error("invalid checker function: {0}")]
    UnknownChecker(String),
    #[error("check interval must be at least one second")]
    ZeroInterval,
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("invalid file pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Exit code when an invalid entry is not skipped.
pub const EXIT_INVALID_ENTRY: i32 = 3;

/// The first invalid entry of the `checks:` list, by position.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("check entry #{index}: {error}")]
pub struct InvalidEntry {
    pub index: usize,
    pub error: ConfigError,
}

impl InvalidEntry {
    pub fn exit_code(&self) -> i32 {
        EXIT_INVALID_ENTRY
    }
}

/// Which check strategy runs against every folder of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckerKind {
    /// List the folder only.
    Noop,
    /// List the folder with file attributes.
    Attributes,
    /// List, then upload, download and delete a check file.
    PutGetDel,
}

impl CheckerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckerKind::Noop => "noop",
            CheckerKind::Attributes => "attributes",
            CheckerKind::PutGetDel => "put_get_del",
        }
    }
}

impl FromStr for CheckerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noop" => Ok(CheckerKind::Noop),
            "attributes" => Ok(CheckerKind::Attributes),
            "put_get_del" => Ok(CheckerKind::PutGetDel),
            other => Err(ConfigError::UnknownChecker(other.to_string())),
        }
    }
}

/// How the client authenticates. Exactly one kind per host.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// A check entry as written in the config file, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCheck {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<serde_yaml::Value>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_key_file: Option<String>,
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_interval")]
    pub timeout: u64,
    #[serde(default = "default_checker")]
    pub checker: String,
    #[serde(default)]
    pub validate_known_hosts: bool,
    #[serde(default)]
    pub smart_pattern_date: bool,
    #[serde(default = "default_base_date")]
    pub base_pattern_date: String,
    #[serde(default)]
    pub smart_folder_date: bool,
    #[serde(default = "default_base_date")]
    pub base_folder_date: String,
    #[serde(default = "default_check_file_name")]
    pub check_file_name: String,
    #[serde(default)]
    pub check_file_contents: Option<String>,
    #[serde(default)]
    pub skip_overlapping_cycles: bool,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_folders() -> Vec<String> {
    vec![DEFAULT_FOLDER.to_string()]
}

fn default_patterns() -> Vec<String> {
    vec![DEFAULT_PATTERN.to_string()]
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_checker() -> String {
    CheckerKind::Noop.as_str().to_string()
}

fn default_base_date() -> String {
    DEFAULT_BASE_DATE.to_string()
}

fn default_check_file_name() -> String {
    DEFAULT_CHECK_FILE_NAME.to_string()
}

/// Validated, immutable configuration of one monitored host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub folders: Vec<DatedTemplate>,
    pub patterns: Vec<DatedTemplate>,
    pub interval: Duration,
    pub checker: CheckerKind,
    pub validate_known_hosts: bool,
    pub check_file_name: String,
    pub check_file_contents: Option<String>,
    pub skip_overlapping_cycles: bool,
}

impl HostConfig {
    /// Deserialize and validate one entry of the `checks:` list.
    pub fn from_value(value: serde_yaml::Value) -> Result<Self, ConfigError> {
        let raw: RawCheck =
            serde_yaml::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Render every pattern once so broken templates fail at startup
    /// rather than on the first cycle.
    fn validate_templates(&self) -> Result<(), ConfigError> {
        let now = Local::now();
        for folder in &self.folders {
            folder.render(now)?;
        }
        for pattern in &self.patterns {
            let rendered = pattern.render(now)?;
            file_glob(&rendered).map_err(|e| ConfigError::Pattern {
                pattern: pattern.template.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Compile a file name pattern. Runs of `*` are collapsed first: names
/// never contain `/`, so `a**b` means the same as `a*b`.
pub fn file_glob(pattern: &str) -> Result<glob::Pattern, glob::PatternError> {
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c != '*' || !collapsed.ends_with('*') {
            collapsed.push(c);
        }
    }
    glob::Pattern::new(&collapsed)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_port(value: Option<serde_yaml::Value>) -> Result<u16, ConfigError> {
    let Some(value) = value else {
        return Ok(DEFAULT_PORT);
    };
    value
        .as_u64()
        .filter(|p| *p > 0)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or(ConfigError::InvalidPort)
}

fn templates(values: Vec<String>, smart: bool, base_date: &str) -> Vec<DatedTemplate> {
    values
        .into_iter()
        .map(|t| {
            if smart {
                DatedTemplate::dated(t, base_date)
            } else {
                DatedTemplate::verbatim(t)
            }
        })
        .collect()
}

impl TryFrom<RawCheck> for HostConfig {
    type Error = ConfigError;

    fn try_from(raw: RawCheck) -> Result<Self, Self::Error> {
        let host = non_empty(raw.host).ok_or(ConfigError::MissingHost)?;
        let port = parse_port(raw.port)?;

        let credential = match (non_empty(raw.password), non_empty(raw.client_key_file)) {
            (Some(_), Some(_)) => return Err(ConfigError::BothCredentials),
            (None, None) => return Err(ConfigError::MissingCredentials),
            (Some(password), None) => Credential::Password(password),
            (None, Some(key_file)) => Credential::KeyFile(expand_home(&key_file)),
        };

        let checker = raw.checker.parse::<CheckerKind>()?;
        if raw.timeout == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        let config = HostConfig {
            host,
            port,
            username: raw.username,
            credential,
            folders: templates(raw.folders, raw.smart_folder_date, &raw.base_folder_date),
            patterns: templates(raw.patterns, raw.smart_pattern_date, &raw.base_pattern_date),
            interval: Duration::from_secs(raw.timeout),
            checker,
            validate_known_hosts: raw.validate_known_hosts,
            check_file_name: raw.check_file_name,
            check_file_contents: raw.check_file_contents,
            skip_overlapping_cycles: raw.skip_overlapping_cycles,
        };
        config.validate_templates()?;
        Ok(config)
    }
}

/// The parsed config file. Entries stay raw until validated one by one.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub checks: Vec<serde_yaml::Value>,
}

impl ConfigDocument {
    /// Parse a config document, substituting environment variables first.
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let text = substitute_env(text, |name| std::env::var(name).ok())?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: Option<ConfigDocument> = serde_yaml::from_str(&text)?;
        Ok(doc.unwrap_or_default())
    }

    /// Validate every entry, keeping its position for error reporting.
    pub fn host_configs(&self) -> Vec<Result<HostConfig, ConfigError>> {
        self.checks
            .iter()
            .cloned()
            .map(HostConfig::from_value)
            .collect()
    }

    /// The host configs to schedule. Invalid entries are logged and left
    /// out when `skip_wrong` is set; otherwise the first one is returned
    /// as an error.
    pub fn validated(&self, skip_wrong: bool) -> Result<Vec<HostConfig>, InvalidEntry> {
        let mut configs = Vec::new();
        for (index, entry) in self.host_configs().into_iter().enumerate() {
            match entry {
                Ok(config) => configs.push(config),
                Err(error) if skip_wrong => {
                    warn!(entry = index, error = %error, "Skipping invalid check entry");
                }
                Err(error) => return Err(InvalidEntry { index, error }),
            }
        }
        Ok(configs)
    }
}

/// Read and parse the config file at `path`.
pub async fn load_config(path: &Path) -> Result<ConfigDocument, LoadError> {
    if !tokio::fs::try_exists(path).await? {
        return Err(LoadError::Missing(path.to_path_buf()));
    }
    let text = tokio::fs::read_to_string(path).await?;
    ConfigDocument::parse(&text)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Replace `$NAME` and `${NAME}` with values from `lookup`; `$$` is a
/// literal dollar sign. Unknown names are an error.
pub fn substitute_env<F>(text: &str, lookup: F) -> Result<String, LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let re = regex::Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")?;

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        if caps.get(1).is_some() {
            out.push('$');
        } else if let Some(name) = caps.get(2).or_else(|| caps.get(3)) {
            let value = lookup(name.as_str())
                .ok_or_else(|| LoadError::UndefinedVariable(name.as_str().to_string()))?;
            out.push_str(&value);
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
