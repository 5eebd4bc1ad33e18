pub mod units;

use crate::error::{Result, WardenError};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Signals accepted for `kill_signal`
pub const VALID_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// Everything needed to run and supervise one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Wrapper binary the script is handed to (e.g. a python venv)
    #[serde(
        default,
        alias = "exec_interpreter",
        skip_serializing_if = "Option::is_none"
    )]
    pub interpreter: Option<String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Number of instances to run
    #[serde(default = "default_instances")]
    pub instances: usize,

    /// Whether to automatically restart on exit
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Accepted for compatibility; file watching is not supported
    #[serde(default)]
    pub watch: bool,

    /// Resident memory ceiling in bytes
    #[serde(
        default,
        with = "units::byte_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_memory_restart: Option<u64>,

    #[serde(default, alias = "output", skip_serializing_if = "Option::is_none")]
    pub out_file: Option<PathBuf>,

    #[serde(default, alias = "err_file", skip_serializing_if = "Option::is_none")]
    pub error_file: Option<PathBuf>,

    /// Combined stdout+stderr log
    #[serde(default, alias = "log", skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Share log files between instances instead of suffixing the index
    #[serde(default)]
    pub merge_logs: bool,

    /// Prefix every log line with a timestamp
    #[serde(default)]
    pub time: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_date_format: Option<String>,

    /// Consecutive unstable restarts allowed before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Runs shorter than this count as unstable
    #[serde(default = "default_min_uptime", with = "units::duration_ms")]
    pub min_uptime: Duration,

    #[serde(default, with = "units::duration_ms")]
    pub restart_delay: Duration,

    /// Grace period between the kill signal and SIGKILL
    #[serde(default = "default_kill_timeout", with = "units::duration_ms")]
    pub kill_timeout: Duration,

    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,

    /// Environment variable carrying the instance index
    #[serde(default = "default_instance_var")]
    pub instance_var: String,

    /// Environment variables, layered over the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// Default value functions for serde
fn default_instances() -> usize {
    1
}

fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    16
}

fn default_min_uptime() -> Duration {
    Duration::from_millis(1000)
}

fn default_kill_timeout() -> Duration {
    Duration::from_millis(1600)
}

fn default_kill_signal() -> String {
    "SIGINT".to_string()
}

fn default_instance_var() -> String {
    "NODE_APP_INSTANCE".to_string()
}

impl ProcessSpec {
    /// A spec with every optional field at its default
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            args: Vec::new(),
            interpreter: None,
            cwd: None,
            instances: default_instances(),
            autorestart: default_autorestart(),
            watch: false,
            max_memory_restart: None,
            out_file: None,
            error_file: None,
            log_file: None,
            merge_logs: false,
            time: false,
            log_date_format: None,
            max_restarts: default_max_restarts(),
            min_uptime: default_min_uptime(),
            restart_delay: Duration::ZERO,
            kill_timeout: default_kill_timeout(),
            kill_signal: default_kill_signal(),
            instance_var: default_instance_var(),
            env: HashMap::new(),
        }
    }

    /// Validate the specification
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(WardenError::MissingConfigField(format!(
                "script (process '{}')",
                self.name
            )));
        }

        if self.instances == 0 {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: instances must be at least 1",
                self.name
            )));
        }

        if self.max_memory_restart == Some(0) {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: max_memory_restart must be a positive byte quantity",
                self.name
            )));
        }

        if !VALID_SIGNALS.contains(&self.kill_signal.as_str()) {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: invalid kill_signal {}. Must be one of: {}",
                self.name,
                self.kill_signal,
                VALID_SIGNALS.join(", ")
            )));
        }

        if let Some(format) = &self.log_date_format {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(WardenError::ConfigValidationError(format!(
                    "{}: invalid log_date_format '{}'",
                    self.name, format
                )));
            }
        }

        if self.instance_var.is_empty() || self.instance_var.contains('=') {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: instance_var must be a non-empty variable name",
                self.name
            )));
        }

        Ok(())
    }

    /// Script location, relative paths taken against `cwd` when one is set
    pub fn script_path(&self) -> PathBuf {
        self.against_cwd(&self.script)
    }

    /// Program and argument vector, applying the interpreter if present
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        let script = self.script_path();
        match &self.interpreter {
            Some(interpreter) => {
                let mut args = Vec::with_capacity(self.args.len() + 1);
                args.push(script.to_string_lossy().into_owned());
                args.extend(self.args.iter().cloned());

                // bare names like `python3` are looked up on PATH
                let program = if interpreter.contains('/') {
                    self.against_cwd(Path::new(interpreter))
                } else {
                    PathBuf::from(interpreter)
                };
                (program, args)
            }
            None => (script, self.args.clone()),
        }
    }

    fn against_cwd(&self, path: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) if path.is_relative() => cwd.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Normalize fields after deserialization: `interpreter = "none"` and env expansion
    fn normalize(&mut self) {
        if matches!(self.interpreter.as_deref(), Some("none") | Some("")) {
            self.interpreter = None;
        }

        self.script = expand_env_in_path(&self.script);
        self.cwd = self.cwd.as_deref().map(expand_env_in_path);
        self.interpreter = self.interpreter.as_deref().map(expand_env_in_string);
        self.out_file = self.out_file.as_deref().map(expand_env_in_path);
        self.error_file = self.error_file.as_deref().map(expand_env_in_path);
        self.log_file = self.log_file.as_deref().map(expand_env_in_path);
        self.args = self.args.iter().map(|arg| expand_env_in_string(arg)).collect();
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }

    /// Resolve relative paths: `cwd` against `base`, everything else against `cwd`
    fn resolve_paths(&mut self, base: &Path) {
        let cwd = match &self.cwd {
            Some(cwd) => join_clean(base, cwd),
            None => clean(base),
        };

        if !self.script.as_os_str().is_empty() {
            self.script = join_clean(&cwd, &self.script);
        }

        // Bare interpreter names are left to PATH lookup
        if let Some(interpreter) = &self.interpreter {
            if interpreter.contains('/') {
                self.interpreter = Some(
                    join_clean(&cwd, Path::new(interpreter))
                        .to_string_lossy()
                        .into_owned(),
                );
            }
        }

        self.out_file = self.out_file.as_deref().map(|p| join_clean(&cwd, p));
        self.error_file = self.error_file.as_deref().map(|p| join_clean(&cwd, p));
        self.log_file = self.log_file.as_deref().map(|p| join_clean(&cwd, p));
        self.cwd = Some(cwd);
    }
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Determine format based on file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(WardenError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }
}

/// An entry that failed to load, with the error that rejected it
#[derive(Debug)]
pub struct RejectedSpec {
    pub label: String,
    pub error: WardenError,
}

/// The result of loading an ecosystem file
///
/// Entries are loaded independently: an invalid entry lands in `rejected`
/// and does not prevent its siblings from being supervised.
#[derive(Debug, Default)]
pub struct EcosystemConfig {
    pub specs: Vec<ProcessSpec>,
    pub rejected: Vec<RejectedSpec>,
}

#[derive(Serialize)]
struct AppsFile<'a> {
    apps: &'a [ProcessSpec],
}

impl EcosystemConfig {
    /// Load an ecosystem file (TOML or JSON)
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WardenError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let format = ConfigFormat::from_path(path)?;
        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        let base = if base.is_absolute() {
            base
        } else {
            std::env::current_dir()?.join(base)
        };

        Self::load(&contents, format, Some(&base))
    }

    /// Load from an in-memory configuration; paths are kept as written
    pub fn from_str(contents: &str, format: ConfigFormat) -> Result<Self> {
        Self::load(contents, format, None)
    }

    fn load(contents: &str, format: ConfigFormat, base: Option<&Path>) -> Result<Self> {
        let entries = match format {
            ConfigFormat::Toml => parse_toml_entries(contents)?,
            ConfigFormat::Json => parse_json_entries(contents)?,
        };

        if entries.is_empty() {
            return Err(WardenError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }

        let mut config = EcosystemConfig::default();

        for (label, entry) in entries {
            let loaded = entry.and_then(|mut spec| {
                spec.normalize();
                if let Some(base) = base {
                    spec.resolve_paths(base);
                }
                spec.validate()?;
                if config.specs.iter().any(|s| s.name == spec.name) {
                    return Err(WardenError::ConfigValidationError(format!(
                        "duplicate process name '{}'",
                        spec.name
                    )));
                }
                Ok(spec)
            });

            match loaded {
                Ok(spec) => {
                    if spec.watch {
                        warn!("{}: watch mode is not supported, ignoring", spec.name);
                    }
                    config.specs.push(spec);
                }
                Err(error) => {
                    warn!("Rejecting process configuration {}: {}", label, error);
                    config.rejected.push(RejectedSpec { label, error });
                }
            }
        }

        Ok(config)
    }

    /// Look up a loaded spec by name
    pub fn get(&self, name: &str) -> Option<&ProcessSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(&AppsFile { apps: &self.specs })
            .map_err(|e| WardenError::SerializationError(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(&AppsFile { apps: &self.specs })
            .map_err(|e| WardenError::SerializationError(e.to_string()))
    }
}

type Entry = (String, Result<ProcessSpec>);

fn entry_label(index: usize, name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("'{}'", name),
        _ => format!("entry #{}", index + 1),
    }
}

/// Split a TOML document into app entries: `[[apps]]`, `[[processes]]` or a single app
fn parse_toml_entries(contents: &str) -> Result<Vec<Entry>> {
    let mut table: toml::Table = contents
        .parse()
        .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

    let values = match table.remove("apps").or_else(|| table.remove("processes")) {
        Some(toml::Value::Array(items)) => items,
        Some(_) => {
            return Err(WardenError::InvalidConfig(
                "'apps' must be an array of tables".to_string(),
            ))
        }
        None if table.is_empty() => Vec::new(),
        None => vec![toml::Value::Table(table)],
    };

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let label = entry_label(index, value.get("name").and_then(|n| n.as_str()));
            let spec = value.try_into::<ProcessSpec>().map_err(|e| {
                WardenError::InvalidConfig(format!("{}: {}", label, e))
            });
            (label, spec)
        })
        .collect())
}

/// Split a JSON document into app entries: `{"apps": [...]}`, `{"processes": [...]}` or a single app
fn parse_json_entries(contents: &str) -> Result<Vec<Entry>> {
    let document: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

    let mut object = match document {
        serde_json::Value::Object(object) => object,
        serde_json::Value::Array(items) => serde_json::Map::from_iter([(
            "apps".to_string(),
            serde_json::Value::Array(items),
        )]),
        _ => {
            return Err(WardenError::InvalidConfig(
                "Expected a JSON object or array".to_string(),
            ))
        }
    };

    let values = match object.remove("apps").or_else(|| object.remove("processes")) {
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => {
            return Err(WardenError::InvalidConfig(
                "'apps' must be an array of objects".to_string(),
            ))
        }
        None if object.is_empty() => Vec::new(),
        None => vec![serde_json::Value::Object(object)],
    };

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let label = entry_label(index, value.get("name").and_then(|n| n.as_str()));
            let spec = serde_json::from_value::<ProcessSpec>(value)
                .map_err(|e| WardenError::InvalidConfig(format!("{}: {}", label, e)));
            (label, spec)
        })
        .collect())
}

/// Expand `$VAR` and `${VAR}` references; unknown variables are left untouched
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => {
                result.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

/// Join `path` onto `base` unless it is absolute, dropping `.` components
fn join_clean(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean(path)
    } else {
        clean(&base.join(path))
    }
}

fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
