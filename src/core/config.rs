// EN: src/core/config.rs

use crate::constants::{CONFIG_FILENAME, ENV_CMD_TIMEOUT, ENV_KEEP_BACKUPS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Errors from loading or validating settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Configuration file '{path}' could not be read: {source}")]
    Read {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for [`Settings`].
    #[error("Configuration file '{path}' is not valid: {source}")]
    Parse {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// An environment override could not be parsed.
    #[error("Environment variable {name}={value:?} is not valid: expected {expected}")]
    InvalidEnv {
        /// The environment variable.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// What the variable should contain.
        expected: &'static str,
    },
    /// A whitelist pattern does not compile.
    #[error("Whitelist pattern {pattern:?} is not a valid regular expression: {source}")]
    BadPattern {
        /// The pattern as configured.
        pattern: String,
        /// Underlying error.
        #[source]
        source: regex::Error,
    },
    /// A value is outside its allowed range.
    #[error("Setting '{field}' is out of range: {reason}")]
    OutOfRange {
        /// The setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Runtime options. Every field has a default, so an empty or partial TOML file is valid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Retain backups after a command succeeds.
    pub keep_backups: bool,
    /// Wall-clock limit for `/cmd`.
    pub cmd_timeout_seconds: u64,
    /// Regexes an external command line must match (any one of them).
    pub whitelist_patterns: Vec<String>,
    /// Extensions (with leading dot; `""` for none) that content-writing commands may target.
    pub allowed_extensions: Vec<String>,
    /// Drop command-looking lines from content before writing it.
    pub strip_command_lines: bool,
    /// How often the watcher rescans the conversations folder.
    pub poll_interval_seconds: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keep_backups: false,
            cmd_timeout_seconds: 60,
            whitelist_patterns: vec![
                r"^pip(?:3)?\s+install\s+[A-Za-z0-9_.\-\[\]\(\)]+(?:==[0-9A-Za-z.+-]+)?$"
                    .to_string(),
                r"^python(?:3)?\s+-m\s+pip\s+install\s+[A-Za-z0-9_.\-\[\]\(\)]+(?:==[0-9A-Za-z.+-]+)?$"
                    .to_string(),
            ],
            allowed_extensions: [".py", ".js", ".json", ".md", ".txt", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strip_command_lines: true,
            poll_interval_seconds: 2.0,
        }
    }
}

impl Settings {
    /// Loads settings in layers: defaults, then the TOML file, then environment overrides.
    ///
    /// # Arguments
    /// * `explicit` - A file given with `--config`. It must exist. When absent,
    ///   `filegenie.toml` in the user configuration directory is used if present.
    ///
    /// # Errors
    /// Any unreadable or invalid layer is an error; nothing falls back silently.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };

        let mut settings = match file {
            Some(path) => Self::from_file(&path)?,
            None => {
                log::debug!("No configuration file found, using defaults.");
                Self::default()
            }
        };

        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses one TOML file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let settings: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;
        log::info!("Loaded configuration from '{}'", path.display());
        Ok(settings)
    }

    /// Applies `FILEGENIE_*` overrides. `lookup` abstracts the environment for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_KEEP_BACKUPS) {
            self.keep_backups = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
                name: ENV_KEEP_BACKUPS,
                value: value.clone(),
                expected: "true/false, 1/0, yes/no or on/off",
            })?;
        }
        if let Some(value) = lookup(ENV_CMD_TIMEOUT) {
            self.cmd_timeout_seconds =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_CMD_TIMEOUT,
                    value: value.clone(),
                    expected: "a whole number of seconds",
                })?;
        }
        Ok(())
    }

    /// Checks ranges and compiles the whitelist once so a bad pattern fails at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cmd_timeout_seconds == 0 {
            return Err(ConfigError::OutOfRange {
                field: "cmd_timeout_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.poll_interval_seconds.is_finite() && self.poll_interval_seconds > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "poll_interval_seconds",
                reason: format!("{} is not a positive number", self.poll_interval_seconds),
            });
        }
        Whitelist::compile(&self.whitelist_patterns).map(|_| ())
    }

    /// `cmd_timeout_seconds` as a `Duration`.
    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_secs(self.cmd_timeout_seconds)
    }

    /// `poll_interval_seconds` as a `Duration`, falling back to the default when invalid.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_seconds)
            .unwrap_or_else(|_| Duration::from_secs(2))
    }

    /// Whether `path`'s extension passes the allow-list. An empty list allows everything.
    pub fn extension_allowed(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let suffix = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        self.allowed_extensions.iter().any(|allowed| {
            let allowed = allowed.trim().to_lowercase();
            let normalized = if allowed.is_empty() || allowed.starts_with('.') {
                allowed
            } else {
                format!(".{}", allowed)
            };
            normalized == suffix
        })
    }
}

/// `<user config dir>/filegenie.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The compiled allow-pattern table for external commands.
#[derive(Debug, Clone)]
pub struct Whitelist {
    patterns: Vec<Regex>,
}

impl Whitelist {
    /// Compiles every pattern, failing on the first invalid one.
    pub fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::BadPattern {
                    pattern: p.clone(),
                    source: e,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// `true` iff the trimmed command line matches at least one pattern.
    pub fn allows(&self, command_line: &str) -> bool {
        let line = command_line.trim();
        self.patterns.iter().any(|p| p.is_match(line))
    }
}
