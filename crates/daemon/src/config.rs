// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration file.
//!
//! The file holds one `key = value` per line. Keys are case-insensitive,
//! lines starting with `#` are comments, and values may be quoted. A bad value
//! never aborts loading: it is reported as a [`ConfigWarning`] and the default
//! is kept.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dj_storage::ConnectTarget;
use thiserror::Error;

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub debug: bool,
    pub pidfile: PathBuf,
    /// Log file pattern; empty means stderr. `%` escapes are strftime fields.
    pub logfile: String,
    pub log_truncate_on_rotation: bool,
    /// Period of the fallback polling pass.
    pub job_queue_interval: Duration,
    /// Worker pool capacity.
    pub job_queue_processes: usize,
    /// Longest idle wait between two loop iterations.
    pub nap_time: Duration,
    /// Base delay of the reconnect backoff.
    pub error_delay: Duration,
    pub target: ConnectTarget,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            debug: false,
            pidfile: PathBuf::from("/tmp/pg_dbms_job.pid"),
            logfile: String::new(),
            log_truncate_on_rotation: false,
            job_queue_interval: Duration::from_millis(500),
            job_queue_processes: 100_000,
            nap_time: Duration::from_millis(100),
            error_delay: Duration::from_secs(3),
            target: ConnectTarget::default(),
        }
    }
}

/// Errors loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A line of the configuration file that was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl DaemonConfig {
    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Ok(Self::parse(&text))
    }

    /// Parse configuration text on top of the defaults.
    pub fn parse(text: &str) -> (Self, Vec<ConfigWarning>) {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let warn = |message: String| ConfigWarning { line: index + 1, message };
            let Some((key, value)) = line.split_once('=') else {
                warnings.push(warn(format!("expected key=value, got {line:?}")));
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = unquote(value.trim());
            if let Err(message) = config.set(&key, value) {
                warnings.push(warn(message));
            }
        }

        (config, warnings)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "debug" => self.debug = parse_bool(key, value)?,
            "pidfile" => {
                if value.is_empty() {
                    return Err("pidfile cannot be empty".to_string());
                }
                self.pidfile = PathBuf::from(value);
            }
            "logfile" => self.logfile = value.to_string(),
            "log_truncate_on_rotation" => self.log_truncate_on_rotation = parse_bool(key, value)?,
            "job_queue_interval" => self.job_queue_interval = parse_secs(key, value)?,
            "job_queue_processes" => self.job_queue_processes = parse_positive(key, value)?,
            "nap_time" => self.nap_time = parse_secs(key, value)?,
            "error_delay" => self.error_delay = parse_secs(key, value)?,
            "host" => self.target.host = value.to_string(),
            "port" => {
                self.target.port = value
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| format!("invalid port {value:?}"))?
            }
            "database" => self.target.database = value.to_string(),
            "user" => self.target.user = value.to_string(),
            "passwd" => self.target.passwd = value.to_string(),
            _ => return Err(format!("unknown option {key:?}")),
        }
        Ok(())
    }

    /// Apply a `--debug`/`--no-debug` command-line override.
    pub fn with_debug_override(mut self, debug: Option<bool>) -> Self {
        if let Some(debug) = debug {
            self.debug = debug;
        }
        self
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "yes" | "true" => Ok(true),
        "0" | "off" | "no" | "false" | "" => Ok(false),
        _ => Err(format!("invalid boolean for {key}: {value:?}")),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| format!("{key} must be a positive number of seconds, got {value:?}"))
}

fn parse_positive(key: &str, value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("{key} must be a positive integer, got {value:?}"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
