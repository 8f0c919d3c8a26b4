// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon logging: level filter and log file, both swappable on reload.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::config::DaemonConfig;

/// The logging-related part of [`DaemonConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub debug: bool,
    pub logfile: String,
    pub truncate_on_rotation: bool,
}

impl From<&DaemonConfig> for LogSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            debug: config.debug,
            logfile: config.logfile.clone(),
            truncate_on_rotation: config.log_truncate_on_rotation,
        }
    }
}

/// Errors setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("a global logger is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),

    #[error("cannot change log level: {0}")]
    Reload(#[from] reload::Error),
}

/// Level filter for `debug`. `RUST_LOG` takes precedence when set.
pub fn filter_for(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { "debug" } else { "info" };
        EnvFilter::new(format!("{level},sqlx=warn"))
    })
}

/// Live logging configuration of the daemon.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    file: SharedLogFile,
    _guard: WorkerGuard,
}

impl LogHandle {
    /// Install the global subscriber.
    pub fn init(settings: &LogSettings) -> Result<Self, LoggingError> {
        let (handle, subscriber) = Self::build(settings);
        subscriber.try_init()?;
        Ok(handle)
    }

    /// Build the subscriber without installing it.
    pub fn build(settings: &LogSettings) -> (Self, impl Subscriber + Send + Sync + 'static) {
        let file = SharedLogFile::new(LogFile::new(settings));
        let (writer, guard) = tracing_appender::non_blocking(file.clone());
        let (filter, handle) = reload::Layer::new(filter_for(settings.debug));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(false));

        (Self { filter: handle, file, _guard: guard }, subscriber)
    }

    /// Switch level and log file to `settings`.
    pub fn apply(&self, settings: &LogSettings) -> Result<(), LoggingError> {
        self.filter.reload(filter_for(settings.debug))?;
        self.file.reconfigure(settings);
        Ok(())
    }
}

/// Log destination.
///
/// An empty pattern writes to stderr. Otherwise the pattern is expanded with
/// the local time on every write; when the expansion changes the file is
/// rotated, and with `truncate_on_rotation` a file left over from an earlier
/// cycle is emptied instead of appended to.
pub struct LogFile {
    pattern: String,
    truncate_on_rotation: bool,
    current: Option<(PathBuf, File)>,
}

impl LogFile {
    pub fn new(settings: &LogSettings) -> Self {
        Self {
            pattern: settings.logfile.clone(),
            truncate_on_rotation: settings.truncate_on_rotation,
            current: None,
        }
    }

    /// File name for `now`, or `None` for stderr.
    pub fn path_at(&self, now: DateTime<Local>) -> Option<PathBuf> {
        if self.pattern.is_empty() {
            return None;
        }
        if !self.pattern.contains('%') {
            return Some(PathBuf::from(&self.pattern));
        }
        let mut expanded = String::new();
        match write!(expanded, "{}", now.format(&self.pattern)) {
            Ok(()) => Some(PathBuf::from(expanded)),
            // Invalid strftime escape: use the pattern literally
            Err(_) => Some(PathBuf::from(&self.pattern)),
        }
    }

    fn reconfigure(&mut self, settings: &LogSettings) {
        if self.pattern != settings.logfile {
            self.current = None;
        }
        self.pattern = settings.logfile.clone();
        self.truncate_on_rotation = settings.truncate_on_rotation;
    }

    fn write_at(&mut self, now: DateTime<Local>, buf: &[u8]) -> io::Result<usize> {
        let Some(path) = self.path_at(now) else {
            return io::stderr().write(buf);
        };
        let stale = self.current.as_ref().map_or(true, |(open, _)| *open != path);
        if stale {
            let rotated = self.current.is_some();
            let file = self.open(&path, rotated)?;
            self.current = Some((path, file));
        }
        match &mut self.current {
            Some((_, file)) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn open(&self, path: &PathBuf, rotated: bool) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.create(true);
        if rotated && self.truncate_on_rotation {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options.open(path)
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(Local::now(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.current {
            Some((_, file)) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}

/// [`LogFile`] shared between the appender thread and the reload path.
#[derive(Clone)]
struct SharedLogFile(Arc<Mutex<LogFile>>);

impl SharedLogFile {
    fn new(file: LogFile) -> Self {
        Self(Arc::new(Mutex::new(file)))
    }

    fn reconfigure(&self, settings: &LogSettings) {
        self.0.lock().reconfigure(settings);
    }
}

impl Write for SharedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
