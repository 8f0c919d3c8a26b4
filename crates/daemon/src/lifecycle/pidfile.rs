// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pid file holding an exclusive lock for the daemon's lifetime.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use super::LifecycleError;
use crate::control::ControlSignal;

#[derive(Debug)]
pub struct Pidfile {
    path: PathBuf,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    file: File,
}

impl Pidfile {
    /// Lock `path` and write the current pid into it.
    pub fn acquire(path: &Path) -> Result<Self, LifecycleError> {
        // Open without truncating: the pid belongs to whoever holds the lock
        let mut file = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
        file.try_lock_exclusive().map_err(|e| LifecycleError::LockFailed(path.to_path_buf(), e))?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the pid file to `to`, keeping the lock.
    pub fn rename(&mut self, to: &Path) -> Result<(), LifecycleError> {
        if std::fs::rename(&self.path, to).is_ok() {
            self.path = to.to_path_buf();
            return Ok(());
        }
        // Different filesystem: lock a fresh file, then drop the old one
        let fresh = Self::acquire(to)?;
        let old = std::mem::replace(self, fresh);
        old.remove();
        Ok(())
    }

    /// Delete the file and release the lock.
    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Pid recorded in `path`, if it holds one.
pub fn read_pid(path: &Path) -> Option<i32> {
    let mut text = String::new();
    File::open(path).ok()?.read_to_string(&mut text).ok()?;
    text.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Pid of the live daemon holding the lock on `path`.
///
/// `None` when the file is missing or nobody holds its lock (a file left
/// over from a dead daemon).
pub fn running_pid(path: &Path) -> Option<i32> {
    let file = File::open(path).ok()?;
    if file.try_lock_exclusive().is_ok() {
        let _ = FileExt::unlock(&file);
        return None;
    }
    read_pid(path)
}

/// Deliver `signal` to the daemon that holds the lock on `path`.
pub fn signal_daemon(path: &Path, signal: ControlSignal) -> Result<i32, LifecycleError> {
    let pid = running_pid(path).ok_or_else(|| LifecycleError::NotRunning(path.to_path_buf()))?;
    kill(Pid::from_raw(pid), signal.unix_signal())
        .map_err(|source| LifecycleError::Signal { pid, source })?;
    Ok(pid)
}

/// Block until nobody holds the lock on `path`, checking every `poll`.
///
/// There is no upper bound: a graceful stop waits for every running job.
pub fn wait_released(path: &Path, poll: Duration) {
    while running_pid(path).is_some() {
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
#[path = "pidfile_tests.rs"]
mod tests;
