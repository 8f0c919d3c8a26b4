//! Shared helpers for the specs: a fluent runner for the binary and a
//! throwaway installation with its own configuration file.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Environment variables that would leak the caller's setup into a test run.
const SCRUBBED_ENV: &[&str] = &[
    "PG_DBMS_JOB_CONFIG",
    "PG_DBMS_JOB_ID",
    "PG_DBMS_JOB_SOURCE",
    "PG_DBMS_JOB_WHAT",
    "PG_DBMS_JOB_LOG_USER",
    "PG_DBMS_JOB_SCHEMA_USER",
    "PGHOST",
    "PGPORT",
    "PGDATABASE",
    "PGUSER",
    "PGPASSWORD",
    "RUST_LOG",
];

/// A `pg_dbms_job` invocation with a scrubbed environment.
pub fn cli() -> Cli {
    let mut cmd = assert_cmd::Command::cargo_bin("pg_dbms_job").unwrap();
    for name in SCRUBBED_ENV {
        cmd.env_remove(name);
    }
    Cli { cmd }
}

pub struct Cli {
    cmd: assert_cmd::Command,
}

impl Cli {
    pub fn args(mut self, args: &[&str]) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        self.cmd.env(key, value);
        self
    }

    /// Run and require exit code 0.
    pub fn passes(self) -> Run {
        self.exits(0)
    }

    /// Run and require a non-zero exit code.
    pub fn fails(mut self) -> Run {
        let run = Run::from(self.cmd.output().unwrap());
        assert_ne!(run.code, Some(0), "expected failure\n{run}");
        run
    }

    /// Run and require exit code `code`.
    pub fn exits(mut self, code: i32) -> Run {
        let run = Run::from(self.cmd.output().unwrap());
        assert_eq!(run.code, Some(code), "unexpected exit code\n{run}");
        run
    }
}

/// Captured result of a finished invocation.
pub struct Run {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for Run {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl std::fmt::Display for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exit: {:?}\n--- stdout\n{}\n--- stderr\n{}", self.code, self.stdout, self.stderr)
    }
}

impl Run {
    pub fn stdout_has(self, needle: &str) -> Self {
        assert!(self.stdout.contains(needle), "stdout lacks {needle:?}\n{self}");
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        assert!(self.stderr.contains(needle), "stderr lacks {needle:?}\n{self}");
        self
    }

    pub fn stdout_lacks(self, needle: &str) -> Self {
        assert!(!self.stdout.contains(needle), "stdout has {needle:?}\n{self}");
        self
    }
}

/// A configuration file, pid file and log file under a temporary directory.
///
/// The database points at a socket directory that does not exist, so any
/// connection attempt fails at once.
pub struct Install {
    dir: TempDir,
}

impl Install {
    pub fn new() -> Self {
        let install = Self { dir: tempfile::tempdir().unwrap() };
        install.write_config("");
        install
    }

    /// Rewrite the configuration file, appending `extra` lines.
    pub fn write_config(&self, extra: &str) {
        let text = format!(
            "# pg_dbms_job test installation\n\
             pidfile={}\n\
             logfile={}\n\
             host={}\n\
             port=5432\n\
             database=dj_specs\n\
             error_delay=1\n\
             {extra}",
            self.pidfile().display(),
            self.logfile().display(),
            self.socket_dir().display(),
        );
        std::fs::write(self.config_path(), text).unwrap();
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("pg_dbms_job.conf")
    }

    pub fn pidfile(&self) -> PathBuf {
        self.dir.path().join("pg_dbms_job.pid")
    }

    pub fn logfile(&self) -> PathBuf {
        self.dir.path().join("pg_dbms_job.log")
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.dir.path().join("no-such-socket-dir")
    }

    pub fn log(&self) -> String {
        std::fs::read_to_string(self.logfile()).unwrap_or_default()
    }

    /// `pg_dbms_job -c <config>`
    pub fn pg_dbms_job(&self) -> Cli {
        cli().args(&["-c", path_str(&self.config_path())])
    }

    /// Start `pg_dbms_job -c <config> <args>` without waiting for it.
    pub fn spawn(&self, args: &[&str]) -> std::process::Child {
        let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("pg_dbms_job"));
        for name in SCRUBBED_ENV {
            cmd.env_remove(name);
        }
        cmd.arg("-c")
            .arg(self.config_path())
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap()
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}
