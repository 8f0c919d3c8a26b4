// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command line flags and the action they select.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use dj_daemon::{ControlSignal, RunOptions};

#[derive(Debug, Parser)]
#[command(
    name = "pg_dbms_job",
    about = "Run the jobs queued in dbms_job tables of a PostgreSQL database",
    disable_version_flag = true,
    group(ArgGroup::new("signal").args(["kill", "immediate", "reload"]))
)]
pub struct Cli {
    /// Configuration file (default: $PG_DBMS_JOB_CONFIG or /etc/pg_dbms_job/pg_dbms_job.conf)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level, overriding the configuration file
    #[arg(short = 'd', long, conflicts_with = "no_debug")]
    pub debug: bool,

    /// Log at info level, overriding the configuration file
    #[arg(long)]
    pub no_debug: bool,

    /// Ask the running daemon to finish its jobs and stop
    #[arg(short = 'k', long)]
    pub kill: bool,

    /// Ask the running daemon to kill its jobs and stop now
    #[arg(short = 'm', long)]
    pub immediate: bool,

    /// Ask the running daemon to reload its configuration
    #[arg(short = 'r', long)]
    pub reload: bool,

    /// Run one selection pass in the foreground, wait for its jobs and exit
    #[arg(short = 's', long, conflicts_with = "signal")]
    pub single: bool,

    /// Print the version and exit
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Stay attached to the terminal
    #[arg(long, hide = true, conflicts_with = "signal")]
    pub foreground: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the job described by the environment (used by the daemon's workers)
    #[command(hide = true)]
    ExecJob,
}

/// What a parsed command line asks for.
#[derive(Debug)]
pub enum Action {
    Version,
    ExecJob,
    Signal { config_path: PathBuf, signal: ControlSignal },
    /// Detach from the terminal, then run.
    Detach(RunOptions),
    Foreground(RunOptions),
}

impl Cli {
    pub fn action(self) -> Action {
        if self.version {
            return Action::Version;
        }
        if let Some(Command::ExecJob) = self.command {
            return Action::ExecJob;
        }

        let config_path = self.config.unwrap_or_else(dj_daemon::env::config_path);
        let signal = if self.kill {
            Some(ControlSignal::GracefulStop)
        } else if self.immediate {
            Some(ControlSignal::ImmediateStop)
        } else if self.reload {
            Some(ControlSignal::Reload)
        } else {
            None
        };
        if let Some(signal) = signal {
            return Action::Signal { config_path, signal };
        }

        let debug = match (self.debug, self.no_debug) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let options = RunOptions { config_path, debug, single: self.single };
        if self.single || self.foreground {
            Action::Foreground(options)
        } else {
            Action::Detach(options)
        }
    }
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
