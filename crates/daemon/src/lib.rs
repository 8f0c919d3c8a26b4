// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pg_dbms_job daemon library
//!
//! The scheduling loop, its worker pool and the process lifecycle around it.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backoff;
pub mod config;
pub mod control;
pub mod env;
pub mod exec;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod recorder;
pub mod scheduler;

pub use config::{ConfigError, ConfigWarning, DaemonConfig};
pub use control::{ControlSignal, DaemonContext, Phase};
pub use exec::exec_job_from_env;
pub use lifecycle::{run, running_pid, signal_daemon, wait_released, LifecycleError, RunOptions};
pub use pool::{Launcher, PoolError, Reaped, SelfExec, WorkerPool, WorkerSlot};
pub use recorder::Recorder;
pub use scheduler::{Reloader, Scheduler, StopReason};
