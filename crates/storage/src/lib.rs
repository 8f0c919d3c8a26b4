// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dj-storage: store gateway for the dbms_job tables

mod error;
mod gateway;
pub mod postgres;

#[cfg(any(test, feature = "test-support"))]
mod memory;

pub use error::{ExecError, StoreError};
pub use gateway::{
    Channel, ConnectTarget, Connector, Gateway, JobStore, Notification, NotificationSource,
};
pub use postgres::{PgConnector, PgStore};

#[cfg(any(test, feature = "test-support"))]
pub use memory::{
    ChannelNotifications, MemoryConnector, MemoryStore, NotificationSender, StoredJob,
};
