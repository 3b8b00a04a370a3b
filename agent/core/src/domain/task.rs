// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Registry contract
//!
//! The registry executes dispatched commands and tracks the child processes
//! they produce. The agent core only depends on this narrow trait; the table
//! behind it must be safe to use from independent worker processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::protocol::CommandMessage;

/// One tracked task process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: Uuid,
    pub call: String,
    pub pid: u32,
    /// Pid of the worker process that dispatched the task
    pub worker_pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Live task table keyed by task pid
pub type LiveTasks = BTreeMap<u32, TaskInfo>;

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Attach the task table. Called once in the manager before the listening
    /// socket is bound.
    async fn init(&self) -> Result<(), TaskRegistryError>;

    /// Install the signal handlers the registry needs inside a freshly
    /// started worker. Must be called from within a tokio runtime.
    fn register_signal_handlers(&self) -> Result<(), TaskRegistryError>;

    /// Hand off a validated command. Returns once the command has been handed
    /// off, never waits for the task itself to finish.
    async fn dispatch(&self, message: CommandMessage);

    /// Every task whose process is still alive
    async fn list_live_tasks(&self) -> Result<LiveTasks, TaskRegistryError>;
}

#[derive(Debug, Error)]
pub enum TaskRegistryError {
    #[error("Task table unavailable at {path}: {source}")]
    TableUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install signal handler: {0}")]
    SignalHandler(std::io::Error),

    #[error("No task definition for call '{0}'")]
    UnknownCall(String),

    #[error("Failed to spawn task '{call}': {source}")]
    SpawnFailed {
        call: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt task entry {path}: {reason}")]
    CorruptEntry { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
