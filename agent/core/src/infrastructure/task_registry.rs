// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process-backed Task Registry
//!
//! Launches the program configured for a command's `call` and tracks it in a
//! file-per-pid table under `tasks.state_dir`. Each entry has exactly one
//! writer (the worker that spawned the task) and is published with an atomic
//! rename, so independent worker processes and the manager can share the
//! table without further coordination.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::config::{TaskDefinition, TasksConfig};
use crate::domain::protocol::CommandMessage;
use crate::domain::task::{LiveTasks, TaskInfo, TaskRegistry, TaskRegistryError};
use crate::infrastructure::process::{exit_code, ProcessSignaller};

const ENTRY_EXTENSION: &str = "json";

pub struct ProcessTaskRegistry {
    state_dir: PathBuf,
    definitions: HashMap<String, TaskDefinition>,
    signaller: Arc<dyn ProcessSignaller>,
}

impl ProcessTaskRegistry {
    pub fn new(config: &TasksConfig, signaller: Arc<dyn ProcessSignaller>) -> Self {
        Self {
            state_dir: config.state_dir.clone(),
            definitions: config.definitions.clone(),
            signaller,
        }
    }

    fn entry_path(&self, pid: u32) -> PathBuf {
        entry_path(&self.state_dir, pid)
    }

    async fn spawn_task(&self, message: &CommandMessage) -> Result<TaskInfo, TaskRegistryError> {
        let definition = self
            .definitions
            .get(&message.call)
            .ok_or_else(|| TaskRegistryError::UnknownCall(message.call.clone()))?;

        let task_id = Uuid::new_v4();
        let params = message.params.to_string();

        let mut cmd = Command::new(&definition.command);
        cmd.args(&definition.args)
            .env("FLEET_AGENT_CALL", &message.call)
            .env("FLEET_AGENT_PARAMS", &params)
            .env("FLEET_AGENT_TASK_ID", task_id.to_string())
            .stdin(Stdio::null());
        if let Some(dir) = &definition.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| TaskRegistryError::SpawnFailed {
            call: message.call.clone(),
            source,
        })?;

        let Some(pid) = child.id() else {
            // Exited and reaped before we could look at it
            let _ = child.wait().await;
            return Err(TaskRegistryError::SpawnFailed {
                call: message.call.clone(),
                source: std::io::Error::other("task exited immediately"),
            });
        };

        let info = TaskInfo {
            task_id,
            call: message.call.clone(),
            pid,
            worker_pid: std::process::id(),
            started_at: Utc::now(),
        };

        if let Err(e) = write_entry(&self.state_dir, &info).await {
            // The task keeps running, it just cannot be reaped at shutdown
            error!(pid, call = %info.call, "Failed to record task: {}", e);
        }

        let entry = self.entry_path(pid);
        let call = info.call.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    info!(pid, call = %call, exit_code = exit_code(&status), "Task finished")
                }
                Err(e) => warn!(pid, call = %call, "Failed to wait for task: {}", e),
            }
            remove_entry(&entry).await;
        });

        Ok(info)
    }

    /// Drop entries whose process no longer exists
    pub async fn prune(&self) -> Result<usize, TaskRegistryError> {
        let mut removed = 0;
        for (path, info) in self.read_entries().await? {
            if !self.signaller.is_alive(info.pid) {
                remove_entry(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Pruned {} stale task entries", removed);
        }
        Ok(removed)
    }

    async fn read_entries(&self) -> Result<Vec<(PathBuf, TaskInfo)>, TaskRegistryError> {
        let mut dir = match tokio::fs::read_dir(&self.state_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TaskRegistryError::TableUnavailable {
                    path: self.state_dir.display().to_string(),
                    source,
                })
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match read_entry(&path).await {
                Ok(Some(info)) => entries.push((path, info)),
                // Removed by its watcher between read_dir and read
                Ok(None) => {}
                Err(e) => {
                    warn!("{}", e);
                    remove_entry(&path).await;
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl TaskRegistry for ProcessTaskRegistry {
    async fn init(&self) -> Result<(), TaskRegistryError> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|source| TaskRegistryError::TableUnavailable {
                path: self.state_dir.display().to_string(),
                source,
            })?;
        self.prune().await?;
        info!(
            "Task registry attached at {:?} ({} task definitions)",
            self.state_dir,
            self.definitions.len()
        );
        Ok(())
    }

    fn register_signal_handlers(&self) -> Result<(), TaskRegistryError> {
        let mut sigchld = signal(SignalKind::child()).map_err(TaskRegistryError::SignalHandler)?;
        let registry = Self {
            state_dir: self.state_dir.clone(),
            definitions: HashMap::new(),
            signaller: Arc::clone(&self.signaller),
        };
        tokio::spawn(async move {
            while sigchld.recv().await.is_some() {
                if let Err(e) = registry.prune().await {
                    warn!("Failed to prune task table: {}", e);
                }
            }
        });
        Ok(())
    }

    async fn dispatch(&self, message: CommandMessage) {
        match self.spawn_task(&message).await {
            Ok(info) => info!(
                pid = info.pid,
                task_id = %info.task_id,
                call = %info.call,
                "Task dispatched"
            ),
            Err(TaskRegistryError::UnknownCall(call)) => {
                warn!(call = %call, "No task definition for call, dropping command")
            }
            Err(e) => error!(call = %message.call, "Failed to dispatch task: {}", e),
        }
    }

    async fn list_live_tasks(&self) -> Result<LiveTasks, TaskRegistryError> {
        let mut live = LiveTasks::new();
        for (path, info) in self.read_entries().await? {
            if self.signaller.is_alive(info.pid) {
                live.insert(info.pid, info);
            } else {
                remove_entry(&path).await;
            }
        }
        Ok(live)
    }
}

fn entry_path(state_dir: &Path, pid: u32) -> PathBuf {
    state_dir.join(format!("{}.{}", pid, ENTRY_EXTENSION))
}

async fn write_entry(state_dir: &Path, info: &TaskInfo) -> Result<(), TaskRegistryError> {
    let body = serde_json::to_vec(info).map_err(|e| TaskRegistryError::CorruptEntry {
        path: entry_path(state_dir, info.pid).display().to_string(),
        reason: e.to_string(),
    })?;
    let tmp = state_dir.join(format!(".{}.tmp", info.pid));
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, entry_path(state_dir, info.pid)).await?;
    Ok(())
}

async fn read_entry(path: &Path) -> Result<Option<TaskInfo>, TaskRegistryError> {
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| TaskRegistryError::CorruptEntry {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

async fn remove_entry(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove task entry {:?}: {}", path, e),
    }
}
