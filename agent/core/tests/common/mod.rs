// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hand-rolled collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use fleet_agent_core::domain::config::ServerConfig;
use fleet_agent_core::domain::protocol::CommandMessage;
use fleet_agent_core::domain::task::{LiveTasks, TaskInfo, TaskRegistry, TaskRegistryError};
use fleet_agent_core::infrastructure::process::{LibcSignaller, ProcessSignaller, Signal};
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Records dispatched commands and reports a fixed set of live tasks
#[derive(Default)]
pub struct MockRegistry {
    pub dispatched: Mutex<Vec<CommandMessage>>,
    pub live: Mutex<LiveTasks>,
    pub init_calls: Mutex<usize>,
}

impl MockRegistry {
    pub fn with_live_pids(pids: &[u32]) -> Self {
        let registry = Self::default();
        {
            let mut live = registry.live.lock();
            for pid in pids {
                live.insert(
                    *pid,
                    TaskInfo {
                        task_id: Uuid::new_v4(),
                        call: "deploy".to_string(),
                        pid: *pid,
                        worker_pid: 1,
                        started_at: Utc::now(),
                    },
                );
            }
        }
        registry
    }

    pub fn calls(&self) -> Vec<String> {
        self.dispatched.lock().iter().map(|m| m.call.clone()).collect()
    }
}

#[async_trait]
impl TaskRegistry for MockRegistry {
    async fn init(&self) -> Result<(), TaskRegistryError> {
        *self.init_calls.lock() += 1;
        Ok(())
    }

    fn register_signal_handlers(&self) -> Result<(), TaskRegistryError> {
        Ok(())
    }

    async fn dispatch(&self, message: CommandMessage) {
        self.dispatched.lock().push(message);
    }

    async fn list_live_tasks(&self) -> Result<LiveTasks, TaskRegistryError> {
        Ok(self.live.lock().clone())
    }
}

/// Records every signal; optionally fails for some pids and optionally
/// forwards to the real `kill(2)`
#[derive(Default)]
pub struct RecordingSignaller {
    pub sent: Mutex<Vec<(u32, Signal)>>,
    pub failing: Vec<u32>,
    pub forward: bool,
}

impl RecordingSignaller {
    pub fn forwarding() -> Self {
        Self {
            forward: true,
            ..Default::default()
        }
    }

    pub fn sent_with(&self, signal: Signal) -> Vec<u32> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, s)| *s == signal)
            .map(|(pid, _)| *pid)
            .collect()
    }
}

impl ProcessSignaller for RecordingSignaller {
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        if signal != Signal::Probe {
            self.sent.lock().push((pid, signal));
        }
        if self.failing.contains(&pid) {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }
        if self.forward {
            return LibcSignaller.signal(pid, signal);
        }
        Ok(())
    }
}

/// In-memory sink for tracing output
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Plain-text subscriber writing into this capture
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .compact()
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Loopback config with every runtime path inside `dir`
pub fn test_config(dir: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listen.host = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.server.pid_file = dir.join("agent.pid");
    config.server.respawn_delay = Duration::from_millis(20);
    config.server.shutdown_timeout = Duration::from_secs(2);
    config.tasks.state_dir = dir.join("tasks");
    config
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
