// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Supervisor: agent lifecycle management
//!
//! Actions: start, stop, restart, reload. Each one consults the pid marker
//! first, so repeating an action against an unchanged tree has no effect.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::cli::Action;
use crate::daemon::{run_manager, spawn_detached};
use fleet_agent_core::{
    domain::config::ServerConfig,
    infrastructure::{
        pid_file::PidFile,
        process::{ProcessSignaller, Signal},
    },
};

const START_POLL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Extra time allowed on restart beyond the manager's own shutdown timeout
const RESTART_MARGIN: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: Arc<ServerConfig>,
    pid_file: PidFile,
    signaller: Arc<dyn ProcessSignaller>,
    forwarded_args: Vec<OsString>,
    foreground: bool,
}

impl Supervisor {
    pub fn new(config: Arc<ServerConfig>, signaller: Arc<dyn ProcessSignaller>) -> Self {
        Self {
            pid_file: PidFile::new(&config.server.pid_file),
            config,
            signaller,
            forwarded_args: Vec::new(),
            foreground: false,
        }
    }

    /// Options handed to the re-executed manager and its workers
    pub fn with_forwarded_args(mut self, args: Vec<OsString>) -> Self {
        self.forwarded_args = args;
        self
    }

    pub fn foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    /// Pid of the running manager. A marker naming a dead process, or one that
    /// cannot be read, means not running.
    pub fn running_pid(&self) -> Option<u32> {
        self.pid_file
            .read()
            .filter(|pid| self.signaller.is_alive(*pid))
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    pub async fn handle(&self, action: Action) -> Result<()> {
        match action {
            Action::Start => self.start().await,
            Action::Stop => self.stop(),
            Action::Restart => self.restart().await,
            Action::Reload => self.reload(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            println!("{}", format!("ℹ Agent already running (PID: {})", pid).yellow());
            return Ok(());
        }

        if self.foreground || !self.config.server.daemonize {
            return run_manager(Arc::clone(&self.config), self.forwarded_args.clone()).await;
        }

        let log_file = self.config.server.log_file.as_deref();
        let mut child = spawn_detached(&self.forwarded_args, log_file)?;
        let pid = child.id();
        info!("Spawned detached manager (PID: {})", pid);

        let deadline = Instant::now() + START_POLL;
        while Instant::now() < deadline {
            if self.running_pid() == Some(pid) {
                println!("{}", format!("✓ Agent started (PID: {})", pid).green());
                return Ok(());
            }
            if let Some(status) = child.try_wait().context("Failed to check agent process")? {
                println!("{}", format!("✗ Agent exited during startup ({})", status).red());
                if let Some(path) = log_file {
                    println!("  Check logs at {}", path.display());
                }
                bail!("Agent failed to start");
            }
            sleep(POLL_INTERVAL).await;
        }

        warn!("Manager (PID: {}) has not written its pid marker yet", pid);
        println!(
            "{}",
            format!(
                "⚠ Agent starting (PID: {}) but has not reported yet, check {}",
                pid,
                self.pid_file.path().display()
            )
            .yellow()
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let Some(pid) = self.running_pid() else {
            println!("{}", "ℹ Agent not running".yellow());
            return Ok(());
        };

        info!("Sending {} to agent (PID: {})", Signal::Terminate, pid);
        match self.signaller.signal(pid, Signal::Terminate) {
            Ok(()) => {
                println!("{}", format!("✓ Stop signal sent to agent (PID: {})", pid).green());
                Ok(())
            }
            Err(e) => {
                println!("{}", format!("✗ Failed to stop agent (PID: {}): {}", pid, e).red());
                Err(anyhow::Error::new(e).context(format!("Failed to signal process {}", pid)))
            }
        }
    }

    pub async fn restart(&self) -> Result<()> {
        if self.is_running() {
            self.stop()?;

            let deadline = Instant::now() + self.config.server.shutdown_timeout + RESTART_MARGIN;
            while self.is_running() {
                if Instant::now() >= deadline {
                    println!("{}", "✗ Agent did not stop in time, not restarting".red());
                    bail!("Agent did not stop within timeout");
                }
                sleep(POLL_INTERVAL).await;
            }
        }
        self.start().await
    }

    pub fn reload(&self) -> Result<()> {
        let Some(pid) = self.running_pid() else {
            println!("{}", "ℹ Agent not running".yellow());
            return Ok(());
        };

        self.signaller
            .signal(pid, Signal::Reload)
            .with_context(|| format!("Failed to signal process {}", pid))?;
        println!("{}", format!("✓ Reloading agent workers (PID: {})", pid).green());
        Ok(())
    }
}
