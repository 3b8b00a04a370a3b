// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Manager process
//!
//! Binds the shared listening socket, keeps `worker_num` worker slots filled
//! and drives the process-tree events of the lifecycle controller.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{LISTEN_FD_ENV, WORKER_FLAG};
use crate::application::lifecycle::WorkerLifecycleController;
use crate::domain::config::ServerConfig;
use crate::domain::lifecycle::LifecycleEvent;
use crate::domain::task::TaskRegistry;
use crate::infrastructure::pid_file::PidFile;
use crate::infrastructure::process::{exit_code, ProcessSignaller, Signal};

/// Control requests delivered to a running manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerSignal {
    Shutdown,
    /// Recycle every worker in place
    Reload,
}

/// Builds the command line of a worker process
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    base_args: Vec<OsString>,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Re-execute the running binary
    pub fn current_exe(base_args: Vec<OsString>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to get current executable path")?;
        Ok(Self::new(program, base_args))
    }

    pub fn command(&self, worker_id: usize, listen_fd: RawFd) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg(WORKER_FLAG)
            .arg(worker_id.to_string())
            .env(LISTEN_FD_ENV, listen_fd.to_string())
            .stdin(Stdio::null());

        // SAFETY: only async-signal-safe calls (fcntl, prctl) run in the child
        unsafe {
            cmd.pre_exec(move || {
                inherit_fd(listen_fd)?;
                set_parent_death_signal()
            });
        }
        cmd
    }
}

fn inherit_fd(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

enum SlotEvent {
    Exited {
        worker_id: usize,
        pid: u32,
        exit_code: i32,
    },
    RespawnDue {
        worker_id: usize,
    },
}

pub struct Manager {
    config: Arc<ServerConfig>,
    registry: Arc<dyn TaskRegistry>,
    signaller: Arc<dyn ProcessSignaller>,
    launcher: WorkerLauncher,
}

impl Manager {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<dyn TaskRegistry>,
        signaller: Arc<dyn ProcessSignaller>,
        launcher: WorkerLauncher,
    ) -> Self {
        Self {
            config,
            registry,
            signaller,
            launcher,
        }
    }

    /// Run the process tree until SIGTERM or SIGINT; SIGUSR1 reloads workers
    pub async fn run(self) -> Result<()> {
        let signals = forward_os_signals()?;
        self.run_with(signals).await
    }

    /// Run the process tree, taking control requests from `signals`. A closed
    /// channel is treated as a shutdown request.
    pub async fn run_with(self, mut signals: mpsc::UnboundedReceiver<ManagerSignal>) -> Result<()> {
        self.registry
            .init()
            .await
            .context("Failed to initialise task registry")?;

        let addr = self.config.bind_address();
        let listener = std::net::TcpListener::bind(&addr)
            .with_context(|| format!("Failed to bind to {}", addr))?;

        let pid_file = PidFile::new(&self.config.server.pid_file);
        pid_file
            .write(std::process::id())
            .context("Failed to write PID file")?;

        let controller = WorkerLifecycleController::for_manager(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.signaller),
        );
        controller.handle(LifecycleEvent::ManagerStart).await?;

        let listen_fd = listener.as_raw_fd();
        let mut slots: Vec<Option<u32>> = vec![None; self.config.server.worker_num];
        let mut events = JoinSet::new();
        for worker_id in 0..slots.len() {
            self.spawn_worker(worker_id, listen_fd, &mut slots, &mut events);
        }

        loop {
            tokio::select! {
                biased;

                request = signals.recv() => match request {
                    Some(ManagerSignal::Reload) => self.reload(&slots),
                    Some(ManagerSignal::Shutdown) | None => break,
                },

                Some(joined) = events.join_next() => match joined {
                    Ok(SlotEvent::Exited { worker_id, pid, exit_code }) => {
                        slots[worker_id] = None;
                        // A worker stopped on its own by SIGTERM clears the marker
                        restore_marker(&pid_file);
                        if exit_code == 0 {
                            info!(worker_id, pid, "Worker recycled, respawning");
                            self.spawn_worker(worker_id, listen_fd, &mut slots, &mut events);
                        } else {
                            if let Err(e) = controller
                                .handle(LifecycleEvent::WorkerError { worker_id, pid, exit_code })
                                .await
                            {
                                warn!("{}", e);
                            }
                            self.schedule_respawn(worker_id, &mut events);
                        }
                    }
                    Ok(SlotEvent::RespawnDue { worker_id }) => {
                        self.spawn_worker(worker_id, listen_fd, &mut slots, &mut events);
                    }
                    Err(e) => error!("Worker supervision task failed: {}", e),
                },
            }
        }

        info!("Shutting down worker pool");
        self.stop_workers(&mut slots, &mut events).await;
        controller.handle(LifecycleEvent::ManagerStop).await?;
        pid_file.clear();
        drop(listener);

        info!("Agent stopped");
        Ok(())
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        listen_fd: RawFd,
        slots: &mut [Option<u32>],
        events: &mut JoinSet<SlotEvent>,
    ) {
        let mut child = match self.launcher.command(worker_id, listen_fd).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(worker_id, "Failed to spawn worker: {}", e);
                self.schedule_respawn(worker_id, events);
                return;
            }
        };

        let Some(pid) = child.id() else {
            self.schedule_respawn(worker_id, events);
            return;
        };
        slots[worker_id] = Some(pid);
        info!(worker_id, pid, "Spawned worker");

        events.spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => exit_code(&status),
                Err(e) => {
                    warn!(worker_id, pid, "Failed to wait for worker: {}", e);
                    -1
                }
            };
            SlotEvent::Exited {
                worker_id,
                pid,
                exit_code,
            }
        });
    }

    fn schedule_respawn(&self, worker_id: usize, events: &mut JoinSet<SlotEvent>) {
        let delay = self.config.server.respawn_delay;
        events.spawn(async move {
            sleep(delay).await;
            SlotEvent::RespawnDue { worker_id }
        });
    }

    fn reload(&self, slots: &[Option<u32>]) {
        info!("Reloading workers");
        for (worker_id, pid) in slots.iter().enumerate() {
            if let Some(pid) = pid {
                if let Err(e) = self.signaller.signal(*pid, Signal::Hangup) {
                    warn!(worker_id, pid, "Failed to signal worker: {}", e);
                }
            }
        }
    }

    async fn stop_workers(&self, slots: &mut [Option<u32>], events: &mut JoinSet<SlotEvent>) {
        for (worker_id, pid) in slots.iter().enumerate() {
            if let Some(pid) = pid {
                if let Err(e) = self.signaller.signal(*pid, Signal::Terminate) {
                    warn!(worker_id, pid, "Failed to signal worker: {}", e);
                }
            }
        }

        let deadline = sleep(self.config.server.shutdown_timeout);
        tokio::pin!(deadline);

        while slots.iter().any(Option::is_some) {
            tokio::select! {
                _ = &mut deadline => break,
                joined = events.join_next() => match joined {
                    Some(Ok(SlotEvent::Exited { worker_id, pid, exit_code })) => {
                        slots[worker_id] = None;
                        info!(worker_id, pid, exit_code, "Worker exited");
                    }
                    Some(Ok(SlotEvent::RespawnDue { .. })) | Some(Err(_)) => {}
                    None => break,
                },
            }
        }

        for (worker_id, pid) in slots.iter().enumerate() {
            if let Some(pid) = pid {
                warn!(worker_id, pid, "Worker did not stop in time, killing");
                if let Err(e) = self.signaller.signal(*pid, Signal::Kill) {
                    warn!(worker_id, pid, "Failed to kill worker: {}", e);
                }
            }
        }
        events.shutdown().await;
    }
}

/// Point the marker back at this manager if a worker removed or replaced it
fn restore_marker(pid_file: &PidFile) {
    let pid = std::process::id();
    if pid_file.read() == Some(pid) {
        return;
    }
    match pid_file.write(pid) {
        Ok(()) => info!(pid, "Restored PID file"),
        Err(e) => error!(pid, "Failed to restore PID file: {}", e),
    }
}

fn forward_os_signals() ->Result<mpsc::UnboundedReceiver<ManagerSignal>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handlers = [
        (SignalKind::terminate(), ManagerSignal::Shutdown),
        (SignalKind::interrupt(), ManagerSignal::Shutdown),
        (SignalKind::user_defined1(), ManagerSignal::Reload),
    ];

    for (kind, request) in handlers {
        let mut stream = signal(kind)
            .with_context(|| format!("Failed to install {:?} handler", kind))?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!(?request, "Received signal");
                if tx.send(request).is_err() {
                    break;
                }
            }
        });
    }
    Ok(rx)
}
