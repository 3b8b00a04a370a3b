// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Worker Lifecycle Controller
//!
//! Reacts to the process-tree events raised by the runtime. Each process owns
//! one controller; the manager's controller starts in `ManagerStarting`, a
//! worker's in `WorkerStarting(id)`.
//!
//! ## Handlers
//! | Event | Action |
//! |-------|--------|
//! | `ManagerStart` | operator-visible "started" notice |
//! | `WorkerStart(id)` | install stop signals, registry signal handlers; the last worker id also starts the heartbeat timer |
//! | `WorkerError(id, pid, exit_code)` | diagnostic only, the runtime respawns the slot |
//! | `WorkerStop(id)` | stop the heartbeat; on tree shutdown clear the pid marker |
//! | `ManagerStop` | terminate every live task so none is orphaned |

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::heartbeat::HeartbeatReporter;
use crate::domain::config::ServerConfig;
use crate::domain::lifecycle::{LifecycleError, LifecycleEvent, LifecyclePhase, WorkerStopReason};
use crate::domain::task::TaskRegistry;
use crate::infrastructure::pid_file::PidFile;
use crate::infrastructure::process::{ProcessSignaller, Signal};

/// Receives the reason a worker has been asked to stop
pub type StopReceiver = watch::Receiver<Option<WorkerStopReason>>;

pub struct WorkerLifecycleController {
    config: Arc<ServerConfig>,
    registry: Arc<dyn TaskRegistry>,
    signaller: Arc<dyn ProcessSignaller>,
    pid_file: PidFile,
    heartbeat: HeartbeatReporter,
    phase: Mutex<LifecyclePhase>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<Option<WorkerStopReason>>,
}

impl WorkerLifecycleController {
    fn new(
        config: Arc<ServerConfig>,
        registry: Arc<dyn TaskRegistry>,
        signaller: Arc<dyn ProcessSignaller>,
        initial: LifecyclePhase,
    ) -> Self {
        let (stop_tx, _) = watch::channel(None);
        Self {
            pid_file: PidFile::new(&config.server.pid_file),
            heartbeat: HeartbeatReporter::new(Arc::clone(&config)),
            config,
            registry,
            signaller,
            phase: Mutex::new(initial),
            heartbeat_task: Mutex::new(None),
            stop_tx,
        }
    }

    /// Controller for the manager process
    pub fn for_manager(
        config: Arc<ServerConfig>,
        registry: Arc<dyn TaskRegistry>,
        signaller: Arc<dyn ProcessSignaller>,
    ) -> Self {
        Self::new(config, registry, signaller, LifecyclePhase::ManagerStarting)
    }

    /// Controller for the worker process with id `worker_id`
    pub fn for_worker(
        worker_id: usize,
        config: Arc<ServerConfig>,
        registry: Arc<dyn TaskRegistry>,
        signaller: Arc<dyn ProcessSignaller>,
    ) -> Self {
        Self::new(
            config,
            registry,
            signaller,
            LifecyclePhase::WorkerStarting(worker_id),
        )
    }

    /// Use a specific reporter for the heartbeat timer
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatReporter) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock()
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe to stop requests for this worker
    pub fn stop_requested(&self) -> StopReceiver {
        self.stop_tx.subscribe()
    }

    /// Ask the worker to leave its accept loop. The first reason wins.
    pub fn request_stop(&self, reason: WorkerStopReason) {
        record_stop_reason(&self.stop_tx, reason);
    }

    /// Apply `event`: validate the transition, then run its handler
    pub async fn handle(&self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        {
            let mut phase = self.phase.lock();
            *phase = phase.on_event(&event)?;
        }

        match event {
            LifecycleEvent::ManagerStart => self.on_manager_start(),
            LifecycleEvent::WorkerStart { worker_id } => self.on_worker_start(worker_id),
            LifecycleEvent::WorkerError {
                worker_id,
                pid,
                exit_code,
            } => self.on_worker_error(worker_id, pid, exit_code),
            LifecycleEvent::WorkerStop { worker_id, reason } => {
                self.on_worker_stop(worker_id, reason)
            }
            LifecycleEvent::ManagerStop => self.on_manager_stop().await,
        }

        let mut phase = self.phase.lock();
        *phase = phase.settle();
        Ok(())
    }

    fn on_manager_start(&self) {
        info!(
            pid = std::process::id(),
            workers = self.config.server.worker_num,
            "Agent started, listening on {}",
            self.config.bind_address()
        );
        println!("Agent started (PID: {})", std::process::id());
    }

    fn on_worker_start(&self, worker_id: usize) {
        self.install_stop_signals(worker_id);

        if let Err(e) = self.registry.register_signal_handlers() {
            error!(worker_id, "Failed to register task registry signal handlers: {}", e);
        }

        if worker_id == self.config.heartbeat_worker_id() {
            info!(
                worker_id,
                "Starting heartbeat every {:?} to {}:{}",
                self.config.heartbeat.interval,
                self.config.coordinator.host,
                self.config.coordinator.port
            );
            let task = self.heartbeat.clone().spawn();
            *self.heartbeat_task.lock() = Some(task);
        }

        info!(worker_id, pid = std::process::id(), "Worker started");
    }

    fn install_stop_signals(&self, worker_id: usize) {
        let stops = [
            (SignalKind::terminate(), WorkerStopReason::Shutdown),
            (SignalKind::interrupt(), WorkerStopReason::Shutdown),
            (SignalKind::hangup(), WorkerStopReason::Recycle),
        ];

        for (kind, reason) in stops {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    error!(worker_id, "Failed to install {:?} handler: {}", kind, e);
                    continue;
                }
            };
            let stop_tx = self.stop_tx.clone();
            tokio::spawn(async move {
                if stream.recv().await.is_some() {
                    record_stop_reason(&stop_tx, reason);
                }
            });
        }
    }

    fn on_worker_error(&self, worker_id: usize, pid: u32, exit_code: i32) {
        error!(
            worker_id,
            pid, exit_code, "Worker process exited abnormally"
        );
    }

    fn on_worker_stop(&self, worker_id: usize, reason: WorkerStopReason) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }

        if reason == WorkerStopReason::Shutdown && self.pid_file.is_writable() {
            self.pid_file.clear();
        }

        info!(worker_id, ?reason, "Worker stopped");
    }

    async fn on_manager_stop(&self) {
        let tasks = match self.registry.list_live_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Failed to list live tasks at shutdown: {}", e);
                Default::default()
            }
        };

        for (pid, task) in &tasks {
            match self.signaller.signal(*pid, Signal::Terminate) {
                Ok(()) => info!(pid, call = %task.call, "Terminated task"),
                Err(e) => warn!(pid, call = %task.call, "Failed to terminate task: {}", e),
            }
        }

        info!(terminated = tasks.len(), "Manager stopped");
    }
}

/// Record `reason` unless a stop has already been requested
fn record_stop_reason(
    stop_tx: &watch::Sender<Option<WorkerStopReason>>,
    reason: WorkerStopReason,
) {
    stop_tx.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(reason);
            true
        } else {
            false
        }
    });
}
