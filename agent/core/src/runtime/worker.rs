// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Worker process
//!
//! Accepts connections on the listener inherited from the manager and hands
//! each one to the Command Receiver until a stop is requested. A recycled
//! worker stops accepting but keeps serving the connections it already holds.

use anyhow::{bail, Context, Result};
use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::LISTEN_FD_ENV;
use crate::application::command_receiver::CommandReceiver;
use crate::application::lifecycle::WorkerLifecycleController;
use crate::domain::config::ServerConfig;
use crate::domain::lifecycle::{LifecycleEvent, WorkerStopReason};
use crate::domain::task::TaskRegistry;
use crate::infrastructure::frame_codec::FrameCodec;
use crate::infrastructure::process::ProcessSignaller;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Adopt the listening socket passed down by the manager
pub fn listener_from_env() -> Result<std::net::TcpListener> {
    let raw = std::env::var(LISTEN_FD_ENV)
        .with_context(|| format!("{} is not set, workers are started by the manager", LISTEN_FD_ENV))?;
    let fd: RawFd = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {:?}", LISTEN_FD_ENV, raw))?;

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        bail!(
            "Inherited descriptor {} is not open: {}",
            fd,
            std::io::Error::last_os_error()
        );
    }
    // Task processes spawned by this worker must not hold the socket open
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        bail!(
            "Failed to mark descriptor {} close-on-exec: {}",
            fd,
            std::io::Error::last_os_error()
        );
    }

    // SAFETY: the descriptor is open and owned by nothing else in this process
    Ok(unsafe { std::net::TcpListener::from_raw_fd(fd) })
}

pub struct Worker {
    worker_id: usize,
    config: Arc<ServerConfig>,
    registry: Arc<dyn TaskRegistry>,
    signaller: Arc<dyn ProcessSignaller>,
}

impl Worker {
    pub fn new(
        worker_id: usize,
        config: Arc<ServerConfig>,
        registry: Arc<dyn TaskRegistry>,
        signaller: Arc<dyn ProcessSignaller>,
    ) -> Self {
        Self {
            worker_id,
            config,
            registry,
            signaller,
        }
    }

    /// Serve `listener` until the worker is asked to stop. Returns the reason
    /// it stopped.
    pub async fn run(self, listener: std::net::TcpListener) -> Result<WorkerStopReason> {
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;
        let listener = TcpListener::from_std(listener).context("Failed to adopt listener")?;

        let controller = Arc::new(WorkerLifecycleController::for_worker(
            self.worker_id,
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.signaller),
        ));
        let mut stop = controller.stop_requested();
        controller
            .handle(LifecycleEvent::WorkerStart {
                worker_id: self.worker_id,
            })
            .await?;

        let worker_id = self.worker_id;
        let limit = self.config.server.max_request;
        let stopper = Arc::clone(&controller);
        let receiver = Arc::new(CommandReceiver::new(Arc::clone(&self.registry)).with_request_limit(
            limit,
            Box::new(move || {
                info!(worker_id, limit, "Request limit reached, recycling worker");
                stopper.request_stop(WorkerStopReason::Recycle);
            }),
        ));

        let mut connections = JoinSet::new();
        let reason = loop {
            let requested = *stop.borrow_and_update();
            if let Some(reason) = requested {
                break reason;
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break WorkerStopReason::Shutdown;
                    }
                }
                Some(_) = connections.join_next() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let receiver = Arc::clone(&receiver);
                        let codec = FrameCodec::from_config(&self.config.server);
                        connections.spawn(async move {
                            receiver.serve(stream, codec, &peer.to_string()).await;
                        });
                    }
                    Err(e) => {
                        warn!(worker_id, "Failed to accept connection: {}", e);
                        // EMFILE and friends persist until a connection closes
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        };

        // New connections go to the other workers from here on
        drop(listener);
        if reason == WorkerStopReason::Recycle {
            self.drain(&mut connections).await;
        }
        connections.shutdown().await;

        controller
            .handle(LifecycleEvent::WorkerStop { worker_id, reason })
            .await?;
        Ok(reason)
    }

    /// Keep serving accepted connections until their peers close them or
    /// `shutdown_timeout` passes
    async fn drain(&self, connections: &mut JoinSet<()>) {
        if connections.is_empty() {
            return;
        }

        let limit = self.config.server.shutdown_timeout;
        info!(
            worker_id = self.worker_id,
            open = connections.len(),
            "Draining open connections"
        );
        let drained = timeout(limit, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                worker_id = self.worker_id,
                open = connections.len(),
                "Connections still open after {:?}, closing",
                limit
            );
        }
    }
}
