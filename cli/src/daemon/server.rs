// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Manager and worker process entry points

use anyhow::{bail, Result};
use std::ffi::OsString;
use std::sync::Arc;
use tracing::info;

use fleet_agent_core::{
    domain::config::ServerConfig,
    infrastructure::{
        process::{LibcSignaller, ProcessSignaller},
        task_registry::ProcessTaskRegistry,
    },
    runtime::{listener_from_env, Manager, Worker, WorkerLauncher},
};

/// Run the manager in this process until the tree shuts down.
///
/// `forwarded_args` are passed to every worker so it loads the same
/// configuration.
pub async fn run_manager(config: Arc<ServerConfig>, forwarded_args: Vec<OsString>) -> Result<()> {
    info!("Fleet agent manager starting (PID: {})", std::process::id());

    let signaller: Arc<dyn ProcessSignaller> = Arc::new(LibcSignaller);
    let registry = Arc::new(ProcessTaskRegistry::new(
        &config.tasks,
        Arc::clone(&signaller),
    ));
    let launcher = WorkerLauncher::current_exe(forwarded_args)?;

    Manager::new(config, registry, signaller, launcher).run().await
}

/// Run worker `worker_id` on the listener inherited from the manager
pub async fn run_worker(worker_id: usize, config: Arc<ServerConfig>) -> Result<()> {
    if worker_id >= config.server.worker_num {
        bail!(
            "Worker id {} out of range, pool size is {}",
            worker_id,
            config.server.worker_num
        );
    }

    let listener = listener_from_env()?;
    let signaller: Arc<dyn ProcessSignaller> = Arc::new(LibcSignaller);
    let registry = Arc::new(ProcessTaskRegistry::new(
        &config.tasks,
        Arc::clone(&signaller),
    ));

    let reason = Worker::new(worker_id, config, registry, signaller)
        .run(listener)
        .await?;
    info!(worker_id, ?reason, "Worker exiting");
    Ok(())
}
