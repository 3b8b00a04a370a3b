// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lifecycle tests
//!
//! Manager shutdown terminates live tasks, and a manager driving real
//! (shell) worker processes respawns, reloads and shuts down its pool
//! while keeping its pid marker in place.

mod common;

use common::{eventually, test_config, LogCapture, MockRegistry, RecordingSignaller};
use fleet_agent_core::application::lifecycle::WorkerLifecycleController;
use fleet_agent_core::domain::config::ServerConfig;
use fleet_agent_core::domain::lifecycle::{LifecycleEvent, LifecyclePhase, WorkerStopReason};
use fleet_agent_core::infrastructure::pid_file::PidFile;
use fleet_agent_core::infrastructure::process::Signal;
use fleet_agent_core::runtime::{Manager, ManagerSignal, WorkerLauncher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_manager_stop_terminates_every_live_task() {
    let registry = Arc::new(MockRegistry::with_live_pids(&[101, 202]));
    let signaller = Arc::new(RecordingSignaller::default());
    let controller = WorkerLifecycleController::for_manager(
        Arc::new(ServerConfig::default()),
        registry,
        signaller.clone(),
    );

    controller.handle(LifecycleEvent::ManagerStart).await.unwrap();
    controller.handle(LifecycleEvent::ManagerStop).await.unwrap();

    assert_eq!(signaller.sent_with(Signal::Terminate), vec![101, 202]);
    assert_eq!(controller.phase(), LifecyclePhase::ManagerStopped);
}

#[tokio::test]
async fn test_manager_stop_continues_past_failed_signal() {
    let registry = Arc::new(MockRegistry::with_live_pids(&[101, 202, 303]));
    let signaller = Arc::new(RecordingSignaller {
        failing: vec![101],
        ..Default::default()
    });
    let controller = WorkerLifecycleController::for_manager(
        Arc::new(ServerConfig::default()),
        registry,
        signaller.clone(),
    );

    controller.handle(LifecycleEvent::ManagerStart).await.unwrap();
    controller.handle(LifecycleEvent::ManagerStop).await.unwrap();

    assert_eq!(signaller.sent_with(Signal::Terminate), vec![101, 202, 303]);
}

#[tokio::test]
async fn test_worker_stop_clears_marker_only_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let marker = PidFile::new(&config.server.pid_file);
    marker.write(4242).unwrap();

    let recycled = WorkerLifecycleController::for_worker(
        1,
        Arc::clone(&config),
        Arc::new(MockRegistry::default()),
        Arc::new(RecordingSignaller::default()),
    );
    recycled
        .handle(LifecycleEvent::WorkerStart { worker_id: 1 })
        .await
        .unwrap();
    recycled
        .handle(LifecycleEvent::WorkerStop {
            worker_id: 1,
            reason: WorkerStopReason::Recycle,
        })
        .await
        .unwrap();
    assert_eq!(marker.read(), Some(4242));

    let stopped = WorkerLifecycleController::for_worker(
        2,
        Arc::clone(&config),
        Arc::new(MockRegistry::default()),
        Arc::new(RecordingSignaller::default()),
    );
    stopped
        .handle(LifecycleEvent::WorkerStart { worker_id: 2 })
        .await
        .unwrap();
    stopped
        .handle(LifecycleEvent::WorkerStop {
            worker_id: 2,
            reason: WorkerStopReason::Shutdown,
        })
        .await
        .unwrap();
    assert_eq!(marker.read(), None);

    // A second worker finding the marker already gone is not an error
    marker.clear();
}

fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

/// Workers are `sh -c <script> <log>`; the script sees the log path as `$0`
/// and the appended `--worker <id>` as `$1 $2`
fn shell_launcher(script: &str, log: &Path) -> WorkerLauncher {
    WorkerLauncher::new(
        "/bin/sh",
        vec!["-c".into(), script.into(), log.as_os_str().to_owned()],
    )
}

async fn start_manager(
    config: ServerConfig,
    launcher: WorkerLauncher,
    signaller: Arc<RecordingSignaller>,
) -> (
    mpsc::UnboundedSender<ManagerSignal>,
    tokio::task::JoinHandle<anyhow::Result<()>>,
    Arc<MockRegistry>,
) {
    let registry = Arc::new(MockRegistry::default());
    let manager = Manager::new(Arc::new(config), registry.clone(), signaller, launcher);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(manager.run_with(rx));
    (tx, handle, registry)
}

#[tokio::test]
async fn test_manager_runs_pool_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.server.worker_num = 2;
    let marker = PidFile::new(&config.server.pid_file);
    let log = dir.path().join("spawns.log");

    let signaller = Arc::new(RecordingSignaller::forwarding());
    let (tx, handle, registry) = start_manager(
        config,
        shell_launcher("echo \"$2\" >> \"$0\"; exec sleep 30", &log),
        signaller.clone(),
    )
    .await;

    assert!(eventually(Duration::from_secs(5), || line_count(&log) == 2).await);
    assert_eq!(marker.read(), Some(std::process::id()));
    assert_eq!(*registry.init_calls.lock(), 1);

    let mut ids: Vec<String> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["0", "1"]);

    tx.send(ManagerSignal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("manager did not shut down")
        .unwrap()
        .unwrap();

    assert_eq!(signaller.sent_with(Signal::Terminate).len(), 2);
    assert!(signaller.sent_with(Signal::Kill).is_empty());
    assert_eq!(marker.read(), None);
}

#[tokio::test]
async fn test_manager_respawns_exited_workers() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.server.worker_num = 1;
    let recycled_log = dir.path().join("recycled.log");

    let (tx, handle, _) = start_manager(
        config.clone(),
        shell_launcher("echo up >> \"$0\"; exit 0", &recycled_log),
        Arc::new(RecordingSignaller::forwarding()),
    )
    .await;
    assert!(eventually(Duration::from_secs(5), || line_count(&recycled_log) >= 3).await);
    tx.send(ManagerSignal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();

    let crashed_dir = TempDir::new().unwrap();
    let mut config = test_config(crashed_dir.path());
    config.server.worker_num = 1;
    let crashed_log = crashed_dir.path().join("crashed.log");

    let (tx, handle, _) = start_manager(
        config,
        shell_launcher("echo up >> \"$0\"; exit 3", &crashed_log),
        Arc::new(RecordingSignaller::forwarding()),
    )
    .await;
    assert!(eventually(Duration::from_secs(5), || line_count(&crashed_log) >= 3).await);
    tx.send(ManagerSignal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reload_hangs_up_every_worker() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.server.worker_num = 2;
    let log = dir.path().join("spawns.log");

    let signaller = Arc::new(RecordingSignaller::forwarding());
    let (tx, handle, _) = start_manager(
        config,
        shell_launcher("echo \"$2\" >> \"$0\"; exec sleep 30", &log),
        signaller.clone(),
    )
    .await;
    assert!(eventually(Duration::from_secs(5), || line_count(&log) == 2).await);

    tx.send(ManagerSignal::Reload).unwrap();
    assert!(eventually(Duration::from_secs(5), || line_count(&log) == 4).await);
    assert_eq!(signaller.sent_with(Signal::Hangup).len(), 2);

    tx.send(ManagerSignal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
}

fn first_line(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_crashed_worker_is_reported_with_pid_and_exit_code() {
    let logs = LogCapture::default();
    let _guard = tracing::subscriber::set_default(logs.subscriber());

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.server.worker_num = 1;
    let log = dir.path().join("crashed.log");

    let (tx, handle, _) = start_manager(
        config,
        shell_launcher("echo $$ >> \"$0\"; exit 3", &log),
        Arc::new(RecordingSignaller::forwarding()),
    )
    .await;
    assert!(eventually(Duration::from_secs(5), || line_count(&log) >= 2).await);
    tx.send(ManagerSignal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();

    let first_pid = first_line(&log);
    let output = logs.contents();
    assert!(output.contains("Worker process exited abnormally"), "{}", output);
    assert!(
        output.contains(&format!("worker_id=0 pid={} exit_code=3", first_pid)),
        "{}",
        output
    );
}

#[tokio::test]
async fn test_worker_shutdown_under_running_manager_keeps_marker() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.server.worker_num = 1;
    let marker = PidFile::new(&config.server.pid_file);
    let log = dir.path().join("spawns.log");

    // The first worker stops the way a SIGTERM'd worker does: it clears the
    // marker and exits 0. Its replacement stays up.
    let script = format!(
        "if [ ! -e \"$0.stopped\" ]; then touch \"$0.stopped\"; rm -f '{}'; exit 0; fi; \
         echo up >> \"$0\"; exec sleep 30",
        marker.path().display()
    );
    let (tx, handle, _) = start_manager(
        config,
        shell_launcher(&script, &log),
        Arc::new(RecordingSignaller::forwarding()),
    )
    .await;

    assert!(eventually(Duration::from_secs(5), || line_count(&log) == 1).await);
    assert_eq!(marker.read(), Some(std::process::id()));

    tx.send(ManagerSignal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(marker.read(), None);
}
