// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Detaching the manager from the invoking terminal
//! - Manager and worker process entry points

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::info;

pub mod server;

pub use server::{run_manager, run_worker};

/// Re-execute this binary as a foreground manager in its own process group.
///
/// stdout and stderr of the whole tree go to `log_file`, or are discarded.
pub fn spawn_detached(forwarded_args: &[OsString], log_file: Option<&Path>) -> Result<Child> {
    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = Command::new(current_exe);
    cmd.arg("--foreground").args(forwarded_args);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let (stdout, stderr) = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            let clone = file.try_clone().context("Failed to duplicate log file handle")?;
            info!("Redirecting agent output to {:?}", path);
            (Stdio::from(file), Stdio::from(clone))
        }
        None => (Stdio::null(), Stdio::null()),
    };
    cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);

    cmd.spawn().context("Failed to spawn agent process")
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))
}
