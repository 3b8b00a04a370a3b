// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pid marker
//!
//! A single integer process id at a well-known path. A missing or unreadable
//! marker means "not running". Removal tolerates concurrent deletes from
//! several terminating workers.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("Failed to create directory for PID file {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write PID file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `pid`, replacing any previous marker
    pub fn write(&self, pid: u32) -> Result<(), PidFileError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PidFileError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(&self.path, pid.to_string()).map_err(|source| PidFileError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!("Wrote PID file: {:?} (pid {})", self.path, pid);
        Ok(())
    }

    /// Stored pid, or `None` when the marker is missing, unreadable or not a
    /// positive integer
    pub fn read(&self) -> Option<u32> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
    }

    /// Whether the marker exists and can be opened for writing
    pub fn is_writable(&self) -> bool {
        OpenOptions::new().write(true).open(&self.path).is_ok()
    }

    /// Remove the marker. Not writable or already gone are both fine.
    pub fn clear(&self) {
        if !self.is_writable() {
            debug!("PID file {:?} absent or not writable, nothing to clear", self.path);
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed PID file: {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("PID file {:?} already removed", self.path);
            }
            Err(e) => warn!("Failed to remove PID file {:?}: {}", self.path, e),
        }
    }
}
