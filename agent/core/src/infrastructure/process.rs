// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OS process signalling

use std::fmt;
use std::io;
use std::process::ExitStatus;

/// Signals the agent sends to its own process tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Existence probe, delivers nothing
    Probe,
    Terminate,
    Kill,
    /// Recycle a worker in place
    Hangup,
    /// Ask the manager to recycle its workers
    Reload,
}

impl Signal {
    pub fn as_raw(self) -> i32 {
        match self {
            Signal::Probe => 0,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Hangup => libc::SIGHUP,
            Signal::Reload => libc::SIGUSR1,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Probe => "0",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Hangup => "SIGHUP",
            Signal::Reload => "SIGUSR1",
        };
        f.write_str(name)
    }
}

pub trait ProcessSignaller: Send + Sync {
    /// Deliver `signal` to `pid`
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    /// Whether a zero signal to `pid` is accepted
    fn is_alive(&self, pid: u32) -> bool {
        self.signal(pid, Signal::Probe).is_ok()
    }
}

/// `kill(2)` backed signaller
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcSignaller;

impl ProcessSignaller for LibcSignaller {
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        // pid 0 and values above i32::MAX would address process groups
        let raw_pid = i32::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;

        if unsafe { libc::kill(raw_pid, signal.as_raw()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Exit code reported for a finished process; signal deaths map to 128 + signo
pub fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
