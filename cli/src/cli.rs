// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command-line surface of the `fleet-agent` binary

use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

/// Supervisor actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Start the agent unless it is already running
    Start,
    /// Ask a running agent to shut down
    Stop,
    /// Stop the running agent, then start it again
    Restart,
    /// Recycle the workers of a running agent in place
    Reload,
}

/// Fleet agent - accept coordinator commands and report host liveness
#[derive(Debug, Parser)]
#[command(name = "fleet-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Action to perform
    #[arg(value_enum, default_value_t = Action::Start)]
    pub action: Action,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, env = "FLEET_AGENT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLEET_AGENT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Run the manager in this process even when daemonize is set
    #[arg(long)]
    pub foreground: bool,

    /// Internal: run as the worker process with this id
    #[arg(long, hide = true, value_name = "ID")]
    pub worker: Option<usize>,
}

impl Cli {
    /// Options a re-executed manager or worker needs to see the same configuration
    pub fn forwarded_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.clone().into_os_string());
        }
        if let Some(level) = &self.log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        args
    }
}
