// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Fleet Agent
//!
//! The `fleet-agent` binary runs on every managed host.
//!
//! ## Process model
//!
//! - **Supervisor**: `fleet-agent [start|stop|restart|reload]` consults the
//!   pid marker and starts or signals the process tree
//! - **Manager**: owns the listening socket and the worker pool
//! - **Worker**: `fleet-agent --worker <id>`, spawned by the manager only
//!
//! An environment preflight runs before any action.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;

use fleet_agent::cli::Cli;
use fleet_agent::commands::Supervisor;
use fleet_agent::daemon::run_worker;
use fleet_agent::logging::{init_logging, load_config};
use fleet_agent_core::infrastructure::preflight::check_environment;
use fleet_agent_core::infrastructure::process::LibcSignaller;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = check_environment() {
        eprintln!("{} {}", "✗ Environment check failed:".red().bold(), e);
        return ExitCode::from(1);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.clone(), cli.log_level.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.format)?;

    config.validate().context("Configuration validation failed")?;
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async move {
        if let Some(worker_id) = cli.worker {
            return run_worker(worker_id, config).await;
        }

        Supervisor::new(config, Arc::new(LibcSignaller))
            .with_forwarded_args(cli.forwarded_args())
            .foreground(cli.foreground)
            .handle(cli.action)
            .await
    })
}
