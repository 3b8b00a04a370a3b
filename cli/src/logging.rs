// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tracing setup
//!
//! The configured level and format are only known once the config file has
//! been read, so loading runs under a temporary stderr subscriber.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use fleet_agent_core::domain::config::{LogFormat, ServerConfig};

/// Level used while the configuration is being loaded
pub const BOOTSTRAP_LOG_LEVEL: &str = "info";

fn log_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")
}

/// Load the configuration, logging discovery and environment overrides to
/// stderr
pub fn load_config(path: Option<PathBuf>, level: Option<&str>) -> Result<ServerConfig> {
    load_config_logging_to(path, level, std::io::stderr)
}

/// Load the configuration, logging discovery and environment overrides to
/// `writer`
pub fn load_config_logging_to<W>(
    path: Option<PathBuf>,
    level: Option<&str>,
    writer: W,
) -> Result<ServerConfig>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level.unwrap_or(BOOTSTRAP_LOG_LEVEL))?)
        .with_writer(writer)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::with_default(subscriber, || ServerConfig::load_or_default(path))
        .context("Failed to load configuration")
}

/// Initialize tracing subscriber for logging
pub fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level)?)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
