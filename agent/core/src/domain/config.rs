// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Server Configuration
//
// Defines the configuration schema for a fleet agent host, including:
// - Listening socket and worker pool shape
// - Coordinator endpoint and heartbeat cadence
// - Pid marker and daemon settings
// - Task definitions the Task Registry may launch
// - Logging settings
//
// Loaded once by the Supervisor, validated, then shared read-only as
// `Arc<ServerConfig>` with every component.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Inbound command socket
    #[serde(default)]
    pub listen: ListenConfig,

    /// Coordinator ("center") endpoint heartbeats are sent to
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Heartbeat cadence and address reporting
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Process tree settings
    #[serde(default)]
    pub server: ProcessConfig,

    /// Task Registry settings
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,

    #[serde(default = "default_listen_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coordinator_host")]
    pub host: String,

    #[serde(default = "default_coordinator_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between two heartbeat ticks
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on the outbound connect
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on writing the announcement once connected
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Address prefixes eligible for reporting, matched as plain string prefixes
    #[serde(default = "default_ip_prefixes")]
    pub ip_prefixes: Vec<String>,

    /// Reported when no local address matches `ip_prefixes`
    #[serde(default = "default_fallback_ip")]
    pub fallback_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Number of worker processes
    #[serde(default = "default_worker_num")]
    pub worker_num: usize,

    /// Requests (frames) a worker handles before it is recycled (0 = unlimited)
    #[serde(default)]
    pub max_request: u64,

    /// Split the inbound stream on `package_eof`
    #[serde(default = "default_true")]
    pub split_frames: bool,

    /// Frame delimiter
    #[serde(default = "default_package_eof")]
    pub package_eof: String,

    /// Largest frame buffered while waiting for a delimiter
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,

    /// Detach the process tree from the invoking terminal
    #[serde(default = "default_true")]
    pub daemonize: bool,

    /// Pid marker location
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// stdout/stderr destination of a daemonized tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Grace period given to workers before they are killed
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Delay before a crashed worker slot is respawned
    #[serde(default = "default_respawn_delay", with = "humantime_serde")]
    pub respawn_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Directory holding the shared task table
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Programs keyed by the `call` that launches them
    #[serde(default)]
    pub definitions: HashMap<String, TaskDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file in standard locations
    ///
    /// Search order:
    /// 1. FLEET_AGENT_CONFIG environment variable
    /// 2. ./fleet-agent.yaml
    /// 3. ~/.fleet-agent/config.yaml
    /// 4. /etc/fleet-agent/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLEET_AGENT_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let cwd = PathBuf::from("./fleet-agent.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let p = home.join(".fleet-agent").join("config.yaml");
            if p.exists() {
                return Some(p);
            }
        }

        let system = PathBuf::from("/etc/fleet-agent/config.yaml");
        if system.exists() {
            return Some(system);
        }

        None
    }

    /// Load configuration from an explicit path, a discovered path, or defaults
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides on top of the file values
    pub fn apply_env_overrides(&mut self) {
        override_parsed("FLEET_AGENT_PORT", &mut self.listen.port);
        override_parsed("FLEET_AGENT_COORDINATOR_PORT", &mut self.coordinator.port);
        override_parsed("FLEET_AGENT_WORKER_NUM", &mut self.server.worker_num);

        if let Ok(host) = std::env::var("FLEET_AGENT_COORDINATOR_HOST") {
            if !host.is_empty() {
                tracing::info!("Environment override: FLEET_AGENT_COORDINATOR_HOST={}", host);
                self.coordinator.host = host;
            }
        }

        if let Ok(path) = std::env::var("FLEET_AGENT_PID_FILE") {
            if !path.is_empty() {
                tracing::info!("Environment override: FLEET_AGENT_PID_FILE={}", path);
                self.server.pid_file = PathBuf::from(path);
            }
        }

        if let Ok(val) = std::env::var("FLEET_AGENT_DAEMONIZE") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.server.daemonize = true,
                "false" | "0" | "no" | "off" => self.server.daemonize = false,
                _ => {
                    tracing::warn!(
                        "Invalid value for FLEET_AGENT_DAEMONIZE: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.worker_num == 0 {
            anyhow::bail!("server.worker_num must be at least 1");
        }

        if self.listen.port == 0 {
            anyhow::bail!("listen.port cannot be 0");
        }

        if self.coordinator.port == 0 {
            anyhow::bail!("coordinator.port cannot be 0");
        }

        if self.server.package_eof.is_empty() {
            anyhow::bail!("server.package_eof cannot be empty");
        }

        if self.server.max_frame_length == 0 {
            anyhow::bail!("server.max_frame_length must be greater than 0");
        }

        if self.heartbeat.interval.is_zero() {
            anyhow::bail!("heartbeat.interval must be greater than 0");
        }

        if self.heartbeat.connect_timeout.is_zero() {
            anyhow::bail!("heartbeat.connect_timeout must be greater than 0");
        }

        for (call, definition) in &self.tasks.definitions {
            if definition.command.is_empty() {
                anyhow::bail!("Task definition '{}' has an empty command", call);
            }
        }

        Ok(())
    }

    /// Socket address the manager binds
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }

    /// Id of the worker that owns the heartbeat timer
    pub fn heartbeat_worker_id(&self) -> usize {
        self.server.worker_num.saturating_sub(1)
    }
}

fn override_parsed<T>(var: &str, target: &mut T)
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => {
            tracing::info!("Environment override: {}={}", var, value);
            *target = value;
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", var, raw);
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            coordinator: CoordinatorConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            server: ProcessConfig::default(),
            tasks: TasksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: default_coordinator_host(),
            port: default_coordinator_port(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            connect_timeout: default_connect_timeout(),
            send_timeout: default_connect_timeout(),
            ip_prefixes: default_ip_prefixes(),
            fallback_ip: default_fallback_ip(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            worker_num: default_worker_num(),
            max_request: 0,
            split_frames: true,
            package_eof: default_package_eof(),
            max_frame_length: default_max_frame_length(),
            daemonize: true,
            pid_file: default_pid_file(),
            log_file: None,
            shutdown_timeout: default_shutdown_timeout(),
            respawn_delay: default_respawn_delay(),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            definitions: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    9501
}

fn default_coordinator_host() -> String {
    "127.0.0.1".to_string()
}

fn default_coordinator_port() -> u16 {
    9502
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_ip_prefixes() -> Vec<String> {
    vec!["192.168".to_string(), "10.10".to_string()]
}

fn default_fallback_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_worker_num() -> usize {
    4
}

fn default_package_eof() -> String {
    "\r\n".to_string()
}

fn default_max_frame_length() -> usize {
    1024 * 1024
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("runtime/agent.pid")
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_respawn_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("runtime/tasks")
}

fn default_log_level() -> String {
    "info".to_string()
}
