// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Heartbeat Reporter
//!
//! Runs inside exactly one worker. Every tick opens a short-lived connection to
//! the coordinator and announces this agent's hostname, reportable address and
//! listening port. Failures are logged and skipped; the coordinator detects a
//! dead agent by the absence of heartbeats.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error};

use crate::domain::config::ServerConfig;
use crate::domain::protocol::{HeartbeatMessage, ProtocolError};
use crate::infrastructure::local_ip::{local_ipv4_addrs, select_report_ip};

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("Connect to coordinator {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Connect to coordinator {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sending heartbeat to {addr} failed: {reason}")]
    Send { addr: String, reason: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Source of candidate local addresses
pub type AddressSource = Arc<dyn Fn() -> Vec<IpAddr> + Send + Sync>;

#[derive(Clone)]
pub struct HeartbeatReporter {
    config: Arc<ServerConfig>,
    hostname: String,
    addresses: AddressSource,
}

impl HeartbeatReporter {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            config,
            hostname,
            addresses: Arc::new(local_ipv4_addrs),
        }
    }

    /// Replace interface enumeration, used where the host's interfaces
    /// should not leak into the announcement
    pub fn with_address_source(mut self, addresses: AddressSource) -> Self {
        self.addresses = addresses;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    fn coordinator_addr(&self) -> String {
        format!(
            "{}:{}",
            self.config.coordinator.host, self.config.coordinator.port
        )
    }

    /// Announcement for the current tick
    pub fn build_message(&self) -> HeartbeatMessage {
        let heartbeat = &self.config.heartbeat;
        let ip = select_report_ip(
            &(self.addresses)(),
            &heartbeat.ip_prefixes,
            &heartbeat.fallback_ip,
        );
        HeartbeatMessage::new(self.hostname.clone(), ip, self.config.listen.port)
    }

    /// One heartbeat: connect, announce, close
    pub async fn beat(&self) -> Result<(), HeartbeatError> {
        let addr = self.coordinator_addr();
        let connect_timeout = self.config.heartbeat.connect_timeout;

        let mut stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Err(_) => {
                return Err(HeartbeatError::ConnectTimeout {
                    addr,
                    timeout: connect_timeout,
                })
            }
            Ok(Err(source)) => return Err(HeartbeatError::Connect { addr, source }),
            Ok(Ok(stream)) => stream,
        };

        let mut frame = self.build_message().to_json()?;
        frame.push_str(&self.config.server.package_eof);

        let send = async {
            stream.write_all(frame.as_bytes()).await?;
            stream.shutdown().await
        };
        match timeout(self.config.heartbeat.send_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HeartbeatError::Send {
                addr,
                reason: e.to_string(),
            }),
            Err(_) => Err(HeartbeatError::Send {
                addr,
                reason: "timed out".to_string(),
            }),
        }
    }

    /// Start the repeating timer on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut ticker = interval(self.config.heartbeat.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.beat().await {
                Ok(()) => debug!("Heartbeat sent to {}", self.coordinator_addr()),
                Err(e) => error!("Heartbeat failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listen.port = 9601;
        config
    }

    #[test]
    fn test_message_prefers_private_range() {
        let reporter = HeartbeatReporter::new(Arc::new(config()))
            .with_hostname("edge-01")
            .with_address_source(Arc::new(|| {
                vec!["172.17.0.1".parse::<IpAddr>().unwrap(), "192.168.3.4".parse().unwrap()]
            }));
        let msg = reporter.build_message();
        assert_eq!(msg.call, "heart beat");
        assert_eq!(msg.params.hostname, "edge-01");
        assert_eq!(msg.params.ip, "192.168.3.4");
        assert_eq!(msg.params.port, 9601);
    }

    #[test]
    fn test_message_falls_back_to_sentinel() {
        let reporter = HeartbeatReporter::new(Arc::new(config()))
            .with_address_source(Arc::new(|| vec!["8.8.4.4".parse::<IpAddr>().unwrap()]));
        assert_eq!(reporter.build_message().params.ip, "0.0.0.0");
    }
}
