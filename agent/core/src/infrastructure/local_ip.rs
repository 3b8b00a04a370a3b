// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local address discovery for heartbeat reporting

use get_if_addrs::get_if_addrs;
use std::net::IpAddr;
use tracing::warn;

/// Non-loopback IPv4 addresses of every local interface, in enumeration order
pub fn local_ipv4_addrs() -> Vec<IpAddr> {
    match get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .filter(|ip| ip.is_ipv4())
            .collect(),
        Err(e) => {
            warn!("Failed to enumerate local interfaces: {}", e);
            Vec::new()
        }
    }
}

/// First address whose textual form starts with one of `prefixes`, else
/// `fallback`.
///
/// Matching is on the dotted string, so "10.10" also accepts 10.100.0.0/16.
/// Coordinators rely on this exact behaviour.
pub fn select_report_ip(addrs: &[IpAddr], prefixes: &[String], fallback: &str) -> String {
    addrs
        .iter()
        .map(|ip| ip.to_string())
        .find(|ip| prefixes.iter().any(|prefix| ip.starts_with(prefix.as_str())))
        .unwrap_or_else(|| fallback.to_string())
}
