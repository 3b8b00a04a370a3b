// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet agent core
//!
//! Long-running host agent: a manager process supervising a pool of workers
//! that accept coordinator commands over TCP, forward them to the Task
//! Registry and announce the host with periodic heartbeats.
//!
//! # Architecture
//!
//! - **domain:** configuration, wire messages, lifecycle phases, registry contract
//! - **infrastructure:** pid marker, signals, framing, task table, preflight
//! - **application:** Command Receiver, Heartbeat Reporter, Worker Lifecycle Controller
//! - **runtime:** manager and worker processes

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod runtime;
