// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process topology
//!
//! One manager process owns the listening socket and a fixed pool of worker
//! processes. Workers are re-executions of the agent binary that inherit the
//! socket descriptor and accept connections on it independently.

pub mod manager;
pub mod worker;

pub use manager::{Manager, ManagerSignal, WorkerLauncher};
pub use worker::{listener_from_env, Worker};

/// Environment variable carrying the inherited listening descriptor
pub const LISTEN_FD_ENV: &str = "FLEET_AGENT_LISTEN_FD";

/// Flag that turns the agent binary into a worker process
pub const WORKER_FLAG: &str = "--worker";
