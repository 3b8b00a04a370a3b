// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet agent CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** argument parsing, the Supervisor and process entry points

pub mod cli;
pub mod commands;
pub mod daemon;
pub mod logging;
