// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the fleet agent CLI

pub mod daemon;

pub use self::daemon::Supervisor;
