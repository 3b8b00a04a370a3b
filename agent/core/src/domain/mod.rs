// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain types: configuration, wire protocol, lifecycle phases and the Task
//! Registry contract.

pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod task;
