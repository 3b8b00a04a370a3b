// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent components: command intake, heartbeat announcements and process
//! lifecycle handling.

pub mod command_receiver;
pub mod heartbeat;
pub mod lifecycle;
