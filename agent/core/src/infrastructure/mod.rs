// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod frame_codec;
pub mod local_ip;
pub mod pid_file;
pub mod preflight;
pub mod process;
pub mod task_registry;
