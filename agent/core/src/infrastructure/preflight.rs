// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host environment checks run before any CLI action

use thiserror::Error;

/// Oldest Linux kernel the runtime supports
pub const MIN_KERNEL_VERSION: (u32, u32) = (3, 2);

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("Unsupported platform: the agent requires a Unix host")]
    UnsupportedPlatform,

    #[error("Could not determine kernel version: {0}")]
    UnknownKernel(String),

    #[error(
        "Kernel {found} is too old, at least {major}.{minor} is required",
        major = MIN_KERNEL_VERSION.0,
        minor = MIN_KERNEL_VERSION.1
    )]
    KernelTooOld { found: String },

    #[error("Event-driven I/O reactor unavailable: {0}")]
    ReactorUnavailable(std::io::Error),
}

/// Verify the host can run the agent's event-driven networking runtime.
///
/// Must be called outside of any tokio runtime.
pub fn check_environment() -> Result<(), PreflightError> {
    if !cfg!(unix) {
        return Err(PreflightError::UnsupportedPlatform);
    }

    #[cfg(target_os = "linux")]
    {
        let release = kernel_release()?;
        check_kernel_release(&release)?;
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(PreflightError::ReactorUnavailable)?;

    Ok(())
}

#[cfg(target_os = "linux")]
fn kernel_release() -> Result<String, PreflightError> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return Err(PreflightError::UnknownKernel(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    let release = unsafe { std::ffi::CStr::from_ptr(uts.release.as_ptr()) };
    Ok(release.to_string_lossy().into_owned())
}

/// Compare a `uname -r` style release against [`MIN_KERNEL_VERSION`]
pub fn check_kernel_release(release: &str) -> Result<(), PreflightError> {
    let (major, minor) = parse_kernel_release(release)
        .ok_or_else(|| PreflightError::UnknownKernel(release.to_string()))?;
    if (major, minor) < MIN_KERNEL_VERSION {
        return Err(PreflightError::KernelTooOld {
            found: release.to_string(),
        });
    }
    Ok(())
}

fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
