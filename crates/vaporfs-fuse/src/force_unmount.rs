//! Platform-specific force unmount.
//!
//! Used when a session refuses to wind down in time (wedged kernel
//! connection, a process camped inside the mount) and by the process-exit
//! safety net for handles that were never unmounted explicitly.
//!
//! - **Linux**: `fusermount -uz` (lazy), then `umount -l`, then `umount -f`
//! - **macOS**: `diskutil unmount force`, then `umount -f`

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// Forcibly unmount the filesystem at `mountpoint`, trying each platform
/// fallback in turn. Returns an error only if every attempt fails.
pub(crate) fn force_unmount(mountpoint: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        force_unmount_linux(mountpoint)
    }

    #[cfg(target_os = "macos")]
    {
        force_unmount_macos(mountpoint)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        anyhow::bail!(
            "force unmount not supported on this platform for {}",
            mountpoint.display()
        )
    }
}

fn run_quiet(mut cmd: Command, what: &'static str) -> Result<bool> {
    let output = cmd.output().with_context(|| format!("failed to run {what}"))?;
    if output.status.success() {
        tracing::debug!(what, "force unmount attempt succeeded");
        Ok(true)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(what, stderr = %stderr.trim(), "force unmount attempt failed");
        Ok(false)
    }
}

#[cfg(target_os = "linux")]
fn force_unmount_linux(mountpoint: &Path) -> Result<()> {
    let mut fusermount = Command::new("fusermount");
    fusermount.arg("-uz").arg(mountpoint);
    // fusermount may be absent entirely; treat that like a failed attempt.
    if matches!(run_quiet(fusermount, "fusermount -uz"), Ok(true)) {
        return Ok(());
    }

    let mut lazy = Command::new("umount");
    lazy.arg("-l").arg(mountpoint);
    if run_quiet(lazy, "umount -l")? {
        return Ok(());
    }

    let mut force = Command::new("umount");
    force.arg("-f").arg(mountpoint);
    if run_quiet(force, "umount -f")? {
        return Ok(());
    }

    anyhow::bail!("all unmount attempts failed for {}", mountpoint.display())
}

#[cfg(target_os = "macos")]
fn force_unmount_macos(mountpoint: &Path) -> Result<()> {
    let mut diskutil = Command::new("diskutil");
    diskutil.args(["unmount", "force"]).arg(mountpoint);
    if run_quiet(diskutil, "diskutil unmount force")? {
        return Ok(());
    }

    let mut force = Command::new("umount");
    force.arg("-f").arg(mountpoint);
    if run_quiet(force, "umount -f")? {
        return Ok(());
    }

    anyhow::bail!("all unmount attempts failed for {}", mountpoint.display())
}
