//! Mount lifecycle: binding an engine to a kernel mount point.
//!
//! [`mount`] validates the mount point, spawns the FUSE session on a
//! background thread, and waits for the kernel to finish the handshake.
//! The returned [`MountHandle`] is a scoped resource: explicit
//! [`MountHandle::unmount`], scope exit, and normal process termination all
//! tear the session down, in that order of preference. Unmount is bounded;
//! a session that will not wind down in time is forced off through the
//! platform unmount fallbacks.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use fuser::{BackgroundSession, MountOption};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use vaporfs_core::MemFs;

use crate::filesystem::VaporFs;
use crate::force_unmount;

/// How long to wait for the kernel handshake before giving up on a mount.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval while waiting for the mount to become visible.
const MOUNT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long an explicit unmount waits for session workers to exit before
/// forcing the connection down.
const UNMOUNT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the mount layer, distinct from the engine's taxonomy.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount point does not exist: {0}")]
    NoSuchMountPoint(PathBuf),

    #[error("mount point is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("target is already mounted: {0}")]
    AlreadyMounted(PathBuf),

    #[error("permission denied mounting at {0}")]
    PermissionDenied(PathBuf),

    #[error("FUSE is unavailable: {0}")]
    KernelUnavailable(String),

    #[error("session aborted: {0}")]
    SessionAborted(String),
}

/// User-settable mount configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Allow other users to access the mount. Maps to the FUSE option of
    /// the same name, which may require `user_allow_other` in
    /// `/etc/fuse.conf`.
    pub allow_other: bool,
}

/// A live mount. Dropping the handle unmounts; `unmount` does the same
/// eagerly and idempotently.
pub struct MountHandle {
    session: Option<BackgroundSession>,
    mount_point: PathBuf,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("mount_point", &self.mount_point)
            .field("active", &self.session.is_some())
            .finish()
    }
}

impl MountHandle {
    /// Where the filesystem is mounted.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Whether the session is still alive. Terminated handles stay around
    /// as inert observers.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Tear down the session and unmount. Safe to call repeatedly; calls
    /// after the first are no-ops.
    ///
    /// Waits a bounded time for the session workers to exit. On timeout the
    /// kernel connection is forced down via the platform unmount fallbacks.
    pub fn unmount(&mut self) -> Result<(), MountError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        deregister_exit_cleanup(&self.mount_point);
        info!(mount_point = %self.mount_point.display(), "unmounting");

        let (tx, rx) = mpsc::channel();
        let joiner = thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        match rx.recv_timeout(UNMOUNT_TIMEOUT) {
            Ok(()) => {
                let _ = joiner.join();
                debug!(mount_point = %self.mount_point.display(), "unmounted cleanly");
                Ok(())
            }
            Err(_) => {
                warn!(
                    mount_point = %self.mount_point.display(),
                    timeout = ?UNMOUNT_TIMEOUT,
                    "session did not wind down in time, forcing unmount"
                );
                force_unmount::force_unmount(&self.mount_point)
                    .map_err(|e| MountError::SessionAborted(e.to_string()))
            }
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!(mount_point = %self.mount_point.display(), "mount handle dropped while mounted");
            if let Err(e) = self.unmount() {
                warn!(error = %e, "unmount on drop failed");
            }
        }
    }
}

/// Mount `engine` at `mount_point` and return the scoped handle.
///
/// The mount point must be an existing directory not already claimed by
/// another vaporfs mount in this process. Blocks until the kernel handshake
/// completes or [`MOUNT_READY_TIMEOUT`] elapses.
pub fn mount(
    engine: MemFs,
    mount_point: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<MountHandle, MountError> {
    let mount_point = mount_point.as_ref();

    let meta = std::fs::metadata(mount_point)
        .map_err(|_| MountError::NoSuchMountPoint(mount_point.to_path_buf()))?;
    if !meta.is_dir() {
        return Err(MountError::NotADirectory(mount_point.to_path_buf()));
    }
    if is_registered(mount_point) {
        return Err(MountError::AlreadyMounted(mount_point.to_path_buf()));
    }
    if let Some(reason) = fuse_unavailable_reason() {
        return Err(MountError::KernelUnavailable(reason));
    }

    let fs = VaporFs::new(engine);
    let fuse_options = build_mount_options(options);

    let session = fuser::spawn_mount2(fs, mount_point, &fuse_options)
        .map_err(|e| classify_mount_io_error(&e, mount_point))?;

    // The session thread is up; now wait for the kernel to actually swap
    // the mount in. Our root is inode 1, which no ordinary directory
    // underneath us will be.
    if let Err(e) = wait_for_mount(mount_point) {
        drop(session);
        return Err(e);
    }

    register_exit_cleanup(mount_point);
    info!(mount_point = %mount_point.display(), "mounted");

    Ok(MountHandle {
        session: Some(session),
        mount_point: mount_point.to_path_buf(),
    })
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("vaporfs".to_owned()),
        MountOption::Subtype("vaporfs".to_owned()),
        MountOption::DefaultPermissions,
        MountOption::AutoUnmount,
    ];
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    opts
}

fn fuse_unavailable_reason() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        if Path::new("/dev/fuse").exists() {
            None
        } else {
            Some("/dev/fuse is missing; is the fuse kernel module loaded?".to_owned())
        }
    }
    #[cfg(target_os = "macos")]
    {
        if Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
        {
            None
        } else {
            Some("macFUSE is not installed".to_owned())
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Some("FUSE is not supported on this platform".to_owned())
    }
}

fn classify_mount_io_error(e: &std::io::Error, mount_point: &Path) -> MountError {
    match e.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EACCES) => {
            MountError::PermissionDenied(mount_point.to_path_buf())
        }
        Some(libc::EBUSY) => MountError::AlreadyMounted(mount_point.to_path_buf()),
        Some(libc::ENODEV) | Some(libc::ENOENT) => MountError::KernelUnavailable(e.to_string()),
        _ => MountError::SessionAborted(e.to_string()),
    }
}

fn wait_for_mount(mount_point: &Path) -> Result<(), MountError> {
    use std::os::unix::fs::MetadataExt;

    let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
    while Instant::now() < deadline {
        if let Ok(meta) = std::fs::metadata(mount_point) {
            if meta.ino() == vaporfs_core::ROOT_INO {
                return Ok(());
            }
        }
        thread::sleep(MOUNT_POLL_INTERVAL);
    }
    Err(MountError::SessionAborted(format!(
        "mount did not become ready within {MOUNT_READY_TIMEOUT:?}"
    )))
}

// ── Process-exit safety net ─────────────────────────────────────────────
//
// A handle that is leaked (mem::forget, stashed in a global) never runs its
// Drop. Registering live mount points and force-unmounting them from an
// atexit hook keeps normal process termination from stranding kernel
// mounts; abnormal termination falls back to the kernel's own connection
// abort.

static ACTIVE_MOUNTS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
static EXIT_HOOK: Once = Once::new();

extern "C" fn unmount_leftovers_at_exit() {
    let leftovers: Vec<PathBuf> = ACTIVE_MOUNTS.lock().drain(..).collect();
    for path in leftovers {
        let _ = force_unmount::force_unmount(&path);
    }
}

fn register_exit_cleanup(path: &Path) {
    EXIT_HOOK.call_once(|| unsafe {
        libc::atexit(unmount_leftovers_at_exit);
    });
    ACTIVE_MOUNTS.lock().push(path.to_path_buf());
}

fn deregister_exit_cleanup(path: &Path) {
    ACTIVE_MOUNTS.lock().retain(|p| p != path);
}

fn is_registered(path: &Path) -> bool {
    ACTIVE_MOUNTS.lock().iter().any(|p| p == path)
}
