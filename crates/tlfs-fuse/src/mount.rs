//! Mounting and unmounting.
//!
//! [`mount`] serves in the calling thread until the filesystem is
//! unmounted. [`spawn_mount`] serves in the background and returns a handle
//! that unmounts when dropped.

use crate::config::MountConfig;
use crate::error::MountError;
use crate::filesystem::TlfFs;
use fuser::{BackgroundSession, MountOption, Session};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tlfs_core::{RequestContext, StorageOps};
use tracing::{debug, info, warn};

/// How long the mount syscall may block before giving up.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for graceful session join before forcing unmount.
/// The join thread may leak on timeout, which beats blocking forever.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Kernel mount options for `config`.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype("tlfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Mounts `ops` at `mountpoint` and serves requests until unmounted.
///
/// Every request runs under a child of `ctx`.
pub fn mount(
    ctx: &RequestContext,
    ops: Arc<dyn StorageOps>,
    config: MountConfig,
    mountpoint: &Path,
) -> Result<(), MountError> {
    let options = mount_options(&config);
    let fs = TlfFs::new(ops, config, ctx)?;
    let slot = fs.notifier_slot();

    let mut session = Session::new(fs, mountpoint, &options).map_err(MountError::Mount)?;
    // The slot is fresh, so this is the only value it will ever hold.
    let _ = slot.set(session.notifier());
    info!(mountpoint = %mountpoint.display(), "mounted, serving requests");

    let result = session.run().map_err(MountError::Serve);
    info!(mountpoint = %mountpoint.display(), "session ended");
    result
}

/// Mounts `ops` at `mountpoint` and serves requests on a background thread.
pub fn spawn_mount(
    ctx: &RequestContext,
    ops: Arc<dyn StorageOps>,
    config: MountConfig,
    mountpoint: &Path,
) -> Result<TlfMountHandle, MountError> {
    let options = mount_options(&config);
    let fs = TlfFs::new(ops, config, ctx)?;
    let slot = fs.notifier_slot();

    let session = spawn_mount_with_timeout(fs, mountpoint, &options)?;
    let _ = slot.set(session.notifier());
    info!(mountpoint = %mountpoint.display(), "mounted in background");

    Ok(TlfMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}

/// Runs `spawn_mount2` on its own thread so a mount syscall stuck on a stale
/// mountpoint cannot hang the caller.
fn spawn_mount_with_timeout(
    fs: TlfFs,
    mountpoint: &Path,
    options: &[MountOption],
) -> Result<BackgroundSession, MountError> {
    let mountpoint = mountpoint.to_path_buf();
    let options = options.to_vec();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let result = fuser::spawn_mount2(fs, &mountpoint, &options);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(MOUNT_TIMEOUT) {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(MountError::Mount(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Mount(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "mount timed out; the mountpoint may be a stale FUSE mount",
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::Mount(
            std::io::Error::other("mount thread terminated unexpectedly"),
        )),
    }
}

/// Handle to a background mount. Dropping it unmounts.
pub struct TlfMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl TlfMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session to finish.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "unmounting");
        if let Some(session) = self.session.take() {
            session.join();
        }
    }

    /// Lazy unmount through the system tools, for a session that will not
    /// stop on its own.
    fn force_unmount(&self) {
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .args(["-uz"])
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl Drop for TlfMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mountpoint = %self.mountpoint.display(), "unmounting on drop");

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            warn!(
                mountpoint = %self.mountpoint.display(),
                timeout = ?JOIN_TIMEOUT,
                "session join timed out, forcing unmount"
            );
            self.force_unmount();
        }
    }
}
