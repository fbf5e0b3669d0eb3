//! FUSE filesystem serving shared folders.
//!
//! Kernel callbacks arrive on the session thread. Anything that may reach
//! the backend is spawned onto the tokio runtime and answered from there;
//! purely local requests (readlink, readdir from a snapshot, statfs) are
//! answered inline.

use crate::async_bridge::{self, BridgeStats};
use crate::config::MountConfig;
use crate::error::{FsError, FsResult, MountError};
use crate::handles::{DirHandleTable, ListingEntry};
use crate::inode::ROOT_INODE;
use crate::invalidate::{NotifierSlot, SessionInvalidator};
use crate::node::{DirEntry, FsNode, NodeKind};
use crate::root::Root;
use crate::state::FsState;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use libc::c_int;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use tlfs_core::{CancelHandle, EntryType, RequestContext, StorageOps};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, trace};

/// Block size reported in attributes and statfs.
const BLOCK_SIZE: u32 = 4096;

/// Default file permissions (rw-r--r--).
const DEFAULT_FILE_PERM: u16 = 0o644;

/// Executable file permissions (rwxr-xr-x).
const EXEC_FILE_PERM: u16 = 0o755;

/// Default directory permissions (rwxr-xr-x).
const DEFAULT_DIR_PERM: u16 = 0o755;

/// Symlink permissions (rwxrwxrwx, ignored by the kernel).
const SYMLINK_PERM: u16 = 0o777;

/// Longest name statfs reports.
const NAME_MAX: u32 = 255;

/// Tracing target for per-request protocol logs.
const PROTOCOL_TARGET: &str = "tlfs_fuse::protocol";

/// What an inode number refers to.
enum Target {
    Root,
    Node(Arc<FsNode>),
}

/// Everything a spawned request needs, cheap to clone into a task.
#[derive(Clone)]
struct Core {
    state: Arc<FsState>,
    root: Arc<OnceLock<Arc<Root>>>,
    favorite_workers: usize,
    ctx: RequestContext,
    dir_handles: Arc<DirHandleTable>,
    uid: u32,
    gid: u32,
}

impl Core {
    /// The root resolver, created by the first request that needs it.
    fn root(&self) -> &Arc<Root> {
        self.root
            .get_or_init(|| Arc::new(Root::new(Arc::clone(&self.state), self.favorite_workers)))
    }

    fn target(&self, ino: u64) -> FsResult<Target> {
        if ino == ROOT_INODE {
            return Ok(Target::Root);
        }
        self.state
            .inodes()
            .get(ino)
            .map(Target::Node)
            .ok_or(FsError::InvalidInode(ino))
    }

    async fn lookup(&self, parent: u64, name: String) -> FsResult<FileAttr> {
        let node = match self.target(parent)? {
            Target::Root => self.root().lookup(&self.ctx, &name).await?,
            Target::Node(node) => {
                let dir = node.as_dir().ok_or(FsError::NotDirectory(parent))?;
                dir.lookup(&self.ctx, &name).await?
            }
        };
        self.attr_of(&node).await
    }

    async fn getattr(&self, ino: u64) -> FsResult<FileAttr> {
        match self.target(ino)? {
            Target::Root => Ok(self.dir_attr(ROOT_INODE, self.state.mount_time())),
            Target::Node(node) => self.attr_of(&node).await,
        }
    }

    async fn attr_of(&self, node: &FsNode) -> FsResult<FileAttr> {
        let ino = node.ino();
        match node.kind() {
            NodeKind::Alias { canonical } => {
                Ok(self.symlink_attr(ino, canonical.len(), self.state.mount_time()))
            }
            NodeKind::Symlink { target, mtime } => Ok(self.symlink_attr(ino, target.len(), *mtime)),
            NodeKind::Dir(dir) => {
                let mtime = dir
                    .stat(&self.ctx)
                    .await?
                    .map_or_else(|| self.state.mount_time(), |info| info.mtime);
                Ok(self.dir_attr(ino, mtime))
            }
            NodeKind::File(file) => {
                let info = file.stat(&self.ctx).await?;
                Ok(self.file_attr(ino, info.size, info.mtime, file.is_exec()))
            }
        }
    }

    async fn read(&self, ino: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let Target::Node(node) = self.target(ino)? else {
            return Err(FsError::IsDirectory(ino));
        };
        let file = node.as_file().ok_or(FsError::IsDirectory(ino))?;
        file.read(&self.ctx, offset, size).await
    }

    /// Lists `ino` and stores the snapshot under a new handle.
    async fn opendir(&self, ino: u64) -> FsResult<u64> {
        let entries = match self.target(ino)? {
            Target::Root => self.root().read_dir(&self.ctx).await?,
            Target::Node(node) => {
                let dir = node.as_dir().ok_or(FsError::NotDirectory(ino))?;
                dir.read_dir(&self.ctx).await?
            }
        };

        let mut listing = Vec::with_capacity(entries.len() + 2);
        listing.push(ListingEntry {
            ino,
            kind: EntryType::Dir,
            name: ".".to_string(),
        });
        // Wrappers do not track their parent; the kernel ignores d_ino of "..".
        listing.push(ListingEntry {
            ino: ROOT_INODE,
            kind: EntryType::Dir,
            name: "..".to_string(),
        });
        for DirEntry { name, kind } in entries {
            let ino = match (ino, self.root.get()) {
                (ROOT_INODE, Some(root)) => root
                    .cached(&name)
                    .await
                    .map_or_else(|| synthetic_ino(&name), |node| node.ino()),
                _ => synthetic_ino(&name),
            };
            listing.push(ListingEntry { ino, kind, name });
        }
        Ok(self.dir_handles.insert_auto(listing))
    }

    fn dir_attr(&self, ino: u64, mtime: SystemTime) -> FileAttr {
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: FileType::Directory,
            perm: DEFAULT_DIR_PERM,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn file_attr(&self, ino: u64, size: u64, mtime: SystemTime, exec: bool) -> FileAttr {
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: FileType::RegularFile,
            perm: if exec { EXEC_FILE_PERM } else { DEFAULT_FILE_PERM },
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn symlink_attr(&self, ino: u64, target_len: usize, mtime: SystemTime) -> FileAttr {
        FileAttr {
            ino,
            size: target_len as u64,
            blocks: 0,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: FileType::Symlink,
            perm: SYMLINK_PERM,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

/// Kernel file type for a backend entry type.
fn file_type(kind: EntryType) -> FileType {
    match kind {
        EntryType::Dir => FileType::Directory,
        EntryType::File | EntryType::Exec => FileType::RegularFile,
        EntryType::Symlink => FileType::Symlink,
    }
}

/// Stable `d_ino` for a listed entry that has no wrapper yet.
///
/// Hashes the name and sets the top bit so it can never collide with an
/// allocated inode.
fn synthetic_ino(name: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() | (1 << 63)
}

/// FUSE filesystem exposing one folder per top-level directory.
pub struct TlfFs {
    /// Handle to the tokio runtime requests run on.
    handle: Handle,
    /// Owned runtime (when we create our own). Declared after `handle` so it
    /// drops last.
    _owned_runtime: Option<Runtime>,
    config: MountConfig,
    core: Core,
    cancel: CancelHandle,
    stats: Arc<BridgeStats>,
    invalidator: Arc<SessionInvalidator>,
}

impl TlfFs {
    /// Creates a filesystem over `ops` with its own multi-threaded runtime.
    ///
    /// Every request runs under a child of `ctx`; cancelling `ctx` aborts
    /// in-flight backend work.
    pub fn new(
        ops: Arc<dyn StorageOps>,
        config: MountConfig,
        ctx: &RequestContext,
    ) -> Result<Self, MountError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tlfs-worker")
            .build()
            .map_err(MountError::Runtime)?;
        let handle = runtime.handle().clone();
        Ok(Self::with_runtime_internal(ops, config, ctx, Some(runtime), handle))
    }

    /// Creates a filesystem that runs requests on an existing runtime.
    ///
    /// The runtime must outlive the filesystem.
    pub fn with_runtime_handle(
        ops: Arc<dyn StorageOps>,
        config: MountConfig,
        ctx: &RequestContext,
        handle: Handle,
    ) -> Self {
        Self::with_runtime_internal(ops, config, ctx, None, handle)
    }

    fn with_runtime_internal(
        ops: Arc<dyn StorageOps>,
        config: MountConfig,
        ctx: &RequestContext,
        owned_runtime: Option<Runtime>,
        handle: Handle,
    ) -> Self {
        // SAFETY: getuid and getgid have no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        let invalidator = Arc::new(SessionInvalidator::new());
        let state = FsState::new(
            ops,
            Arc::clone(&invalidator) as _,
            config.capacity_policy,
        );
        let (ctx, cancel) = ctx.child();

        info!(
            uid,
            gid,
            attr_ttl_ms = config.attr_ttl.as_millis(),
            io_timeout_secs = config.io_timeout.as_secs(),
            favorite_workers = config.favorite_workers,
            "TlfFs initialized"
        );

        Self {
            handle,
            _owned_runtime: owned_runtime,
            core: Core {
                state,
                root: Arc::new(OnceLock::new()),
                favorite_workers: config.favorite_workers,
                ctx,
                dir_handles: Arc::new(DirHandleTable::new()),
                uid,
                gid,
            },
            config,
            cancel,
            stats: BridgeStats::new(),
            invalidator,
        }
    }

    /// Slot the mount injects the session notifier into.
    pub fn notifier_slot(&self) -> NotifierSlot {
        self.invalidator.slot()
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// Shared folder state of this mount.
    pub fn state(&self) -> &Arc<FsState> {
        &self.core.state
    }

    fn log_request(&self, op: &'static str, ino: u64, detail: &dyn Debug) {
        if self.config.debug {
            debug!(target: PROTOCOL_TARGET, op, ino, detail = ?detail, "request");
        }
    }

    /// Runs `future` on the runtime and answers with `complete`.
    fn spawn<F, T, C>(&self, future: F, complete: C)
    where
        F: Future<Output = FsResult<T>> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(FsResult<T>) + Send + 'static,
    {
        async_bridge::dispatch(
            &self.handle,
            self.config.io_timeout,
            &self.core.ctx,
            &self.stats,
            future,
            move |result| complete(result.map_err(FsError::from).and_then(|r| r)),
        );
    }

    fn reply_error(op: &'static str, ino: u64, e: &FsError) -> c_int {
        let errno = e.to_errno();
        if errno == libc::ENOENT {
            trace!(op, ino, error = %e, "request failed");
        } else {
            debug!(op, ino, error = %e, errno, "request failed");
        }
        errno
    }
}

impl Drop for TlfFs {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.core.dir_handles.clear();
        self.core.state.shutdown();
    }
}

impl Filesystem for TlfFs {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(fs_name = %self.config.fs_name, "FUSE filesystem initialized");
        // Reads for different files are independent.
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        self.cancel.cancel();
        info!(
            requests = self
                .stats
                .operations_started
                .load(std::sync::atomic::Ordering::Relaxed),
            in_flight = self.stats.in_flight(),
            "FUSE filesystem destroyed"
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.log_request("lookup", parent, &name);
        let Some(name) = name.to_str() else {
            reply.error(FsError::InvalidName.to_errno());
            return;
        };
        let core = self.core.clone();
        let name = name.to_string();
        let ttl = self.config.entry_ttl;
        self.spawn(async move { core.lookup(parent, name).await }, move |result| {
            match result {
                Ok(attr) => reply.entry(&ttl, &attr, 0),
                Err(e) => reply.error(Self::reply_error("lookup", parent, &e)),
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.log_request("getattr", ino, &());
        let core = self.core.clone();
        let ttl = self.config.attr_ttl;
        self.spawn(async move { core.getattr(ino).await }, move |result| {
            match result {
                Ok(attr) => reply.attr(&ttl, &attr),
                Err(e) => reply.error(Self::reply_error("getattr", ino, &e)),
            }
        });
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        self.log_request("readlink", ino, &());
        let result = match self.core.target(ino) {
            Ok(Target::Node(node)) => node.link_target().map(|t| t.as_bytes().to_vec()),
            Ok(Target::Root) => Err(FsError::NotSymlink(ino)),
            Err(e) => Err(e),
        };
        match result {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(Self::reply_error("readlink", ino, &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.log_request("open", ino, &flags);
        let result = match self.core.target(ino) {
            Ok(Target::Node(node)) if node.as_file().is_some() => {
                if flags & libc::O_ACCMODE != libc::O_RDONLY {
                    Err(FsError::ReadOnly)
                } else {
                    Ok(())
                }
            }
            Ok(_) => Err(FsError::IsDirectory(ino)),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(Self::reply_error("open", ino, &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.log_request("read", ino, &(offset, size));
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let core = self.core.clone();
        self.spawn(async move { core.read(ino, offset, size).await }, move |result| {
            match result {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(Self::reply_error("read", ino, &e)),
            }
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.log_request("opendir", ino, &());
        let core = self.core.clone();
        self.spawn(async move { core.opendir(ino).await }, move |result| match result {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(Self::reply_error("opendir", ino, &e)),
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        self.log_request("readdir", ino, &(fh, offset));
        let Some(listing) = self.core.dir_handles.get(fh) else {
            reply.error(FsError::InvalidHandle(fh).to_errno());
            return;
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (index, entry) in listing.iter().enumerate().skip(skip) {
            let next = i64::try_from(index + 1).unwrap_or(i64::MAX);
            if reply.add(entry.ino, next, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.log_request("releasedir", ino, &fh);
        self.core.dir_handles.remove(fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        self.log_request("statfs", ino, &());
        let files = self.core.state.inodes().len() as u64 + 1;
        reply.statfs(0, 0, 0, files, 0, BLOCK_SIZE, NAME_MAX, BLOCK_SIZE);
    }
}
