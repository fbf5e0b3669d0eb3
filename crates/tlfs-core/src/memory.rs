//! In-memory [`StorageOps`] implementation.
//!
//! Backs the adapter's tests and the demo mount. Folders, directories, files
//! and symlinks live in a single table guarded by one mutex; failures and
//! latency can be injected per folder to exercise error paths.

use crate::context::RequestContext;
use crate::error::{HandleError, OpsError, OpsResult};
use crate::handle::{DefaultMembers, FolderHandle, MemberResolver};
use crate::ops::{Observer, StorageOps};
use crate::types::{
    BranchName, EntryInfo, EntryType, FolderBranch, FolderId, Node, NodeChange, NodeId,
    WriteRange,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// Counts of backend calls, for asserting cache behavior.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub get_or_create_root: AtomicUsize,
    pub get_root: AtomicUsize,
    pub favorites: AtomicUsize,
    pub register: AtomicUsize,
    pub lookup: AtomicUsize,
}

impl CallCounts {
    pub fn get_or_create_root(&self) -> usize {
        self.get_or_create_root.load(Ordering::SeqCst)
    }

    pub fn get_root(&self) -> usize {
        self.get_root.load(Ordering::SeqCst)
    }

    pub fn favorites(&self) -> usize {
        self.favorites.load(Ordering::SeqCst)
    }

    pub fn register(&self) -> usize {
        self.register.load(Ordering::SeqCst)
    }

    pub fn lookup(&self) -> usize {
        self.lookup.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FolderState {
    handle: FolderHandle,
    root: NodeId,
}

#[derive(Debug)]
struct NodeState {
    folder: FolderId,
    info: EntryInfo,
    children: BTreeMap<String, NodeId>,
    data: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_folder: u64,
    next_node: u64,
    folders: HashMap<FolderId, FolderState>,
    by_name: HashMap<String, FolderId>,
    nodes: HashMap<NodeId, NodeState>,
    favorites: Vec<FolderId>,
    root_failures: HashMap<FolderId, OpsError>,
    name_failures: HashMap<String, OpsError>,
    latency: HashMap<FolderId, Duration>,
    observers: HashMap<FolderBranch, Vec<Arc<dyn Observer>>>,
}

impl State {
    fn alloc_node(&mut self, folder: FolderId, info: EntryInfo) -> NodeId {
        self.next_node += 1;
        let id = NodeId::new(self.next_node);
        self.nodes.insert(
            id,
            NodeState {
                folder,
                info,
                children: BTreeMap::new(),
                data: Vec::new(),
            },
        );
        id
    }

    fn create_folder(&mut self, handle: FolderHandle) -> FolderId {
        let name = handle.canonical_name();
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        self.next_folder += 1;
        let id = FolderId::new(self.next_folder);
        let root = self.alloc_node(id, EntryInfo::dir(SystemTime::now()));
        self.folders.insert(id, FolderState { handle, root });
        self.by_name.insert(name, id);
        id
    }

    fn node(&self, id: NodeId) -> OpsResult<&NodeState> {
        self.nodes.get(&id).ok_or(OpsError::UnknownNode(id))
    }

    fn as_node(&self, id: NodeId) -> OpsResult<Node> {
        let state = self.node(id)?;
        Ok(Node::new(id, FolderBranch::master(state.folder)))
    }

    /// Walks `path` from the folder root, creating missing directories.
    /// Returns the parent directory and the final path component.
    fn parent_of<'p>(&mut self, folder: FolderId, path: &'p str) -> OpsResult<(NodeId, &'p str)> {
        let mut dir = self
            .folders
            .get(&folder)
            .map(|f| f.root)
            .ok_or(OpsError::NoSuchFolder(folder))?;
        let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let leaf = parts
            .pop()
            .ok_or_else(|| OpsError::NoSuchName(path.to_string()))?;
        for part in parts {
            let existing = self.node(dir)?.children.get(part).copied();
            dir = match existing {
                Some(child) if self.node(child)?.info.kind.is_dir() => child,
                Some(child) => return Err(OpsError::NotDirectory(child)),
                None => {
                    let child = self.alloc_node(folder, EntryInfo::dir(SystemTime::now()));
                    self.link(dir, part, child)?;
                    child
                }
            };
        }
        Ok((dir, leaf))
    }

    fn link(&mut self, dir: NodeId, name: &str, child: NodeId) -> OpsResult<()> {
        let parent = self.nodes.get_mut(&dir).ok_or(OpsError::UnknownNode(dir))?;
        parent.children.insert(name.to_string(), child);
        parent.info.mtime = SystemTime::now();
        Ok(())
    }

    fn observers_for(&self, folder: FolderId) -> Vec<Arc<dyn Observer>> {
        self.observers
            .get(&FolderBranch::master(folder))
            .cloned()
            .unwrap_or_default()
    }
}

/// In-memory storage backend acting on behalf of a single user.
pub struct MemoryOps {
    user: String,
    state: Mutex<State>,
    calls: CallCounts,
}

impl std::fmt::Debug for MemoryOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryOps").field("user", &self.user).finish_non_exhaustive()
    }
}

impl MemoryOps {
    /// Creates an empty backend acting as `user`.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            state: Mutex::new(State::default()),
            calls: CallCounts::default(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Creates (or returns) the folder named `name`.
    pub fn create_folder(&self, name: &str) -> Result<FolderId, HandleError> {
        let handle = FolderHandle::parse(name, &DefaultMembers)?;
        Ok(self.state.lock().create_folder(handle))
    }

    /// Adds `folder` to the caller's favorites.
    pub fn add_favorite(&self, folder: FolderId) {
        let mut state = self.state.lock();
        if !state.favorites.contains(&folder) {
            state.favorites.push(folder);
        }
    }

    pub fn remove_favorite(&self, folder: FolderId) {
        self.state.lock().favorites.retain(|f| *f != folder);
    }

    /// Root node of `folder`.
    pub fn root_node(&self, folder: FolderId) -> OpsResult<Node> {
        let state = self.state.lock();
        let root = state
            .folders
            .get(&folder)
            .map(|f| f.root)
            .ok_or(OpsError::NoSuchFolder(folder))?;
        state.as_node(root)
    }

    /// Creates directory `path` (and any missing parents) inside `folder`.
    pub fn mkdir(&self, folder: FolderId, path: &str) -> OpsResult<NodeId> {
        let mut state = self.state.lock();
        let (parent, leaf) = state.parent_of(folder, path)?;
        if let Some(existing) = state.node(parent)?.children.get(leaf).copied() {
            return Ok(existing);
        }
        let id = state.alloc_node(folder, EntryInfo::dir(SystemTime::now()));
        state.link(parent, leaf, id)?;
        Ok(id)
    }

    /// Writes `data` to file `path` inside `folder`, replacing any content,
    /// and notifies observers of the folder.
    pub fn write_file(&self, folder: FolderId, path: &str, data: &[u8]) -> OpsResult<NodeId> {
        let (id, changes, observers) = {
            let mut state = self.state.lock();
            let (parent, leaf) = state.parent_of(folder, path)?;
            let existing = state.node(parent)?.children.get(leaf).copied();
            let (id, created) = match existing {
                Some(id) if state.node(id)?.info.kind.is_file() => (id, false),
                Some(id) => return Err(OpsError::NotFile(id)),
                None => {
                    let id = state.alloc_node(folder, EntryInfo::file(0, SystemTime::now()));
                    state.link(parent, leaf, id)?;
                    (id, true)
                }
            };
            let node = state.nodes.get_mut(&id).ok_or(OpsError::UnknownNode(id))?;
            node.data = data.to_vec();
            node.info.size = data.len() as u64;
            node.info.mtime = SystemTime::now();

            let mut changes = vec![NodeChange {
                node: state.as_node(id)?,
                dir_updated: Vec::new(),
                file_updated: vec![WriteRange {
                    offset: 0,
                    len: 0,
                }],
            }];
            if created {
                changes.push(NodeChange {
                    node: state.as_node(parent)?,
                    dir_updated: vec![leaf.to_string()],
                    file_updated: Vec::new(),
                });
            }
            (id, changes, state.observers_for(folder))
        };
        trace!(
            folder = %folder,
            path,
            observers = observers.len(),
            changes = changes.len(),
            "notifying observers"
        );
        for observer in observers {
            observer.batch_changes(&changes);
        }
        Ok(id)
    }

    /// Creates a symlink at `path` inside `folder` pointing at `target`.
    pub fn symlink(&self, folder: FolderId, path: &str, target: &str) -> OpsResult<NodeId> {
        let mut state = self.state.lock();
        let (parent, leaf) = state.parent_of(folder, path)?;
        let id = state.alloc_node(folder, EntryInfo::symlink(target, SystemTime::now()));
        state.link(parent, leaf, id)?;
        Ok(id)
    }

    /// Makes `get_root_node` for `folder` fail with `err`.
    pub fn fail_root(&self, folder: FolderId, err: OpsError) {
        debug!(folder = %folder, error = %err, "injecting root fetch failure");
        self.state.lock().root_failures.insert(folder, err);
    }

    /// Makes `get_or_create_root_node` for canonical name `name` fail with `err`.
    pub fn fail_name(&self, name: &str, err: OpsError) {
        debug!(name, error = %err, "injecting folder resolution failure");
        self.state.lock().name_failures.insert(name.to_string(), err);
    }

    /// Delays every root fetch of `folder` by `delay`.
    pub fn set_latency(&self, folder: FolderId, delay: Duration) {
        debug!(folder = %folder, ?delay, "injecting root fetch latency");
        self.state.lock().latency.insert(folder, delay);
    }

    /// Revision lines with at least one registered observer.
    pub fn registered(&self) -> Vec<FolderBranch> {
        self.state.lock().observers.keys().cloned().collect()
    }

    async fn pause(&self, ctx: &RequestContext, folder: FolderId) -> OpsResult<()> {
        let delay = self.state.lock().latency.get(&folder).copied();
        if let Some(delay) = delay {
            tokio::select! {
                () = ctx.cancelled() => return Err(OpsError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        Ok(())
    }
}

impl MemberResolver for MemoryOps {}

#[async_trait]
impl StorageOps for MemoryOps {
    async fn get_or_create_root_node(
        &self,
        ctx: &RequestContext,
        handle: &FolderHandle,
        branch: &BranchName,
    ) -> OpsResult<(Node, EntryInfo)> {
        self.calls.get_or_create_root.fetch_add(1, Ordering::SeqCst);
        let name = handle.canonical_name();
        let existing = {
            let state = self.state.lock();
            if let Some(err) = state.name_failures.get(&name) {
                return Err(err.clone());
            }
            state.by_name.get(&name).copied()
        };
        if let Some(folder) = existing {
            self.pause(ctx, folder).await?;
        } else if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        if !branch.is_master() {
            return Err(OpsError::Unavailable(format!("no branch {branch} for {name}")));
        }
        if !handle.is_reader(&self.user) {
            return Err(OpsError::ReadAccessDenied {
                user: self.user.clone(),
                folder: name,
            });
        }

        let mut state = self.state.lock();
        let folder = match existing {
            Some(folder) => folder,
            None if handle.is_writer(&self.user) => state.create_folder(handle.clone()),
            None => return Err(OpsError::NoSuchFolderName(name)),
        };
        let root = state
            .folders
            .get(&folder)
            .map(|f| f.root)
            .ok_or(OpsError::NoSuchFolder(folder))?;
        let info = state.node(root)?.info.clone();
        Ok((state.as_node(root)?, info))
    }

    async fn get_root_node(
        &self,
        ctx: &RequestContext,
        folder_branch: &FolderBranch,
    ) -> OpsResult<(Node, EntryInfo, FolderHandle)> {
        self.calls.get_root.fetch_add(1, Ordering::SeqCst);
        self.pause(ctx, folder_branch.folder).await?;
        let state = self.state.lock();
        if let Some(err) = state.root_failures.get(&folder_branch.folder) {
            return Err(err.clone());
        }
        let folder = state
            .folders
            .get(&folder_branch.folder)
            .ok_or(OpsError::NoSuchFolder(folder_branch.folder))?;
        let info = state.node(folder.root)?.info.clone();
        Ok((state.as_node(folder.root)?, info, folder.handle.clone()))
    }

    async fn favorite_folders(&self, ctx: &RequestContext) -> OpsResult<Vec<FolderId>> {
        self.calls.favorites.fetch_add(1, Ordering::SeqCst);
        if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        Ok(self.state.lock().favorites.clone())
    }

    fn register_for_changes(
        &self,
        folder_branches: &[FolderBranch],
        observer: Arc<dyn Observer>,
    ) -> OpsResult<()> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        for fb in folder_branches {
            state
                .observers
                .entry(fb.clone())
                .or_default()
                .push(Arc::clone(&observer));
        }
        Ok(())
    }

    async fn lookup(
        &self,
        ctx: &RequestContext,
        dir: &Node,
        name: &str,
    ) -> OpsResult<(Option<Node>, EntryInfo)> {
        self.calls.lookup.fetch_add(1, Ordering::SeqCst);
        if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        let state = self.state.lock();
        let parent = state.node(dir.id())?;
        if !parent.info.kind.is_dir() {
            return Err(OpsError::NotDirectory(dir.id()));
        }
        let child = parent
            .children
            .get(name)
            .copied()
            .ok_or_else(|| OpsError::NoSuchName(name.to_string()))?;
        let info = state.node(child)?.info.clone();
        if info.kind == EntryType::Symlink {
            return Ok((None, info));
        }
        Ok((Some(state.as_node(child)?), info))
    }

    async fn dir_children(
        &self,
        ctx: &RequestContext,
        dir: &Node,
    ) -> OpsResult<BTreeMap<String, EntryInfo>> {
        if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        let state = self.state.lock();
        let parent = state.node(dir.id())?;
        if !parent.info.kind.is_dir() {
            return Err(OpsError::NotDirectory(dir.id()));
        }
        parent
            .children
            .iter()
            .map(|(name, id)| Ok((name.clone(), state.node(*id)?.info.clone())))
            .collect()
    }

    async fn stat(&self, ctx: &RequestContext, node: &Node) -> OpsResult<EntryInfo> {
        if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        Ok(self.state.lock().node(node.id())?.info.clone())
    }

    async fn read(
        &self,
        ctx: &RequestContext,
        file: &Node,
        offset: u64,
        size: u32,
    ) -> OpsResult<Vec<u8>> {
        if ctx.is_cancelled() {
            return Err(OpsError::Cancelled);
        }
        let state = self.state.lock();
        let node = state.node(file.id())?;
        if !node.info.kind.is_file() {
            return Err(OpsError::NotFile(file.id()));
        }
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(node.data.len());
        let end = start.saturating_add(size as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }
}

/// Errors loading a folder manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Ops(#[from] OpsError),
}

/// TOML description of the folders a demo backend starts with.
///
/// ```toml
/// user = "alice"
///
/// [[folders]]
/// name = "alice,bob"
/// favorite = true
/// files = { "notes/todo.txt" = "buy milk" }
/// symlinks = { "latest" = "notes/todo.txt" }
/// ```
#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub user: String,
    #[serde(default)]
    pub folders: Vec<FolderManifest>,
}

/// One folder entry in a [`Manifest`].
#[derive(Debug, Deserialize)]
pub struct FolderManifest {
    pub name: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub dirs: Vec<String>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub symlinks: BTreeMap<String, String>,
}

impl MemoryOps {
    /// Builds a backend from a TOML manifest.
    pub fn from_manifest(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(text)?;
        let ops = Self::new(manifest.user);
        for folder in &manifest.folders {
            let id = ops.create_folder(&folder.name)?;
            for dir in &folder.dirs {
                ops.mkdir(id, dir)?;
            }
            for (path, content) in &folder.files {
                ops.write_file(id, path, content.as_bytes())?;
            }
            for (path, target) in &folder.symlinks {
                ops.symlink(id, path, target)?;
            }
            if folder.favorite {
                ops.add_favorite(id);
            }
        }
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> FolderHandle {
        FolderHandle::parse(name, &DefaultMembers).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_creates_for_writer() {
        let ops = MemoryOps::new("alice");
        let ctx = RequestContext::background();
        let (node, info) = ops
            .get_or_create_root_node(&ctx, &handle("alice,bob"), &BranchName::master())
            .await
            .unwrap();
        assert!(info.kind.is_dir());
        let (again, _) = ops
            .get_or_create_root_node(&ctx, &handle("alice,bob"), &BranchName::master())
            .await
            .unwrap();
        assert_eq!(node, again);
    }

    #[tokio::test]
    async fn test_non_member_is_denied() {
        let ops = MemoryOps::new("eve");
        ops.create_folder("alice").unwrap();
        let ctx = RequestContext::background();
        let err = ops
            .get_or_create_root_node(&ctx, &handle("alice"), &BranchName::master())
            .await
            .unwrap_err();
        assert!(err.is_read_access_denied());
    }

    #[tokio::test]
    async fn test_files_and_lookup() {
        let ops = MemoryOps::new("alice");
        let id = ops.create_folder("alice").unwrap();
        ops.write_file(id, "docs/a.txt", b"hello world").unwrap();
        ops.symlink(id, "link", "docs/a.txt").unwrap();
        let ctx = RequestContext::background();
        let root = ops.root_node(id).unwrap();

        let (docs, info) = ops.lookup(&ctx, &root, "docs").await.unwrap();
        assert!(info.kind.is_dir());
        let docs = docs.unwrap();
        let (file, info) = ops.lookup(&ctx, &docs, "a.txt").await.unwrap();
        assert_eq!(info.size, 11);
        let data = ops.read(&ctx, &file.unwrap(), 6, 100).await.unwrap();
        assert_eq!(data, b"world");

        let (link, info) = ops.lookup(&ctx, &root, "link").await.unwrap();
        assert!(link.is_none());
        assert_eq!(info.symlink_target.as_deref(), Some("docs/a.txt"));

        let children = ops.dir_children(&ctx, &root).await.unwrap();
        assert_eq!(children.keys().collect::<Vec<_>>(), ["docs", "link"]);
    }

    #[tokio::test]
    async fn test_injected_root_failure() {
        let ops = MemoryOps::new("alice");
        let id = ops.create_folder("alice").unwrap();
        ops.fail_root(id, OpsError::Unavailable("offline".to_string()));
        let ctx = RequestContext::background();
        let err = ops
            .get_root_node(&ctx, &FolderBranch::master(id))
            .await
            .unwrap_err();
        assert_eq!(err, OpsError::Unavailable("offline".to_string()));
    }

    #[tokio::test]
    async fn test_latency_respects_cancellation() {
        let ops = MemoryOps::new("alice");
        let id = ops.create_folder("alice").unwrap();
        ops.set_latency(id, Duration::from_secs(60));
        let (ctx, cancel) = RequestContext::new();
        cancel.cancel();
        let err = ops
            .get_root_node(&ctx, &FolderBranch::master(id))
            .await
            .unwrap_err();
        assert_eq!(err, OpsError::Cancelled);
    }

    #[test]
    fn test_manifest() {
        let ops = MemoryOps::from_manifest(
            r#"
            user = "alice"

            [[folders]]
            name = "bob,alice"
            favorite = true
            files = { "notes/todo.txt" = "milk" }

            [[folders]]
            name = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(ops.user(), "alice");
        let favs = ops.state.lock().favorites.clone();
        assert_eq!(favs.len(), 1);
        let name = ops.state.lock().folders[&favs[0]].handle.canonical_name();
        assert_eq!(name, "alice,bob");
    }

    /// Writer that appends into a shared buffer.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_injection_and_fan_out_are_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let ops = MemoryOps::new("alice");
            let id = ops.create_folder("alice").unwrap();
            ops.fail_root(id, OpsError::Unavailable("offline".to_string()));
            ops.write_file(id, "a.txt", b"x").unwrap();
        });

        let logs = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logs.contains("injecting root fetch failure"), "{logs}");
        assert!(logs.contains("notifying observers"), "{logs}");
    }
}
