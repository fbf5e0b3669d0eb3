//! End-to-end tests through a real kernel mount.
//!
//! Run: `cargo nextest run -p tlfs-fuse --features fuse-tests mount_tests`

#![cfg(all(unix, feature = "fuse-tests"))]

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tlfs_core::memory::MemoryOps;
use tlfs_core::{RequestContext, StorageOps};
use tlfs_fuse::{MountConfig, TlfMountHandle, spawn_mount};

macro_rules! skip_if_no_fuse {
    () => {
        if !Path::new("/dev/fuse").exists() && !cfg!(target_os = "macos") {
            eprintln!("skipping: FUSE is not available");
            return;
        }
    };
}

const MANIFEST: &str = r#"
user = "alice"

[[folders]]
name = "alice"
favorite = true
dirs = ["docs"]
files = { "docs/readme.txt" = "hello from alice\n" }
symlinks = { "latest" = "docs/readme.txt" }

[[folders]]
name = "alice,bob"
favorite = true

[[folders]]
name = "carol"

[[folders]]
name = "carol@public"
files = { "index.html" = "<html></html>" }
"#;

struct TestMount {
    _dir: TempDir,
    handle: Option<TlfMountHandle>,
}

impl TestMount {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let ops: Arc<dyn StorageOps> =
            Arc::new(MemoryOps::from_manifest(MANIFEST).expect("manifest"));
        let handle = spawn_mount(
            &RequestContext::background(),
            ops,
            MountConfig::default(),
            dir.path(),
        )
        .expect("mount failed");
        Self {
            _dir: dir,
            handle: Some(handle),
        }
    }

    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.handle
            .as_ref()
            .expect("mounted")
            .mountpoint()
            .join(rel)
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unmount();
        }
    }
}

#[test]
fn test_root_lists_favorites() {
    skip_if_no_fuse!();
    let mount = TestMount::new();

    let mut names: Vec<String> = fs::read_dir(mount.path(""))
        .expect("readdir")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["alice", "alice,bob"]);
}

#[test]
fn test_read_file_and_symlink() {
    skip_if_no_fuse!();
    let mount = TestMount::new();

    assert_eq!(
        fs::read_to_string(mount.path("alice/docs/readme.txt")).unwrap(),
        "hello from alice\n"
    );
    assert_eq!(
        fs::read_link(mount.path("alice/latest")).unwrap(),
        Path::new("docs/readme.txt")
    );
}

#[test]
fn test_alias_is_symlink_to_canonical_name() {
    skip_if_no_fuse!();
    let mount = TestMount::new();

    assert_eq!(
        fs::read_link(mount.path("bob,alice")).unwrap(),
        Path::new("alice,bob")
    );
    assert!(fs::metadata(mount.path("bob,alice")).unwrap().is_dir());
}

#[test]
fn test_unfavorited_folder_is_reachable_by_name() {
    skip_if_no_fuse!();
    let mount = TestMount::new();

    assert_eq!(
        fs::read_to_string(mount.path("carol/public/index.html")).unwrap(),
        "<html></html>"
    );
    let err = fs::read_dir(mount.path("carol/private")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_mount_is_read_only() {
    skip_if_no_fuse!();
    let mount = TestMount::new();

    let err = fs::OpenOptions::new()
        .write(true)
        .open(mount.path("alice/docs/readme.txt"))
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EROFS));
}
