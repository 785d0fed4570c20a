//! Mount integration tests for vaporfs-fuse.
//!
//! These tests create real kernel mounts and drive them through ordinary
//! file I/O, verifying that mutations made through the kernel and through
//! the programmatic engine are mutually visible.
//!
//! Requirements:
//! - FUSE must be installed (fuse3 on Linux, macFUSE on macOS)
//! - `fusermount`/`umount` must be runnable by the test user
//!
//! The kernel-facing tests are `#[ignore]`d so plain `cargo test` stays
//! hermetic; run them with `cargo test -- --ignored` on a FUSE-capable host.

#![cfg(unix)]

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tempfile::TempDir;
use vaporfs_core::{MemFs, ROOT_INO};
use vaporfs_fuse::{mount, MountError, MountHandle, MountOptions};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Check if FUSE is available on this system.
fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
macro_rules! require_fuse {
    () => {
        if !fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

fn mount_fresh(engine: MemFs) -> (TempDir, MountHandle) {
    init_tracing();
    let temp = TempDir::new().expect("failed to create temp dir");
    let handle = mount(engine, temp.path(), &MountOptions::default()).expect("mount failed");
    (temp, handle)
}

// ============================================================================
// Mount lifecycle (no kernel required)
// ============================================================================

#[test]
fn mount_missing_mount_point_is_classified() {
    let err = mount(
        MemFs::new(),
        "/definitely/not/a/real/mount/point",
        &MountOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, MountError::NoSuchMountPoint(_)));
}

#[test]
fn mount_on_file_is_classified() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let err = mount(MemFs::new(), file.path(), &MountOptions::default()).unwrap_err();
    assert!(matches!(err, MountError::NotADirectory(_)));
}

// ============================================================================
// Kernel round-trips
// ============================================================================

#[test]
#[ignore = "requires FUSE"]
fn mount_stat_and_unmount() {
    require_fuse!();
    let (temp, mut handle) = mount_fresh(MemFs::new());

    assert!(handle.is_mounted());
    assert_eq!(handle.mount_point(), temp.path());

    // The mounted root is the engine's root inode.
    let meta = fs::metadata(temp.path()).expect("stat mount point");
    assert!(meta.is_dir());
    assert_eq!(meta.ino(), ROOT_INO);

    handle.unmount().expect("unmount failed");
    assert!(!handle.is_mounted());

    // After unmount the mount point is a plain (empty) directory again.
    let meta = fs::metadata(temp.path()).expect("stat after unmount");
    assert_ne!(meta.ino(), ROOT_INO);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
#[ignore = "requires FUSE"]
fn unmount_is_idempotent() {
    require_fuse!();
    let (_temp, mut handle) = mount_fresh(MemFs::new());
    handle.unmount().expect("first unmount");
    handle.unmount().expect("second unmount should be a no-op");
    handle.unmount().expect("third unmount should be a no-op");
}

#[test]
#[ignore = "requires FUSE"]
fn external_write_is_visible_to_the_engine() {
    require_fuse!();
    let engine = MemFs::new();
    let (temp, mut handle) = mount_fresh(engine.clone());

    // The role of `echo hello > {mount}/greet`, played by ordinary file I/O.
    {
        let mut f = File::create(temp.path().join("greet")).expect("create through kernel");
        f.write_all(b"hello\n").expect("write through kernel");
    }

    let f = engine.get("/greet").unwrap().into_file().unwrap();
    assert_eq!(f.read(), b"hello\n");

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn engine_write_is_visible_through_the_kernel() {
    require_fuse!();
    let engine = MemFs::new();
    engine
        .create_file("/pre.txt", b"seeded before mount".to_vec(), 0o644)
        .unwrap();
    let (temp, mut handle) = mount_fresh(engine.clone());

    let mut content = Vec::new();
    File::open(temp.path().join("pre.txt"))
        .expect("open through kernel")
        .read_to_end(&mut content)
        .expect("read through kernel");
    assert_eq!(content, b"seeded before mount");

    // Mutations after mount are visible without any sync step.
    let f = engine.get("/pre.txt").unwrap().into_file().unwrap();
    f.write(b"updated live".to_vec());
    assert_eq!(fs::read(temp.path().join("pre.txt")).unwrap(), b"updated live");

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn mkdir_listdir_and_rmdir_through_kernel() {
    require_fuse!();
    let engine = MemFs::new();
    let (temp, mut handle) = mount_fresh(engine.clone());

    let dir = temp.path().join("made-by-kernel");
    fs::create_dir(&dir).expect("mkdir through kernel");
    assert!(engine.exists("/made-by-kernel"));

    fs::write(dir.join("a.txt"), b"a").unwrap();
    fs::write(dir.join("b.txt"), b"b").unwrap();
    let mut names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt"]);

    // rmdir refuses while populated, succeeds once drained.
    assert!(fs::remove_dir(&dir).is_err());
    fs::remove_file(dir.join("a.txt")).unwrap();
    fs::remove_file(dir.join("b.txt")).unwrap();
    fs::remove_dir(&dir).expect("rmdir through kernel");
    assert!(!engine.exists("/made-by-kernel"));

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn rename_through_kernel_preserves_content() {
    require_fuse!();
    let engine = MemFs::new();
    engine
        .create_file("/original", b"payload".to_vec(), 0o644)
        .unwrap();
    let (temp, mut handle) = mount_fresh(engine.clone());

    fs::rename(temp.path().join("original"), temp.path().join("renamed"))
        .expect("rename through kernel");

    assert!(!engine.exists("/original"));
    let f = engine.get("/renamed").unwrap().into_file().unwrap();
    assert_eq!(f.read(), b"payload");

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn symlink_round_trip_through_kernel() {
    require_fuse!();
    let engine = MemFs::new();
    let (temp, mut handle) = mount_fresh(engine.clone());

    std::os::unix::fs::symlink("target_file.txt", temp.path().join("lnk"))
        .expect("symlink through kernel");

    assert!(engine.is_symlink("/lnk"));
    assert_eq!(engine.readlink("/lnk").unwrap(), "target_file.txt");

    let read_back = fs::read_link(temp.path().join("lnk")).expect("readlink through kernel");
    assert_eq!(read_back.to_string_lossy(), "target_file.txt");

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn truncate_and_append_through_kernel() {
    require_fuse!();
    let engine = MemFs::new();
    engine
        .create_file("/t.bin", b"0123456789".to_vec(), 0o644)
        .unwrap();
    let (temp, mut handle) = mount_fresh(engine.clone());

    let path = temp.path().join("t.bin");

    // O_TRUNC rewrite.
    fs::write(&path, b"short").unwrap();
    let f = engine.get("/t.bin").unwrap().into_file().unwrap();
    assert_eq!(f.read(), b"short");

    // Append extends.
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"+more").unwrap();
    drop(file);
    assert_eq!(f.read(), b"short+more");

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn open_file_survives_unlink_through_kernel() {
    require_fuse!();
    let engine = MemFs::new();
    engine
        .create_file("/doomed", b"still readable".to_vec(), 0o644)
        .unwrap();
    let (temp, mut handle) = mount_fresh(engine.clone());

    let path = temp.path().join("doomed");
    let mut file = File::open(&path).expect("open");
    fs::remove_file(&path).expect("unlink while open");
    assert!(!engine.exists("/doomed"));

    let mut content = Vec::new();
    file.read_to_end(&mut content).expect("read after unlink");
    assert_eq!(content, b"still readable");

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn readdir_offset_walk_is_stable() {
    require_fuse!();
    let engine = MemFs::new();
    for i in 0..100 {
        engine
            .create_file(&format!("/file{i:03}"), Vec::new(), 0o644)
            .unwrap();
    }
    let (temp, mut handle) = mount_fresh(engine.clone());

    let count = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(count, 100);

    handle.unmount().expect("unmount");
}

#[test]
#[ignore = "requires FUSE"]
fn double_mount_of_same_target_is_rejected() {
    require_fuse!();
    let engine = MemFs::new();
    let (temp, mut handle) = mount_fresh(engine.clone());

    let err = mount(MemFs::new(), temp.path(), &MountOptions::default()).unwrap_err();
    assert!(matches!(err, MountError::AlreadyMounted(_)));

    handle.unmount().expect("unmount");
}
