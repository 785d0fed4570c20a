//! FUSE adapter and mount lifecycle for vaporfs.
//!
//! This crate is the kernel-facing half of vaporfs: [`VaporFs`] implements
//! the fuser callback surface over a `vaporfs_core::MemFs` engine, and
//! [`mount`] binds an engine to a mount point behind a scoped
//! [`MountHandle`].
//!
//! ```no_run
//! use vaporfs_core::MemFs;
//! use vaporfs_fuse::{mount, MountOptions};
//!
//! let engine = MemFs::new();
//! engine.create_file("/hello.txt", b"hi".to_vec(), 0o644).unwrap();
//!
//! let mut handle = mount(engine, "/mnt/vapor", &MountOptions::default()).unwrap();
//! // ... external processes now see /mnt/vapor/hello.txt ...
//! handle.unmount().unwrap();
//! ```

mod attr;
pub mod filesystem;
mod force_unmount;
mod handles;
pub mod mount;

pub use filesystem::VaporFs;
pub use mount::{mount, MountError, MountHandle, MountOptions};
