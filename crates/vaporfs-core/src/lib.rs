#![forbid(unsafe_code)]
//! In-memory hierarchical filesystem engine.
//!
//! The crate holds the volatile tree of files, directories, and symlinks and
//! the synchronous operations over it. Nothing here touches the kernel; the
//! companion `vaporfs-fuse` crate translates FUSE callbacks into the
//! inode-based surface exposed by [`MemFs`].
//!
//! ```
//! use vaporfs_core::MemFs;
//!
//! let fs = MemFs::new();
//! fs.makedirs("/a/b", 0o755).unwrap();
//! let f = fs.create_file("/a/b/hello.txt", b"hi".to_vec(), 0o644).unwrap();
//! assert_eq!(f.read(), b"hi");
//! assert!(fs.exists("/a/b/hello.txt"));
//! ```

pub mod engine;
pub mod error;
pub mod node;
pub mod path;

pub use engine::{DirRef, FileRef, MemFs, NodeHandle, SymlinkRef};
pub use error::{FsError, Result};
pub use node::{DirEntry, Ino, NodeAttr, NodeType, StoreTotals, ROOT_INO};
