//! Attribute translation between the engine and the kernel.

use fuser::{FileAttr, FileType};
use vaporfs_core::{NodeAttr, NodeType};

/// Block size reported in `st_blksize` and used for `statfs` synthesis.
pub(crate) const BLKSIZE: u32 = 512;

/// Convert an engine node type to the fuser file type.
pub(crate) fn to_file_type(kind: NodeType) -> FileType {
    match kind {
        NodeType::File => FileType::RegularFile,
        NodeType::Directory => FileType::Directory,
        NodeType::Symlink => FileType::Symlink,
    }
}

/// Convert an engine attribute snapshot to a kernel `FileAttr`.
///
/// Ownership is always the mounting process; the engine itself is
/// permission-free storage.
pub(crate) fn to_file_attr(attr: &NodeAttr, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: to_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid,
        gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn file_type_conversion() {
        assert_eq!(to_file_type(NodeType::File), FileType::RegularFile);
        assert_eq!(to_file_type(NodeType::Directory), FileType::Directory);
        assert_eq!(to_file_type(NodeType::Symlink), FileType::Symlink);
    }

    #[test]
    fn attr_conversion_carries_fields() {
        let now = SystemTime::now();
        let attr = NodeAttr {
            ino: 42,
            size: 1024,
            blocks: 2,
            atime: now,
            mtime: now,
            ctime: now,
            kind: NodeType::File,
            perm: 0o640,
            nlink: 1,
        };
        let fattr = to_file_attr(&attr, 1000, 1000);
        assert_eq!(fattr.ino, 42);
        assert_eq!(fattr.size, 1024);
        assert_eq!(fattr.blocks, 2);
        assert_eq!(fattr.kind, FileType::RegularFile);
        assert_eq!(fattr.perm, 0o640);
        assert_eq!(fattr.nlink, 1);
        assert_eq!(fattr.uid, 1000);
        assert_eq!(fattr.gid, 1000);
        assert_eq!(fattr.crtime, now);
        assert_eq!(fattr.blksize, BLKSIZE);
    }
}
