//! The in-memory node store.
//!
//! Nodes live in an arena keyed by inode number; parent and child links are
//! stored as inode numbers rather than owning references, which removes the
//! parent/child reference cycle and gives the FUSE adapter its table key for
//! free. A slot stays allocated while it is reachable from the tree *or*
//! pinned by an external holder (an API handle, or the kernel's lookup
//! count), matching POSIX open-unlink semantics.
//!
//! The table is not synchronized; the engine wraps it in its exclusive lock
//! and every method here runs inside one critical section.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use crate::error::{FsError, Result};

/// Unique inode identifier.
pub type Ino = u64;

/// Root inode is always 1 in FUSE.
pub const ROOT_INO: Ino = 1;

/// Block granularity used when synthesizing `st_blocks`.
pub const BLOCK_SIZE: u64 = 512;

/// The three node flavors, without their payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    Symlink,
}

/// Variant payload of a node.
#[derive(Debug)]
pub enum NodeKind {
    File { content: Vec<u8> },
    Directory { children: BTreeMap<String, Ino> },
    Symlink { target: String },
}

impl NodeKind {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::File { .. } => NodeType::File,
            NodeKind::Directory { .. } => NodeType::Directory,
            NodeKind::Symlink { .. } => NodeType::Symlink,
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory { .. })
    }
}

/// A single node record: the final name under its parent, the permission
/// bits, timestamps, and the variant payload.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub mode: u16,
    pub parent: Option<Ino>,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_file(name: impl Into<String>, content: Vec<u8>, mode: u16) -> Self {
        Self::new(name.into(), mode, NodeKind::File { content })
    }

    pub fn new_dir(name: impl Into<String>, mode: u16) -> Self {
        Self::new(
            name.into(),
            mode,
            NodeKind::Directory {
                children: BTreeMap::new(),
            },
        )
    }

    pub fn new_symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name.into(),
            0o777,
            NodeKind::Symlink {
                target: target.into(),
            },
        )
    }

    fn new(name: String, mode: u16, kind: NodeKind) -> Self {
        let now = SystemTime::now();
        Self {
            name,
            mode: mode & 0o7777,
            parent: None,
            atime: now,
            mtime: now,
            ctime: now,
            kind,
        }
    }

    /// Logical size: content length for files, target length for symlinks,
    /// zero for directories.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { content } => content.len() as u64,
            NodeKind::Symlink { target } => target.len() as u64,
            NodeKind::Directory { .. } => 0,
        }
    }
}

/// Flat attribute snapshot handed to callers and the FUSE adapter.
#[derive(Debug, Clone, Copy)]
pub struct NodeAttr {
    pub ino: Ino,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: NodeType,
    pub perm: u16,
    pub nlink: u32,
}

/// One entry of a directory listing snapshot.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: Ino,
    pub kind: NodeType,
    pub name: String,
}

/// Aggregate store totals, used to synthesize `statfs` replies.
#[derive(Debug, Clone, Copy)]
pub struct StoreTotals {
    pub nodes: u64,
    pub bytes: u64,
}

struct Slot {
    node: Node,
    /// External references: API handles plus the kernel's lookup count.
    pins: u64,
    /// Whether the node is still attached to a parent (or is the root).
    linked: bool,
}

/// Arena of node slots keyed by inode number.
///
/// Guarantees, against its own operations: exactly one root; every linked
/// non-root node appears in its parent's child map under its own name; child
/// keys are never `""`, `"."`, or `".."`; inode numbers are unique among
/// live slots and never reused while a slot exists.
pub struct NodeTable {
    slots: HashMap<Ino, Slot>,
    next_ino: Ino,
}

impl NodeTable {
    /// Create a table holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let mut slots = HashMap::new();
        let root = Node::new_dir("", 0o755);
        slots.insert(
            ROOT_INO,
            Slot {
                node: root,
                pins: 0,
                linked: true,
            },
        );
        Self {
            slots,
            next_ino: ROOT_INO + 1,
        }
    }

    fn alloc_ino(&mut self) -> Ino {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    pub fn get(&self, ino: Ino) -> Option<&Node> {
        self.slots.get(&ino).map(|s| &s.node)
    }

    pub fn get_mut(&mut self, ino: Ino) -> Option<&mut Node> {
        self.slots.get_mut(&ino).map(|s| &mut s.node)
    }

    /// Whether the node is still attached to the tree.
    pub fn is_linked(&self, ino: Ino) -> bool {
        self.slots.get(&ino).is_some_and(|s| s.linked)
    }

    /// Resolve a child name within a directory.
    pub fn lookup(&self, parent: Ino, name: &str) -> Option<Ino> {
        match &self.get(parent)?.kind {
            NodeKind::Directory { children } => children.get(name).copied(),
            _ => None,
        }
    }

    /// Insert a freshly constructed node under `parent`, allocating its
    /// inode number. The node's `name` must be a valid child key and free
    /// within the parent.
    pub fn insert_child(&mut self, parent: Ino, mut node: Node) -> Result<Ino> {
        validate_name(&node.name)?;
        match self.slots.get(&parent).map(|s| &s.node.kind) {
            Some(NodeKind::Directory { children }) => {
                if children.contains_key(&node.name) {
                    return Err(FsError::AlreadyExists(node.name));
                }
            }
            Some(_) => return Err(FsError::NotADirectory(format!("inode {parent}"))),
            None => return Err(FsError::NotFound(format!("inode {parent}"))),
        }

        let ino = self.alloc_ino();
        node.parent = Some(parent);
        let name = node.name.clone();
        self.slots.insert(
            ino,
            Slot {
                node,
                pins: 0,
                linked: true,
            },
        );
        self.with_children_mut(parent, |children| {
            children.insert(name, ino);
        });
        self.touch(parent);
        Ok(ino)
    }

    /// Detach the named child from `parent`. The slot itself is reclaimed
    /// once its pin count reaches zero. Returns the detached inode.
    ///
    /// Policy checks (is it a directory, is it empty) belong to the engine;
    /// this primitive only maintains link consistency.
    pub fn remove_child(&mut self, parent: Ino, name: &str) -> Result<Ino> {
        let ino = self
            .lookup(parent, name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        self.with_children_mut(parent, |children| {
            children.remove(name);
        });
        self.touch(parent);
        let reclaim = match self.slots.get_mut(&ino) {
            Some(slot) => {
                slot.linked = false;
                slot.pins == 0
            }
            None => false,
        };
        if reclaim {
            self.slots.remove(&ino);
        }
        Ok(ino)
    }

    /// Move a child to a new parent and/or name, preserving its identity.
    /// The destination name must be free; callers resolve replacement rules
    /// before getting here.
    pub fn rename_child(
        &mut self,
        old_parent: Ino,
        old_name: &str,
        new_parent: Ino,
        new_name: &str,
    ) -> Result<()> {
        validate_name(new_name)?;
        let ino = self
            .lookup(old_parent, old_name)
            .ok_or_else(|| FsError::NotFound(old_name.to_string()))?;

        self.with_children_mut(old_parent, |children| {
            children.remove(old_name);
        });
        self.with_children_mut(new_parent, |children| {
            children.insert(new_name.to_string(), ino);
        });
        if let Some(node) = self.get_mut(ino) {
            node.name = new_name.to_string();
            node.parent = Some(new_parent);
            node.ctime = SystemTime::now();
        }
        self.touch(old_parent);
        if new_parent != old_parent {
            self.touch(new_parent);
        }
        Ok(())
    }

    /// Attribute snapshot for a live node.
    pub fn attr(&self, ino: Ino) -> Option<NodeAttr> {
        let node = self.get(ino)?;
        let size = node.size();
        let nlink = match &node.kind {
            NodeKind::Directory { children } => {
                let subdirs = children
                    .values()
                    .filter(|child| self.get(**child).is_some_and(|n| n.kind.is_dir()))
                    .count() as u32;
                2 + subdirs
            }
            _ => 1,
        };
        Some(NodeAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE),
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            kind: node.kind.node_type(),
            perm: node.mode,
            nlink,
        })
    }

    /// Take an external reference on a slot.
    pub fn pin(&mut self, ino: Ino) {
        if let Some(slot) = self.slots.get_mut(&ino) {
            slot.pins += 1;
        }
    }

    /// Release `n` external references; reclaims the slot once it is both
    /// unpinned and detached. The root is never reclaimed.
    pub fn unpin(&mut self, ino: Ino, n: u64) {
        if ino == ROOT_INO {
            return;
        }
        let reclaim = match self.slots.get_mut(&ino) {
            Some(slot) => {
                slot.pins = slot.pins.saturating_sub(n);
                slot.pins == 0 && !slot.linked
            }
            None => false,
        };
        if reclaim {
            self.slots.remove(&ino);
        }
    }

    /// Whether `anc` lies on the parent chain of `ino` (or equals it).
    pub fn is_ancestor(&self, anc: Ino, ino: Ino) -> bool {
        let mut cur = Some(ino);
        while let Some(i) = cur {
            if i == anc {
                return true;
            }
            cur = self.get(i).and_then(|n| n.parent);
        }
        false
    }

    /// Count of live slots and total payload bytes.
    pub fn totals(&self) -> StoreTotals {
        let bytes = self.slots.values().map(|s| s.node.size()).sum();
        StoreTotals {
            nodes: self.slots.len() as u64,
            bytes,
        }
    }

    fn with_children_mut(&mut self, ino: Ino, f: impl FnOnce(&mut BTreeMap<String, Ino>)) {
        if let Some(node) = self.get_mut(ino) {
            if let NodeKind::Directory { children } = &mut node.kind {
                f(children);
            }
        }
    }

    fn touch(&mut self, ino: Ino) {
        if let Some(node) = self.get_mut(ino) {
            let now = SystemTime::now();
            node.mtime = now;
            node.ctime = now;
        }
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::BadPath(format!("invalid name: {name:?}")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(FsError::BadPath(format!("invalid name: {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_root_only() {
        let table = NodeTable::new();
        let root = table.get(ROOT_INO).unwrap();
        assert!(root.kind.is_dir());
        assert!(root.parent.is_none());
        assert_eq!(table.totals().nodes, 1);
    }

    #[test]
    fn insert_and_lookup() {
        let mut table = NodeTable::new();
        let ino = table
            .insert_child(ROOT_INO, Node::new_file("a.txt", b"hi".to_vec(), 0o644))
            .unwrap();
        assert!(ino > ROOT_INO);
        assert_eq!(table.lookup(ROOT_INO, "a.txt"), Some(ino));
        assert_eq!(table.get(ino).unwrap().parent, Some(ROOT_INO));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut table = NodeTable::new();
        table
            .insert_child(ROOT_INO, Node::new_dir("d", 0o755))
            .unwrap();
        let err = table
            .insert_child(ROOT_INO, Node::new_file("d", vec![], 0o644))
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[test]
    fn reserved_names_rejected() {
        let mut table = NodeTable::new();
        for name in ["", ".", "..", "a/b", "nul\0"] {
            let err = table
                .insert_child(ROOT_INO, Node::new_file(name, vec![], 0o644))
                .unwrap_err();
            assert!(matches!(err, FsError::BadPath(_)), "accepted {name:?}");
        }
    }

    #[test]
    fn remove_reclaims_unpinned_slot() {
        let mut table = NodeTable::new();
        let ino = table
            .insert_child(ROOT_INO, Node::new_file("f", vec![], 0o644))
            .unwrap();
        table.remove_child(ROOT_INO, "f").unwrap();
        assert!(table.get(ino).is_none());
        assert_eq!(table.lookup(ROOT_INO, "f"), None);
    }

    #[test]
    fn pinned_slot_survives_removal() {
        let mut table = NodeTable::new();
        let ino = table
            .insert_child(ROOT_INO, Node::new_file("f", b"data".to_vec(), 0o644))
            .unwrap();
        table.pin(ino);
        table.remove_child(ROOT_INO, "f").unwrap();

        // Detached but still readable through the slot.
        assert!(table.get(ino).is_some());
        assert!(!table.is_linked(ino));

        table.unpin(ino, 1);
        assert!(table.get(ino).is_none());
    }

    #[test]
    fn rename_preserves_identity() {
        let mut table = NodeTable::new();
        let dir = table
            .insert_child(ROOT_INO, Node::new_dir("d", 0o755))
            .unwrap();
        let ino = table
            .insert_child(ROOT_INO, Node::new_file("old", vec![], 0o644))
            .unwrap();
        table.rename_child(ROOT_INO, "old", dir, "new").unwrap();

        assert_eq!(table.lookup(ROOT_INO, "old"), None);
        assert_eq!(table.lookup(dir, "new"), Some(ino));
        let node = table.get(ino).unwrap();
        assert_eq!(node.name, "new");
        assert_eq!(node.parent, Some(dir));
    }

    #[test]
    fn dir_nlink_counts_subdirectories() {
        let mut table = NodeTable::new();
        table
            .insert_child(ROOT_INO, Node::new_dir("d1", 0o755))
            .unwrap();
        table
            .insert_child(ROOT_INO, Node::new_dir("d2", 0o755))
            .unwrap();
        table
            .insert_child(ROOT_INO, Node::new_file("f", vec![], 0o644))
            .unwrap();
        let attr = table.attr(ROOT_INO).unwrap();
        assert_eq!(attr.nlink, 4); // 2 + two subdirectories, files don't count
    }

    #[test]
    fn ancestor_walk() {
        let mut table = NodeTable::new();
        let a = table
            .insert_child(ROOT_INO, Node::new_dir("a", 0o755))
            .unwrap();
        let b = table.insert_child(a, Node::new_dir("b", 0o755)).unwrap();
        assert!(table.is_ancestor(ROOT_INO, b));
        assert!(table.is_ancestor(a, b));
        assert!(table.is_ancestor(b, b));
        assert!(!table.is_ancestor(b, a));
    }

    #[test]
    fn inode_numbers_never_reused() {
        let mut table = NodeTable::new();
        let first = table
            .insert_child(ROOT_INO, Node::new_file("f", vec![], 0o644))
            .unwrap();
        table.remove_child(ROOT_INO, "f").unwrap();
        let second = table
            .insert_child(ROOT_INO, Node::new_file("f", vec![], 0o644))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn symlink_attrs() {
        let mut table = NodeTable::new();
        let ino = table
            .insert_child(ROOT_INO, Node::new_symlink("lnk", "/some/where"))
            .unwrap();
        let attr = table.attr(ino).unwrap();
        assert_eq!(attr.kind, NodeType::Symlink);
        assert_eq!(attr.perm, 0o777);
        assert_eq!(attr.size, "/some/where".len() as u64);
        assert_eq!(attr.nlink, 1);
    }
}
