//! The filesystem engine: synchronous operations over the node store.
//!
//! [`MemFs`] owns the arena behind a single engine-wide exclusive lock.
//! Every public operation acquires the lock, does its work, and releases it,
//! so concurrent callers (in-process threads and the kernel-driven FUSE
//! worker alike) observe a linearizable sequence of whole operations.
//!
//! Two surfaces share that lock:
//! - the path-based API (`create_file`, `makedirs`, `rename`, ...), which
//!   hands out pinned node handles, and
//! - the inode-based surface (`lookup_entry`, `read_at`, `rename_entry`,
//!   ...) consumed by the FUSE adapter.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{FsError, Result};
use crate::node::{
    DirEntry, Ino, Node, NodeAttr, NodeKind, NodeTable, NodeType, StoreTotals, ROOT_INO,
};
use crate::path;

/// The in-memory filesystem engine.
///
/// Cheap to clone; clones share the same tree. The engine (and therefore the
/// tree) lives as long as any clone or any outstanding node handle.
#[derive(Clone)]
pub struct MemFs {
    table: Arc<Mutex<NodeTable>>,
}

impl MemFs {
    /// Create an empty filesystem containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(NodeTable::new())),
        }
    }

    /// Handle to the root directory.
    #[must_use]
    pub fn root(&self) -> DirRef {
        let mut table = self.table.lock();
        DirRef(Pinned::new(self, &mut table, ROOT_INO))
    }

    // ── Path-based API ──────────────────────────────────────────────────

    /// Create a file at `path` with the given initial content.
    ///
    /// The parent must exist and be a directory; the final component must
    /// not already exist.
    pub fn create_file(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
        mode: u16,
    ) -> Result<FileRef> {
        let (parent_parts, name) = path::parse_parent(path)?;
        let mut table = self.table.lock();
        let parent = resolve_dir(&table, &parent_parts)?;
        let ino = table.insert_child(parent, Node::new_file(name, content.into(), mode))?;
        trace!(path, ino, "create_file");
        Ok(FileRef(Pinned::new(self, &mut table, ino)))
    }

    /// Create a directory at `path`. Fails if the final component exists.
    pub fn create_dir(&self, path: &str, mode: u16) -> Result<DirRef> {
        let (parent_parts, name) = path::parse_parent(path)?;
        let mut table = self.table.lock();
        let parent = resolve_dir(&table, &parent_parts)?;
        let ino = table.insert_child(parent, Node::new_dir(name, mode))?;
        trace!(path, ino, "create_dir");
        Ok(DirRef(Pinned::new(self, &mut table, ino)))
    }

    /// Create all missing directories along `path` (like `mkdir -p`).
    ///
    /// Succeeds idempotently when the full path already exists as a
    /// directory. An existing non-directory anywhere along the path fails
    /// with `NotADirectory`, leaving any directories created so far in
    /// place.
    pub fn makedirs(&self, path: &str, mode: u16) -> Result<DirRef> {
        let parts = path::parse(path)?;
        let mut table = self.table.lock();
        let mut cur = ROOT_INO;
        for part in &parts {
            match table.lookup(cur, part) {
                Some(child) => {
                    let node = table
                        .get(child)
                        .ok_or_else(|| FsError::NotFound(part.clone()))?;
                    if !node.kind.is_dir() {
                        return Err(FsError::NotADirectory(part.clone()));
                    }
                    cur = child;
                }
                None => {
                    cur = table.insert_child(cur, Node::new_dir(part.clone(), mode))?;
                }
            }
        }
        trace!(path, ino = cur, "makedirs");
        Ok(DirRef(Pinned::new(self, &mut table, cur)))
    }

    /// Resolve `path` to a node handle, without following symlinks anywhere.
    pub fn get(&self, path: &str) -> Result<NodeHandle> {
        let parts = path::parse(path)?;
        let mut table = self.table.lock();
        let ino = resolve(&table, &parts)?;
        let kind = table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?
            .kind
            .node_type();
        let pinned = Pinned::new(self, &mut table, ino);
        Ok(match kind {
            NodeType::File => NodeHandle::File(FileRef(pinned)),
            NodeType::Directory => NodeHandle::Dir(DirRef(pinned)),
            NodeType::Symlink => NodeHandle::Symlink(SymlinkRef(pinned)),
        })
    }

    /// Whether `path` resolves to a node. Total: malformed paths are simply
    /// absent.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        let Ok(parts) = path::parse(path) else {
            return false;
        };
        let table = self.table.lock();
        resolve(&table, &parts).is_ok()
    }

    /// Create a symlink at `path` pointing at `target`.
    ///
    /// The target is stored verbatim; it need not exist or be reachable.
    pub fn symlink(&self, target: &str, path: &str) -> Result<SymlinkRef> {
        let (parent_parts, name) = path::parse_parent(path)?;
        let mut table = self.table.lock();
        let parent = resolve_dir(&table, &parent_parts)?;
        let ino = table.insert_child(parent, Node::new_symlink(name, target))?;
        trace!(path, target, ino, "symlink");
        Ok(SymlinkRef(Pinned::new(self, &mut table, ino)))
    }

    /// Read the stored target of the symlink at `path`.
    pub fn readlink(&self, path: &str) -> Result<String> {
        let parts = path::parse(path)?;
        let table = self.table.lock();
        let ino = resolve(&table, &parts)?;
        match &table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?
            .kind
        {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::NotASymlink(path.to_string())),
        }
    }

    /// Whether `path` resolves to a symlink. Total.
    #[must_use]
    pub fn is_symlink(&self, path: &str) -> bool {
        let Ok(parts) = path::parse(path) else {
            return false;
        };
        let table = self.table.lock();
        resolve(&table, &parts)
            .ok()
            .and_then(|ino| table.get(ino))
            .is_some_and(|node| matches!(node.kind, NodeKind::Symlink { .. }))
    }

    /// Remove the file or symlink at `path`.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let (parent_parts, name) = path::parse_parent(path)?;
        let mut table = self.table.lock();
        let parent = resolve_dir(&table, &parent_parts)?;
        let ino = table
            .lookup(parent, &name)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if table.get(ino).is_some_and(|n| n.kind.is_dir()) {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        table.remove_child(parent, &name)?;
        trace!(path, ino, "remove_file");
        Ok(())
    }

    /// Remove the empty directory at `path`. The root cannot be removed.
    pub fn remove_dir(&self, path: &str) -> Result<()> {
        let parts = path::parse(path)?;
        if parts.is_empty() {
            return Err(FsError::InvalidArgument(
                "cannot remove the root directory".into(),
            ));
        }
        let (parent_parts, name) = path::parse_parent(path)?;
        let mut table = self.table.lock();
        let parent = resolve_dir(&table, &parent_parts)?;
        let ino = table
            .lookup(parent, &name)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        match &table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?
            .kind
        {
            NodeKind::Directory { children } => {
                if !children.is_empty() {
                    return Err(FsError::NotEmpty(path.to_string()));
                }
            }
            _ => return Err(FsError::NotADirectory(path.to_string())),
        }
        table.remove_child(parent, &name)?;
        trace!(path, ino, "remove_dir");
        Ok(())
    }

    /// Names of the children of the directory at `path`, in sorted order.
    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let parts = path::parse(path)?;
        let table = self.table.lock();
        let ino = resolve(&table, &parts)?;
        match &table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?
            .kind
        {
            NodeKind::Directory { children } => Ok(children.keys().cloned().collect()),
            _ => Err(FsError::NotADirectory(path.to_string())),
        }
    }

    /// Atomically rename `old` to `new`, preserving node identity.
    ///
    /// An existing destination is replaced only by a node of the same kind,
    /// and a destination directory must be empty. A directory can never be
    /// moved beneath itself.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let (old_parent_parts, old_name) = path::parse_parent(old)?;
        let (new_parent_parts, new_name) = path::parse_parent(new)?;
        let mut table = self.table.lock();
        let old_parent = resolve_dir(&table, &old_parent_parts)?;
        let new_parent = resolve_dir(&table, &new_parent_parts)?;
        rename_locked(&mut table, old_parent, &old_name, new_parent, &new_name)?;
        trace!(old, new, "rename");
        Ok(())
    }

    // ── Inode-based surface (FUSE adapter) ──────────────────────────────

    /// Resolve a child by name and take a reference on it, mirroring the
    /// kernel's lookup-count protocol. Balance with [`MemFs::forget`].
    pub fn lookup_entry(&self, parent: Ino, name: &str) -> Result<NodeAttr> {
        let mut table = self.table.lock();
        match table.get(parent) {
            Some(node) if node.kind.is_dir() => {}
            Some(_) => return Err(FsError::NotADirectory(format!("inode {parent}"))),
            None => return Err(FsError::NotFound(format!("inode {parent}"))),
        }
        let ino = table
            .lookup(parent, name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        table.pin(ino);
        attr_locked(&table, ino)
    }

    /// Release `nlookup` references taken by [`MemFs::lookup_entry`] (and by
    /// the create-family operations below).
    pub fn forget(&self, ino: Ino, nlookup: u64) {
        self.table.lock().unpin(ino, nlookup);
    }

    /// Attribute snapshot for a live inode.
    pub fn attr_of(&self, ino: Ino) -> Result<NodeAttr> {
        attr_locked(&self.table.lock(), ino)
    }

    /// Apply a `setattr`-style update in one critical section.
    ///
    /// `size` truncates or zero-extends files only; `mode` is ignored on
    /// symlinks (their reported permissions are fixed).
    pub fn setattr_ino(
        &self,
        ino: Ino,
        mode: Option<u16>,
        size: Option<u64>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<NodeAttr> {
        let mut table = self.table.lock();
        let now = SystemTime::now();
        {
            let node = table
                .get_mut(ino)
                .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))?;
            if let Some(new_size) = size {
                match &mut node.kind {
                    NodeKind::File { content } => {
                        content.resize(new_size as usize, 0);
                        node.mtime = now;
                    }
                    NodeKind::Directory { .. } => {
                        return Err(FsError::IsADirectory(format!("inode {ino}")))
                    }
                    NodeKind::Symlink { .. } => {
                        return Err(FsError::InvalidArgument(format!(
                            "cannot truncate symlink inode {ino}"
                        )))
                    }
                }
            }
            if let Some(new_mode) = mode {
                if !matches!(node.kind, NodeKind::Symlink { .. }) {
                    node.mode = new_mode & 0o7777;
                }
            }
            if let Some(t) = atime {
                node.atime = t;
            }
            if let Some(t) = mtime {
                node.mtime = t;
            }
            node.ctime = now;
        }
        attr_locked(&table, ino)
    }

    /// Read up to `size` bytes of a file starting at `offset`.
    pub fn read_at(&self, ino: Ino, offset: u64, size: u32) -> Result<Vec<u8>> {
        let mut table = self.table.lock();
        let now = SystemTime::now();
        let node = table
            .get_mut(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))?;
        match &node.kind {
            NodeKind::File { content } => {
                let start = (offset as usize).min(content.len());
                let end = start.saturating_add(size as usize).min(content.len());
                let data = content[start..end].to_vec();
                node.atime = now;
                Ok(data)
            }
            NodeKind::Directory { .. } => Err(FsError::IsADirectory(format!("inode {ino}"))),
            NodeKind::Symlink { .. } => Err(FsError::InvalidArgument(format!(
                "cannot read symlink inode {ino} as a file"
            ))),
        }
    }

    /// Write `data` into a file at `offset`, zero-extending any gap between
    /// the current end and the write start. Returns the byte count written.
    pub fn write_at(&self, ino: Ino, offset: u64, data: &[u8]) -> Result<u32> {
        let mut table = self.table.lock();
        let now = SystemTime::now();
        let node = table
            .get_mut(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))?;
        match &mut node.kind {
            NodeKind::File { content } => {
                let offset = offset as usize;
                let end = offset + data.len();
                if end > content.len() {
                    content.resize(end, 0);
                }
                content[offset..end].copy_from_slice(data);
                node.mtime = now;
                node.ctime = now;
                Ok(data.len() as u32)
            }
            NodeKind::Directory { .. } => Err(FsError::IsADirectory(format!("inode {ino}"))),
            NodeKind::Symlink { .. } => Err(FsError::InvalidArgument(format!(
                "cannot write symlink inode {ino} as a file"
            ))),
        }
    }

    /// Snapshot of a directory's entries, including `.` and `..`.
    ///
    /// The snapshot is what gives each open directory a consistent view:
    /// the adapter captures it at `opendir` and walks it across `readdir`
    /// calls regardless of concurrent mutation.
    pub fn read_dir_snapshot(&self, ino: Ino) -> Result<Vec<DirEntry>> {
        let mut table = self.table.lock();
        let now = SystemTime::now();
        let node = table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))?;
        let children = match &node.kind {
            NodeKind::Directory { children } => children,
            _ => return Err(FsError::NotADirectory(format!("inode {ino}"))),
        };
        let parent = node.parent.unwrap_or(ROOT_INO);
        let mut entries = vec![
            DirEntry {
                ino,
                kind: NodeType::Directory,
                name: ".".to_string(),
            },
            DirEntry {
                ino: parent,
                kind: NodeType::Directory,
                name: "..".to_string(),
            },
        ];
        for (name, &child) in children {
            let Some(child_node) = table.get(child) else {
                continue;
            };
            entries.push(DirEntry {
                ino: child,
                kind: child_node.kind.node_type(),
                name: name.clone(),
            });
        }
        if let Some(node) = table.get_mut(ino) {
            node.atime = now;
        }
        Ok(entries)
    }

    /// Stored target of a symlink inode.
    pub fn link_target_ino(&self, ino: Ino) -> Result<String> {
        let table = self.table.lock();
        match &table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))?
            .kind
        {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::NotASymlink(format!("inode {ino}"))),
        }
    }

    /// Create an empty file under `parent`. Takes a lookup reference on the
    /// new node, as the kernel treats `create` as an implicit lookup.
    pub fn create_child(&self, parent: Ino, name: &str, mode: u16) -> Result<NodeAttr> {
        let mut table = self.table.lock();
        let ino = table.insert_child(parent, Node::new_file(name, Vec::new(), mode))?;
        table.pin(ino);
        attr_locked(&table, ino)
    }

    /// Create a directory under `parent`. Takes a lookup reference.
    pub fn mkdir_child(&self, parent: Ino, name: &str, mode: u16) -> Result<NodeAttr> {
        let mut table = self.table.lock();
        let ino = table.insert_child(parent, Node::new_dir(name, mode))?;
        table.pin(ino);
        attr_locked(&table, ino)
    }

    /// Create a symlink under `parent`. Takes a lookup reference.
    pub fn symlink_child(&self, parent: Ino, name: &str, target: &str) -> Result<NodeAttr> {
        let mut table = self.table.lock();
        let ino = table.insert_child(parent, Node::new_symlink(name, target))?;
        table.pin(ino);
        attr_locked(&table, ino)
    }

    /// Unlink a file or symlink child. Directories go through
    /// [`MemFs::rmdir_child`].
    pub fn unlink_child(&self, parent: Ino, name: &str) -> Result<()> {
        let mut table = self.table.lock();
        let ino = table
            .lookup(parent, name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        if table.get(ino).is_some_and(|n| n.kind.is_dir()) {
            return Err(FsError::IsADirectory(name.to_string()));
        }
        table.remove_child(parent, name)?;
        Ok(())
    }

    /// Remove an empty directory child.
    pub fn rmdir_child(&self, parent: Ino, name: &str) -> Result<()> {
        let mut table = self.table.lock();
        let ino = table
            .lookup(parent, name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        match &table
            .get(ino)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?
            .kind
        {
            NodeKind::Directory { children } => {
                if !children.is_empty() {
                    return Err(FsError::NotEmpty(name.to_string()));
                }
            }
            _ => return Err(FsError::NotADirectory(name.to_string())),
        }
        table.remove_child(parent, name)?;
        Ok(())
    }

    /// Inode-addressed rename, same rules as [`MemFs::rename`].
    pub fn rename_entry(
        &self,
        parent: Ino,
        name: &str,
        new_parent: Ino,
        new_name: &str,
    ) -> Result<()> {
        let mut table = self.table.lock();
        rename_locked(&mut table, parent, name, new_parent, new_name)
    }

    /// Live node count and payload bytes, for `statfs` synthesis.
    #[must_use]
    pub fn totals(&self) -> StoreTotals {
        self.table.lock().totals()
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

// ── Locked helpers ──────────────────────────────────────────────────────

fn resolve(table: &NodeTable, parts: &[String]) -> Result<Ino> {
    let mut cur = ROOT_INO;
    for part in parts {
        let node = table
            .get(cur)
            .ok_or_else(|| FsError::NotFound(part.clone()))?;
        match &node.kind {
            NodeKind::Directory { children } => {
                cur = children
                    .get(part)
                    .copied()
                    .ok_or_else(|| FsError::NotFound(part.clone()))?;
            }
            _ => return Err(FsError::NotADirectory(part.clone())),
        }
    }
    Ok(cur)
}

fn resolve_dir(table: &NodeTable, parts: &[String]) -> Result<Ino> {
    let ino = resolve(table, parts)?;
    let node = table
        .get(ino)
        .ok_or_else(|| FsError::NotFound(parts.join("/")))?;
    if node.kind.is_dir() {
        Ok(ino)
    } else {
        Err(FsError::NotADirectory(parts.join("/")))
    }
}

fn attr_locked(table: &NodeTable, ino: Ino) -> Result<NodeAttr> {
    table
        .attr(ino)
        .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
}

fn rename_locked(
    table: &mut NodeTable,
    old_parent: Ino,
    old_name: &str,
    new_parent: Ino,
    new_name: &str,
) -> Result<()> {
    let src = table
        .lookup(old_parent, old_name)
        .ok_or_else(|| FsError::NotFound(old_name.to_string()))?;
    match table.get(new_parent) {
        Some(node) if node.kind.is_dir() => {}
        Some(_) => return Err(FsError::NotADirectory(format!("inode {new_parent}"))),
        None => return Err(FsError::NotFound(format!("inode {new_parent}"))),
    }

    let src_is_dir = table.get(src).is_some_and(|n| n.kind.is_dir());
    if src_is_dir && table.is_ancestor(src, new_parent) {
        return Err(FsError::InvalidArgument(format!(
            "cannot move directory {old_name:?} beneath itself"
        )));
    }

    if let Some(dst) = table.lookup(new_parent, new_name) {
        if dst == src {
            // Renaming a node onto itself is a no-op.
            return Ok(());
        }
        let dst_node = table
            .get(dst)
            .ok_or_else(|| FsError::NotFound(new_name.to_string()))?;
        match &dst_node.kind {
            NodeKind::Directory { children } => {
                if !src_is_dir {
                    return Err(FsError::InvalidArgument(format!(
                        "cannot replace directory {new_name:?} with a non-directory"
                    )));
                }
                if !children.is_empty() {
                    return Err(FsError::NotEmpty(new_name.to_string()));
                }
            }
            _ => {
                if src_is_dir {
                    return Err(FsError::InvalidArgument(format!(
                        "cannot replace non-directory {new_name:?} with a directory"
                    )));
                }
            }
        }
        table.remove_child(new_parent, new_name)?;
    }

    table.rename_child(old_parent, old_name, new_parent, new_name)
}

// ── Node handles ────────────────────────────────────────────────────────

/// Shared pinning core of the typed handles. Holding one keeps the arena
/// slot alive even after the node is unlinked from its parent.
struct Pinned {
    fs: MemFs,
    ino: Ino,
}

impl Pinned {
    fn new(fs: &MemFs, table: &mut NodeTable, ino: Ino) -> Self {
        table.pin(ino);
        Self {
            fs: fs.clone(),
            ino,
        }
    }

    fn with_node<R>(&self, f: impl FnOnce(&Node) -> R) -> R {
        let table = self.fs.table.lock();
        let node = table
            .get(self.ino)
            .expect("pinned node missing from the arena");
        f(node)
    }

    fn with_node_mut<R>(&self, f: impl FnOnce(&mut Node) -> R) -> R {
        let mut table = self.fs.table.lock();
        let node = table
            .get_mut(self.ino)
            .expect("pinned node missing from the arena");
        f(node)
    }
}

impl Clone for Pinned {
    fn clone(&self) -> Self {
        self.fs.table.lock().pin(self.ino);
        Self {
            fs: self.fs.clone(),
            ino: self.ino,
        }
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        self.fs.table.lock().unpin(self.ino, 1);
    }
}

/// Handle to a file node. Stays valid after unlink until dropped.
#[derive(Clone)]
pub struct FileRef(Pinned);

impl FileRef {
    #[must_use]
    pub fn ino(&self) -> Ino {
        self.0.ino
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.0.with_node(|n| n.name.clone())
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.0.with_node(Node::size)
    }

    #[must_use]
    pub fn mode(&self) -> u16 {
        self.0.with_node(|n| n.mode)
    }

    pub fn set_mode(&self, mode: u16) {
        self.0.with_node_mut(|n| {
            n.mode = mode & 0o7777;
            n.ctime = SystemTime::now();
        });
    }

    /// Copy of the current content.
    #[must_use]
    pub fn read(&self) -> Vec<u8> {
        self.0.with_node_mut(|n| {
            n.atime = SystemTime::now();
            match &n.kind {
                NodeKind::File { content } => content.clone(),
                _ => unreachable!("file handle points at a non-file node"),
            }
        })
    }

    /// Replace the content wholesale.
    pub fn write(&self, data: impl Into<Vec<u8>>) {
        let data = data.into();
        self.0.with_node_mut(|n| {
            let now = SystemTime::now();
            match &mut n.kind {
                NodeKind::File { content } => *content = data,
                _ => unreachable!("file handle points at a non-file node"),
            }
            n.mtime = now;
            n.ctime = now;
        });
    }

    /// Set the length to `size`, trimming or zero-extending.
    pub fn truncate(&self, size: u64) {
        self.0.with_node_mut(|n| {
            let now = SystemTime::now();
            match &mut n.kind {
                NodeKind::File { content } => content.resize(size as usize, 0),
                _ => unreachable!("file handle points at a non-file node"),
            }
            n.mtime = now;
            n.ctime = now;
        });
    }
}

/// Handle to a directory node.
#[derive(Clone)]
pub struct DirRef(Pinned);

impl DirRef {
    #[must_use]
    pub fn ino(&self) -> Ino {
        self.0.ino
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.0.with_node(|n| n.name.clone())
    }

    #[must_use]
    pub fn mode(&self) -> u16 {
        self.0.with_node(|n| n.mode)
    }

    pub fn set_mode(&self, mode: u16) {
        self.0.with_node_mut(|n| {
            n.mode = mode & 0o7777;
            n.ctime = SystemTime::now();
        });
    }

    /// Read-only snapshot of the child map, sorted by name. Mutation goes
    /// through engine operations only.
    #[must_use]
    pub fn children(&self) -> Vec<(String, Ino)> {
        self.0.with_node(|n| match &n.kind {
            NodeKind::Directory { children } => {
                children.iter().map(|(k, v)| (k.clone(), *v)).collect()
            }
            _ => unreachable!("directory handle points at a non-directory node"),
        })
    }
}

/// Handle to a symlink node. The target is immutable after creation.
#[derive(Clone)]
pub struct SymlinkRef(Pinned);

impl SymlinkRef {
    #[must_use]
    pub fn ino(&self) -> Ino {
        self.0.ino
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.0.with_node(|n| n.name.clone())
    }

    #[must_use]
    pub fn target(&self) -> String {
        self.0.with_node(|n| match &n.kind {
            NodeKind::Symlink { target } => target.clone(),
            _ => unreachable!("symlink handle points at a non-symlink node"),
        })
    }
}

/// A resolved node of any kind, as returned by [`MemFs::get`].
pub enum NodeHandle {
    File(FileRef),
    Dir(DirRef),
    Symlink(SymlinkRef),
}

impl NodeHandle {
    #[must_use]
    pub fn ino(&self) -> Ino {
        match self {
            NodeHandle::File(f) => f.ino(),
            NodeHandle::Dir(d) => d.ino(),
            NodeHandle::Symlink(s) => s.ino(),
        }
    }

    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeHandle::File(_) => NodeType::File,
            NodeHandle::Dir(_) => NodeType::Directory,
            NodeHandle::Symlink(_) => NodeType::Symlink,
        }
    }

    /// Unwrap as a file handle.
    pub fn into_file(self) -> Result<FileRef> {
        match self {
            NodeHandle::File(f) => Ok(f),
            _ => Err(FsError::InvalidArgument("not a file".into())),
        }
    }

    /// Unwrap as a directory handle.
    pub fn into_dir(self) -> Result<DirRef> {
        match self {
            NodeHandle::Dir(d) => Ok(d),
            _ => Err(FsError::NotADirectory("not a directory".into())),
        }
    }

    /// Unwrap as a symlink handle.
    pub fn into_symlink(self) -> Result<SymlinkRef> {
        match self {
            NodeHandle::Symlink(s) => Ok(s),
            _ => Err(FsError::NotASymlink("not a symlink".into())),
        }
    }
}
