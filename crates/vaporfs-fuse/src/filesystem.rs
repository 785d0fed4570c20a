//! FUSE callback surface for the vaporfs engine.
//!
//! [`VaporFs`] is a thin translation layer: each kernel callback becomes one
//! or more engine operations, and engine errors map onto errno replies via
//! `FsError::to_errno()`. The engine's lock is what linearizes kernel
//! traffic against in-process callers; the adapter itself keeps only the
//! per-open directory snapshots.

use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use tracing::{debug, info, trace, warn};
use vaporfs_core::MemFs;

use crate::attr::{to_file_attr, to_file_type, BLKSIZE};
use crate::handles::DirHandles;

/// TTL for cached attributes and entries. The tree mutates freely from both
/// sides of the mount, so keep the kernel on a short leash.
const TTL: Duration = Duration::from_secs(1);

/// Synthesized total block count reported by `statfs` (512-byte blocks).
const STATFS_TOTAL_BLOCKS: u64 = 1 << 31;

/// Synthesized total inode count reported by `statfs`.
const STATFS_TOTAL_FILES: u64 = 1_000_000;

/// FUSE adapter wrapping a [`MemFs`] engine.
pub struct VaporFs {
    engine: MemFs,
    dir_handles: DirHandles,
    uid: u32,
    gid: u32,
}

impl VaporFs {
    /// Wrap an engine for mounting. Ownership of every node is reported as
    /// the mounting process's effective uid/gid.
    #[must_use]
    pub fn new(engine: MemFs) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            engine,
            dir_handles: DirHandles::new(),
            uid,
            gid,
        }
    }

    fn attr_reply(&self, ino: u64, reply: ReplyAttr) {
        match self.engine.attr_of(ino) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr, self.uid, self.gid)),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

impl Filesystem for VaporFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(uid = self.uid, gid = self.gid, "vaporfs session initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("vaporfs session destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "lookup");

        match self.engine.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr, self.uid, self.gid), 0),
            Err(e) => {
                // Missing entries are routine; anything else is worth noting.
                if e.to_errno() != libc::ENOENT {
                    warn!(parent, name, error = %e, "lookup failed");
                }
                reply.error(e.to_errno());
            }
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        self.engine.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        self.attr_reply(ino, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(ino, ?mode, ?size, "setattr");

        let now = SystemTime::now();
        let resolve = |t: TimeOrNow| match t {
            TimeOrNow::SpecificTime(st) => st,
            TimeOrNow::Now => now,
        };

        match self.engine.setattr_ino(
            ino,
            mode.map(|m| m as u16),
            size,
            atime.map(resolve),
            mtime.map(resolve),
        ) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr, self.uid, self.gid)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(ino, "readlink");
        match self.engine.link_target_ino(ino) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, mode, "mkdir");

        match self.engine.mkdir_child(parent, name, mode as u16) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr, self.uid, self.gid), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "unlink");

        match self.engine.unlink_child(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "rmdir");

        match self.engine.rmdir_child(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let (Some(name), Some(target)) = (link_name.to_str(), target.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, target, "symlink");

        match self.engine.symlink_child(parent, name, target) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr, self.uid, self.gid), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, newparent, newname, "rename");

        match self.engine.rename_entry(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");

        match self.engine.attr_of(ino) {
            Ok(attr) if to_file_type(attr.kind) == FileType::Directory => {
                reply.error(libc::EISDIR);
            }
            Ok(_) => {
                // Honor O_TRUNC here; kernels without atomic truncate send a
                // separate setattr instead, which is equally fine.
                if flags & libc::O_TRUNC != 0 {
                    if let Err(e) = self.engine.setattr_ino(ino, None, Some(0), None, None) {
                        reply.error(e.to_errno());
                        return;
                    }
                }
                // Stateless beyond that: reads and writes address the inode.
                reply.opened(0, 0);
            }
            Err(e) => reply.error(e.to_errno()),
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
        trace!(ino, offset, size, "read");
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.engine.read_at(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, offset, size = data.len(), "write");
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.engine.write_at(ino, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        // Nothing buffered; writes land in the tree immediately.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // Volatile store: there is no backing device to sync.
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");
        match self.engine.read_dir_snapshot(ino) {
            Ok(entries) => {
                let fh = self.dir_handles.insert(entries);
                debug!(ino, fh, "directory snapshot captured");
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, fh, offset, "readdir");

        let Some(snapshot) = self.dir_handles.get(fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let offset = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in snapshot.iter().enumerate().skip(offset) {
            if reply.add(entry.ino, (i + 1) as i64, to_file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(fh, "releasedir");
        self.dir_handles.remove(fh);
        reply.ok();
    }

    fn fsyncdir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let totals = self.engine.totals();
        let used_blocks = totals.bytes.div_ceil(u64::from(BLKSIZE));
        let free_blocks = STATFS_TOTAL_BLOCKS.saturating_sub(used_blocks);
        let free_files = STATFS_TOTAL_FILES.saturating_sub(totals.nodes);
        reply.statfs(
            STATFS_TOTAL_BLOCKS,
            free_blocks,
            free_blocks,
            STATFS_TOTAL_FILES,
            free_files,
            BLKSIZE,
            255,
            BLKSIZE,
        );
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, mode, "create");

        match self.engine.create_child(parent, name, mode as u16) {
            Ok(attr) => reply.created(&TTL, &to_file_attr(&attr, self.uid, self.gid), 0, 0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        // Permission enforcement is the kernel's job (DefaultPermissions);
        // only confirm the inode is live.
        match self.engine.attr_of(ino) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
