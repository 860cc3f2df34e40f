//! Binding of [`Operations`] to the kernel through `fuser`.
//!
//! `fuser` hands out inode numbers and calls back synchronously on its own
//! session thread. The adapter keeps an inode ↔ path table and drives each
//! async operation to completion on the tokio runtime.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::future::Future;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyXattr, Request, TimeOrNow,
};
use mpegfs_core::config::MountConfig;
use mpegfs_core::Error;
use tokio::runtime::Handle;

use crate::fs::{Attr, FileKind, Operations, Timestamp};

/// Inode of the mount root.
pub const ROOT_INODE: u64 = 1;

/// Bidirectional inode ↔ virtual path map.
///
/// Inodes are allocated on first sight and never reused, so a path keeps its
/// inode for the lifetime of the mount.
#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, PathBuf>,
    inodes: HashMap<PathBuf, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        Self {
            paths: HashMap::from([(ROOT_INODE, root.clone())]),
            inodes: HashMap::from([(root, ROOT_INODE)]),
            next: ROOT_INODE + 1,
        }
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.paths.get(&ino).map(PathBuf::as_path)
    }

    /// Inode for `path`, allocating one if needed.
    pub fn intern(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_path_buf());
        self.inodes.insert(path.to_path_buf(), ino);
        ino
    }

    /// Path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|dir| dir.join(name))
    }

    /// Inode of the directory containing `ino`; the root is its own parent.
    pub fn parent(&mut self, ino: u64) -> u64 {
        match self.path(ino).and_then(Path::parent).map(Path::to_path_buf) {
            Some(parent) => self.intern(&parent),
            None => ROOT_INODE,
        }
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Symlink => FileType::Symlink,
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::Socket => FileType::Socket,
    }
}

/// Convert handler attributes to what `fuser` replies with.
pub fn file_attr(ino: u64, attr: &Attr) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn timestamp(time: Option<TimeOrNow>) -> Timestamp {
    match time {
        None => Timestamp::Omit,
        Some(TimeOrNow::Now) => Timestamp::Now,
        Some(TimeOrNow::SpecificTime(t)) => Timestamp::At(t),
    }
}

/// `fuser::Filesystem` over a `dyn Operations`.
pub struct FuseAdapter {
    ops: Arc<dyn Operations>,
    runtime: Handle,
    inodes: InodeTable,
    ttl: Duration,
}

impl FuseAdapter {
    pub fn new(ops: Arc<dyn Operations>, runtime: Handle, ttl: Duration) -> Self {
        Self {
            ops,
            runtime,
            inodes: InodeTable::new(),
            ttl,
        }
    }

    fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn path(&self, ino: u64) -> Result<PathBuf, i32> {
        self.inodes
            .path(ino)
            .map(Path::to_path_buf)
            .ok_or(libc::ENOENT)
    }

    /// Stat `path`, intern it and reply with an entry.
    fn reply_entry(&mut self, path: &Path, reply: ReplyEntry) {
        match self.run(self.ops.getattr(path)) {
            Ok(attr) => {
                let ino = self.inodes.intern(path);
                reply.entry(&self.ttl, &file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(errno(path, "lookup", &e)),
        }
    }
}

/// Log `err` and return its errno.
fn errno(path: &Path, op: &str, err: &Error) -> i32 {
    match err {
        Error::NotFound { .. } => tracing::trace!("{op} {}: {err}", path.display()),
        _ => tracing::debug!("{op} {}: {err}", path.display()),
    }
    err.errno()
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.inodes.child_path(parent, name) {
            Some(path) => self.reply_entry(&path, reply),
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.run(self.ops.getattr(&path)) {
            Ok(attr) => reply.attr(&self.ttl, &file_attr(ino, &attr)),
            Err(e) => reply.error(errno(&path, "getattr", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
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
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        if mode.is_some() || uid.is_some() || gid.is_some() || size.is_some() {
            return reply.error(libc::ENOSYS);
        }

        if atime.is_some() || mtime.is_some() {
            let result = self.run(self.ops.utimens(&path, timestamp(atime), timestamp(mtime)));
            if let Err(e) = result {
                return reply.error(errno(&path, "utimens", &e));
            }
        }

        match self.run(self.ops.getattr(&path)) {
            Ok(attr) => reply.attr(&self.ttl, &file_attr(ino, &attr)),
            Err(e) => reply.error(errno(&path, "getattr", &e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.run(self.ops.readlink(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errno(&path, "readlink", &e)),
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
        let Some(path) = self.inodes.child_path(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        match self.run(self.ops.mkdir(&path, mode)) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(e) => reply.error(errno(&path, "mkdir", &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.run(self.ops.open(&path, flags)) {
            // Direct I/O: short reads are passed through instead of being
            // taken as end of file.
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO),
            Err(e) => reply.error(errno(&path, "open", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.run(self.ops.read(&path, size as usize, offset, fh)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&path, "read", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = self.path(ino).unwrap_or_default();
        match self.run(self.ops.release(&path, fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&path, "release", &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let entries = match self.run(self.ops.readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => return reply.error(errno(&path, "readdir", &e)),
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in entries.into_iter().enumerate().skip(skip) {
            let entry_ino = match entry.name.as_bytes() {
                b"." => ino,
                b".." => self.inodes.parent(ino),
                _ => self.inodes.intern(&path.join(&entry.name)),
            };
            // The offset handed back is where the next call resumes.
            if reply.add(entry_ino, (i + 1) as i64, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.run(self.ops.statfs(&path)) {
            Ok(st) => reply.statfs(
                st.blocks,
                st.bfree,
                st.bavail,
                st.files,
                st.ffree,
                st.bsize as u32,
                st.namemax as u32,
                st.frsize as u32,
            ),
            Err(e) => reply.error(errno(&path, "statfs", &e)),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.run(self.ops.access(&path, mask)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&path, "access", &e)),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        // Existence only; in search mode this may create the directory.
        if let Err(e) = self.run(self.ops.getattr(&path)) {
            return reply.error(errno(&path, "getxattr", &e));
        }
        tracing::trace!("getxattr {:?} {:?}", path, name);
        match empty_xattr(size) {
            XattrReply::Size(len) => reply.size(len),
            XattrReply::Data(data) => reply.data(data),
        }
    }
}

/// How an extended attribute query is answered.
#[derive(Debug, PartialEq, Eq)]
enum XattrReply {
    Size(u32),
    Data(&'static [u8]),
}

/// No attributes are stored: every name has an empty value.
fn empty_xattr(size: u32) -> XattrReply {
    if size == 0 {
        XattrReply::Size(0)
    } else {
        XattrReply::Data(&[])
    }
}

/// Mount options derived from the `[mount]` section.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fsname.clone()),
        MountOption::Subtype("mpegfs".into()),
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    options
}

/// Mount `ops` at `target` and serve until unmounted.
///
/// Blocks the calling thread, which must not be a runtime worker.
pub fn mount(
    ops: Arc<dyn Operations>,
    target: &Path,
    config: &MountConfig,
    runtime: Handle,
) -> std::io::Result<()> {
    let adapter = FuseAdapter::new(ops, runtime, config.attr_ttl());
    let options = mount_options(config);
    tracing::info!("Mounting at {} ({:?})", target.display(), options);
    fuser::mount2(adapter, target, &options)
}
