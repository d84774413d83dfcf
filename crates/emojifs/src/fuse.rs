//! FUSE host for a [`MountTable`].
//!
//! `fuser` hands us inode numbers; the VFS speaks paths. [`InodeTable`]
//! assigns inodes to paths on first sight and never reuses them. Each
//! callback blocks on the tokio runtime for the corresponding async
//! [`VfsOps`] call.

use anyhow::{Context, Result};
use emojifs_vfs::{FileAttr, FileType, MountTable, VfsError, VfsOps};
use fuser::{
    FUSE_ROOT_ID, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;

/// How long the kernel may cache attributes and entries.
const TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 512;

/// Bidirectional inode ↔ path map.
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
            paths: HashMap::from([(FUSE_ROOT_ID, root.clone())]),
            inodes: HashMap::from([(root, FUSE_ROOT_ID)]),
            next: FUSE_ROOT_ID + 1,
        }
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.paths.get(&ino).map(PathBuf::as_path)
    }

    /// Inode for `path`, allocating one if it has none.
    pub fn intern(&mut self, path: PathBuf) -> u64 {
        if let Some(&ino) = self.inodes.get(&path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.clone());
        self.inodes.insert(path, ino);
        ino
    }

    /// Path of `name` inside directory `parent`.
    pub fn child(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|p| p.join(name))
    }

    /// Forget a removed path; its inode is not reused.
    pub fn remove(&mut self, path: &Path) {
        if let Some(ino) = self.inodes.remove(path) {
            self.paths.remove(&ino);
        }
    }
}

/// What to answer a getxattr/listxattr call with.
#[derive(Debug, PartialEq, Eq)]
enum XattrReply {
    /// Caller is probing for the buffer size.
    Size(u32),
    Data,
    /// Caller's buffer is too small.
    Range,
}

fn xattr_reply(size: u32, len: usize) -> XattrReply {
    match u32::try_from(len) {
        Ok(len) if size == 0 => XattrReply::Size(len),
        Ok(len) if len <= size => XattrReply::Data,
        _ => XattrReply::Range,
    }
}

fn send_xattr(size: u32, payload: &[u8], reply: ReplyXattr) {
    match xattr_reply(size, payload.len()) {
        XattrReply::Size(len) => reply.size(len),
        XattrReply::Data => reply.data(payload),
        XattrReply::Range => reply.error(libc::ERANGE),
    }
}

/// `listxattr` wire format: each name NUL-terminated.
fn xattr_names(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

fn file_type(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::File => fuser::FileType::RegularFile,
        FileType::Directory => fuser::FileType::Directory,
        FileType::Symlink => fuser::FileType::Symlink,
    }
}

/// Log and convert a VFS error into an errno.
fn errno(op: &str, path: &Path, e: &VfsError) -> libc::c_int {
    match e {
        VfsError::NotFound(_) | VfsError::NoMountPoint(_) | VfsError::NoSuchAttribute(_) => {
            tracing::trace!(op, path = %path.display(), error = %e, "fuse op failed");
        }
        _ => tracing::debug!(op, path = %path.display(), error = %e, "fuse op failed"),
    }
    e.errno()
}

/// `fuser` filesystem over a [`MountTable`].
pub struct EmojiFuse {
    table: Arc<MountTable>,
    runtime: Handle,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
}

impl EmojiFuse {
    pub fn new(table: Arc<MountTable>, runtime: Handle) -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            table,
            runtime,
            inodes: InodeTable::new(),
            uid,
            gid,
        }
    }

    fn fuse_attr(&self, ino: u64, attr: &FileAttr) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind: file_type(attr.kind),
            perm: (attr.perm & 0o7777) as u16,
            nlink: attr.nlink,
            uid: attr.uid.unwrap_or(self.uid),
            gid: attr.gid.unwrap_or(self.gid),
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Reply to an entry-producing call (lookup, symlink) for `path`.
    fn reply_entry(
        &mut self,
        op: &str,
        path: PathBuf,
        attr: Result<FileAttr, VfsError>,
        reply: ReplyEntry,
    ) {
        match attr {
            Ok(attr) => {
                let ino = self.inodes.intern(path);
                reply.entry(&TTL, &self.fuse_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(errno(op, &path, &e)),
        }
    }
}

impl Filesystem for EmojiFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.inodes.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let attr = self.runtime.block_on(self.table.getattr(&path));
        self.reply_entry("lookup", path, attr, reply);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.getattr(path)) {
            Ok(attr) => reply.attr(&TTL, &self.fuse_attr(ino, &attr)),
            Err(e) => reply.error(errno("getattr", path, &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        // Only size changes mean anything here; the rest is acknowledged
        // with the current attributes.
        let result = self.runtime.block_on(async {
            if let Some(size) = size {
                self.table.truncate(path, size).await?;
            }
            self.table.getattr(path).await
        });
        match result {
            Ok(attr) => reply.attr(&TTL, &self.fuse_attr(ino, &attr)),
            Err(e) => reply.error(errno("setattr", path, &e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.readlink(path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errno("readlink", path, &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.inodes.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.unlink(&path)) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno("unlink", &path, &e)),
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
        let Some(path) = self.inodes.child(parent, link_name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let attr = self.runtime.block_on(self.table.symlink(&path, target));
        self.reply_entry("symlink", path, attr, reply);
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
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.table.read(path, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", path, &e)),
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
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.table.write(path, offset, data)) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(errno("write", path, &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.release(path)) {
            Ok(()) => reply.ok(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "commit failed");
                reply.error(e.errno());
            }
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
        let Some(path) = self.inodes.path(ino).map(Path::to_path_buf) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.runtime.block_on(self.table.readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno("readdir", &path, &e));
                return;
            }
        };

        let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        let parent_ino = self.inodes.intern(parent);

        let mut listing = vec![
            (ino, fuser::FileType::Directory, ".".to_string()),
            (parent_ino, fuser::FileType::Directory, "..".to_string()),
        ];
        for entry in entries {
            let child = self.inodes.intern(path.join(&entry.name));
            listing.push((child, file_type(entry.kind), entry.name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (child, kind, name)) in listing.into_iter().enumerate().skip(skip) {
            // Offset of the *next* entry.
            if reply.add(child, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::ENODATA);
            return;
        };
        match self.runtime.block_on(self.table.getxattr(path, name)) {
            Ok(value) => send_xattr(size, &value, reply),
            Err(e) => reply.error(errno("getxattr", path, &e)),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.listxattr(path)) {
            Ok(names) => send_xattr(size, &xattr_names(&names), reply),
            Err(e) => reply.error(errno("listxattr", path, &e)),
        }
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
        let Some(path) = self.inodes.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.create(&path, mode)) {
            Ok(attr) => {
                let ino = self.inodes.intern(path);
                reply.created(&TTL, &self.fuse_attr(ino, &attr), 0, 0, 0);
            }
            Err(e) => reply.error(errno("create", &path, &e)),
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

/// Serve `table` at `mountpoint` until unmounted (foreground) or signalled.
///
/// Must be called from outside the runtime: every callback blocks on
/// `runtime`.
pub fn mount(
    table: Arc<MountTable>,
    runtime: Handle,
    mountpoint: &Path,
    foreground: bool,
) -> Result<()> {
    let options = [
        MountOption::FSName("emojifs".to_string()),
        MountOption::Subtype("emojifs".to_string()),
        MountOption::DefaultPermissions,
    ];
    let fs = EmojiFuse::new(table, runtime.clone());

    tracing::info!(mountpoint = %mountpoint.display(), foreground, "mounting");
    if foreground {
        fuser::mount2(fs, mountpoint, &options)
            .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;
    } else {
        let session = fuser::spawn_mount2(fs, mountpoint, &options)
            .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;
        runtime
            .block_on(shutdown_signal())
            .context("failed to wait for a shutdown signal")?;
        tracing::info!("shutting down");
        // Dropping the session unmounts.
        drop(session);
    }
    Ok(())
}
