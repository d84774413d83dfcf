//! VFS operations trait.
//!
//! One method per filesystem operation the host transport forwards.
//! Everything beyond `getattr`/`readdir` has a default that reports
//! [`VfsError::NotSupported`], so read-only backends only implement what
//! they have.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::types::{DirEntry, FileAttr};
use super::{VfsError, VfsResult};

/// Core VFS operations trait.
///
/// All operations are path-based (no inode numbers). Paths handed to a
/// mounted backend are absolute within that backend: `/` for its root,
/// `/a/b.png` below it. The [`MountTable`](super::MountTable) handles
/// routing and prefix stripping.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, without `.` and `..`.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if end of content is reached.
    async fn read(&self, _path: &Path, _offset: u64, _size: u32) -> VfsResult<Vec<u8>> {
        Err(VfsError::NotSupported("read"))
    }

    /// Read symbolic link target.
    async fn readlink(&self, _path: &Path) -> VfsResult<PathBuf> {
        Err(VfsError::NotSupported("readlink"))
    }

    /// List extended attribute names.
    async fn listxattr(&self, _path: &Path) -> VfsResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Read one extended attribute.
    async fn getxattr(&self, _path: &Path, name: &str) -> VfsResult<Vec<u8>> {
        Err(VfsError::no_such_attribute(name))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Open an empty write transaction at `path`.
    ///
    /// Returns the attributes of the (still empty) file.
    async fn create(&self, _path: &Path, _mode: u32) -> VfsResult<FileAttr> {
        Err(VfsError::NotSupported("create"))
    }

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write(&self, _path: &Path, _offset: u64, _data: &[u8]) -> VfsResult<u32> {
        Err(VfsError::NotSupported("write"))
    }

    /// Truncate (or zero-extend) an open file to `size`.
    async fn truncate(&self, _path: &Path, _size: u64) -> VfsResult<()> {
        Err(VfsError::NotSupported("truncate"))
    }

    /// Close a file handle. Commits any open write transaction.
    async fn release(&self, _path: &Path) -> VfsResult<()> {
        Ok(())
    }

    /// Remove a file.
    async fn unlink(&self, _path: &Path) -> VfsResult<()> {
        Err(VfsError::NotSupported("unlink"))
    }

    /// Create a symbolic link at `path` pointing to `target`.
    async fn symlink(&self, _path: &Path, _target: &Path) -> VfsResult<FileAttr> {
        Err(VfsError::NotSupported("symlink"))
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        self.read(path, 0, u32::try_from(attr.size).unwrap_or(u32::MAX))
            .await
    }

    /// Create, write and commit a whole file.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.create(path, 0o644).await?;
        self.write(path, 0, data).await?;
        self.release(path).await
    }
}

/// Borrow a path as UTF-8, the only encoding remote names come in.
pub(crate) fn path_str(path: &Path) -> VfsResult<&str> {
    path.to_str()
        .ok_or_else(|| VfsError::invalid_argument(format!("non-UTF-8 path: {}", path.display())))
}
