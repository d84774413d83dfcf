//! What the filesystem reports about a path.
//!
//! No inodes here; the host transport assigns those. Ownership is left to
//! the host as well, since every emoji belongs to whoever mounted them.

use std::time::SystemTime;

/// Kind of node a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// An emoji image or an open write buffer.
    File,
    /// The root, an intermediate mount directory, or a collection.
    Directory,
    /// An emoji alias.
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        *self == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        *self == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        *self == FileType::Symlink
    }
}

/// `stat` results for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileType,
    /// Bytes of content, buffered bytes, or link target length.
    pub size: u64,
    /// Permission bits only; the type bits come from `kind`.
    pub perm: u32,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// `None` lets the host fill in its own uid.
    pub uid: Option<u32>,
    /// `None` lets the host fill in its own gid.
    pub gid: Option<u32>,
}

impl FileAttr {
    fn stamped_now(kind: FileType, size: u64, perm: u32, nlink: u32) -> Self {
        let now = SystemTime::now();
        FileAttr {
            kind,
            size,
            perm,
            nlink,
            atime: now,
            mtime: now,
            ctime: now,
            uid: None,
            gid: None,
        }
    }

    pub fn file(size: u64, perm: u32) -> Self {
        Self::stamped_now(FileType::File, size, perm, 1)
    }

    /// A directory; link count covers `.` and the entry in its parent.
    pub fn directory(perm: u32) -> Self {
        Self::stamped_now(FileType::Directory, 0, perm, 2)
    }

    /// An alias whose rendered target is `target_len` bytes.
    pub fn symlink(target_len: u64, perm: u32) -> Self {
        Self::stamped_now(FileType::Symlink, target_len, perm, 1)
    }

    /// Replace mtime and ctime. atime stays at "now"; nobody tracks reads.
    pub fn with_times(self, mtime: SystemTime, ctime: SystemTime) -> Self {
        FileAttr {
            mtime,
            ctime,
            ..self
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Final path component only.
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        DirEntry {
            name: name.into(),
            kind,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_kind_predicates_are_exclusive() {
        for kind in [FileType::File, FileType::Directory, FileType::Symlink] {
            let hits = [kind.is_file(), kind.is_dir(), kind.is_symlink()];
            assert_eq!(hits.iter().filter(|&&hit| hit).count(), 1, "{kind:?}");
        }
    }

    #[test]
    fn test_emoji_shapes() {
        let image = FileAttr::file(2048, 0o444);
        assert!(image.is_file());
        assert_eq!((image.size, image.perm, image.nlink), (2048, 0o444, 1));

        let guild = FileAttr::directory(0o755);
        assert!(guild.is_dir());
        assert_eq!((guild.size, guild.nlink), (0, 2));

        // "parrot.gif" as a link target.
        let alias = FileAttr::symlink(10, 0o444);
        assert!(alias.is_symlink());
        assert_eq!(alias.size, 10);
        assert_eq!(alias.uid, None);
    }

    #[test]
    fn test_with_times_keeps_atime() {
        let created = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let attr = FileAttr::file(1, 0o444).with_times(created, created);
        assert_eq!(attr.mtime, created);
        assert_eq!(attr.ctime, created);
        assert!(attr.atime > created);
    }
}
