//! VFS error types.

use thiserror::Error;

/// VFS error type.
///
/// Cloneable so that one failed metadata refresh can be reported to every
/// caller that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum VfsError {
    /// Collection or emoji not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Mutation attempted without permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Unsupported extension, malformed path, or a request that makes no sense.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown extended attribute on an otherwise valid path.
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),

    /// Expected a file, found a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Expected a directory, found a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A write or truncate would grow a buffer past its limit.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// The backend does not implement this operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// No mount point for path.
    #[error("no mount point for path: {0}")]
    NoMountPoint(String),

    /// One mount point is a prefix of another.
    #[error("mount point {inner} overlaps {outer}")]
    MountConflict { outer: String, inner: String },

    /// The remote API answered with a non-success status.
    #[error("upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a NoSuchAttribute error.
    pub fn no_such_attribute(name: impl Into<String>) -> Self {
        Self::NoSuchAttribute(name.into())
    }

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create an Upstream error.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    /// Create a Transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// POSIX error code reported back through the host transport.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) | VfsError::NoMountPoint(_) => libc::ENOENT,
            VfsError::PermissionDenied(_) => libc::EPERM,
            VfsError::InvalidArgument(_)
            | VfsError::NotASymlink(_)
            | VfsError::MountConflict { .. } => libc::EINVAL,
            VfsError::NoSuchAttribute(_) => libc::ENODATA,
            VfsError::IsADirectory(_) => libc::EISDIR,
            VfsError::NotADirectory(_) => libc::ENOTDIR,
            VfsError::FileTooLarge(_) => libc::EFBIG,
            VfsError::NotSupported(_) => libc::ENOSYS,
            VfsError::Upstream { .. } | VfsError::Transport(_) | VfsError::Other(_) => libc::EIO,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
