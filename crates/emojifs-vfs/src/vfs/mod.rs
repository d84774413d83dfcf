//! Virtual Filesystem abstraction.
//!
//! Key components:
//!
//! - [`VfsOps`] - Core trait for filesystem operations
//! - [`MountTable`] - Routes operations to backends based on path
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   The FUSE host handles inode ↔ path mapping.
//! - **Explicit offset/size**: Read/write take offset and size.
//! - **Flat mounts**: Mount points never nest, so the owner of a path is
//!   found with one binary search over the sorted mount points.

mod error;
mod mount;
mod ops;
mod types;

pub use error::{VfsError, VfsResult};
pub use mount::{MountTable, MountTableBuilder};
pub use ops::VfsOps;
pub(crate) use ops::path_str;
pub use types::{DirEntry, FileAttr, FileType};
