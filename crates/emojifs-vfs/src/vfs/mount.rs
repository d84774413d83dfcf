//! VFS mount table with longest-prefix routing.
//!
//! Routes filesystem operations to the appropriate backend based on path,
//! and serves the synthetic directories that connect `/` to multi-segment
//! mount points (e.g. `/slack` for `/slack/acme`).

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::ops::{VfsOps, path_str};
use super::types::{DirEntry, FileAttr};

/// Builder for a [`MountTable`].
///
/// Collects mounts; [`build`](Self::build) validates that no mount point
/// is a prefix of another.
#[derive(Default)]
pub struct MountTableBuilder {
    mounts: BTreeMap<String, Arc<dyn VfsOps>>,
    duplicates: Vec<String>,
}

impl MountTableBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a filesystem at the given path.
    pub fn mount(self, path: impl AsRef<str>, fs: impl VfsOps + 'static) -> Self {
        self.mount_arc(path, Arc::new(fs))
    }

    /// Mount a filesystem (already wrapped in Arc) at the given path.
    pub fn mount_arc(mut self, path: impl AsRef<str>, fs: Arc<dyn VfsOps>) -> Self {
        let path = normalize_path(path.as_ref());
        if self.mounts.insert(path.clone(), fs).is_some() {
            self.duplicates.push(path);
        }
        self
    }

    /// Validate the mount set and freeze it.
    pub fn build(self) -> VfsResult<MountTable> {
        if let Some(dup) = self.duplicates.into_iter().next() {
            return Err(VfsError::MountConflict {
                outer: dup.clone(),
                inner: dup,
            });
        }

        let (prefixes, backends): (Vec<String>, Vec<Arc<dyn VfsOps>>) =
            self.mounts.into_iter().unzip();

        // Nesting is judged on whole segments: "/acme" and "/acme-dev" can
        // coexist, "/acme" and "/acme/dev" cannot.
        for outer in &prefixes {
            let nested = if outer == "/" {
                prefixes.iter().find(|p| p.as_str() != "/")
            } else {
                let boundary = format!("{}/", outer);
                let first = prefixes.partition_point(|p| p.as_str() < boundary.as_str());
                prefixes.get(first).filter(|p| p.starts_with(boundary.as_str()))
            };
            if let Some(inner) = nested {
                return Err(VfsError::MountConflict {
                    outer: outer.clone(),
                    inner: inner.clone(),
                });
            }
        }

        let mut intermediates = BTreeSet::from(["/".to_string()]);
        for prefix in &prefixes {
            let mut partial = String::new();
            for segment in prefix.split('/').filter(|s| !s.is_empty()) {
                partial.push('/');
                partial.push_str(segment);
                intermediates.insert(partial.clone());
            }
        }
        for prefix in &prefixes {
            intermediates.remove(prefix);
        }

        tracing::info!(
            mounts = ?prefixes,
            intermediates = ?intermediates,
            "mount table built"
        );

        Ok(MountTable {
            prefixes,
            backends,
            intermediates,
        })
    }
}

/// Routes filesystem operations to mounted backends.
///
/// Immutable once built, so lookups take no lock. Mount points never nest,
/// so at most one ancestor of a path is a mount point; lookup binary-searches
/// each ancestor in turn, deepest first.
pub struct MountTable {
    /// Mount points, sorted.
    prefixes: Vec<String>,
    /// Backend for `prefixes[i]`.
    backends: Vec<Arc<dyn VfsOps>>,
    /// Synthetic directories implied by multi-segment mount points.
    intermediates: BTreeSet<String>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("prefixes", &self.prefixes)
            .field("intermediates", &self.intermediates)
            .finish()
    }
}

impl MountTable {
    /// Start building a mount table.
    pub fn builder() -> MountTableBuilder {
        MountTableBuilder::new()
    }

    /// All mount points, sorted.
    pub fn mount_points(&self) -> &[String] {
        &self.prefixes
    }

    /// Returns true if `path` is a synthetic directory with no backend behind it.
    pub fn is_intermediate(&self, path: &str) -> bool {
        self.intermediates.contains(&normalize_path(path))
    }

    /// Find the mount point for a given path.
    ///
    /// Returns the backend and the path relative to that mount, which is `/`
    /// for the mount point itself and otherwise starts with `/`.
    fn find_mount(&self, path: &Path) -> VfsResult<(&Arc<dyn VfsOps>, PathBuf)> {
        let normalized = normalize_path(path_str(path)?);
        let mut candidate = normalized.as_str();
        loop {
            if let Ok(idx) = self.prefixes.binary_search_by(|p| p.as_str().cmp(candidate)) {
                let relative = if candidate == normalized {
                    "/"
                } else if candidate == "/" {
                    normalized.as_str()
                } else {
                    &normalized[candidate.len()..]
                };
                tracing::trace!(path = %normalized, mount = %candidate, relative, "routed");
                return Ok((&self.backends[idx], PathBuf::from(relative)));
            }
            candidate = match candidate.rfind('/') {
                Some(0) if candidate != "/" => "/",
                Some(i) if i > 0 => &candidate[..i],
                _ => return Err(VfsError::no_mount_point(normalized.clone())),
            };
        }
    }

    /// Immediate children of a synthetic directory.
    fn list_intermediate(&self, dir: &str) -> Vec<DirEntry> {
        let base = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };

        let names: BTreeSet<&str> = self
            .intermediates
            .iter()
            .chain(self.prefixes.iter())
            .filter_map(|candidate| candidate.strip_prefix(base.as_str()))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .collect();

        names.into_iter().map(DirEntry::directory).collect()
    }
}

/// Normalize a path: ensure it starts with `/` and has no trailing slash.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if !trimmed.starts_with('/') {
        format!("/{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl VfsOps for MountTable {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        if self.is_intermediate(path_str(path)?) {
            return Ok(FileAttr::directory(0o555));
        }
        let (fs, relative) = self.find_mount(path)?;
        fs.getattr(&relative).await
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let normalized = normalize_path(path_str(path)?);
        if self.intermediates.contains(&normalized) {
            return Ok(self.list_intermediate(&normalized));
        }
        let (fs, relative) = self.find_mount(path)?;
        fs.readdir(&relative).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let (fs, relative) = self.find_mount(path)?;
        fs.read(&relative, offset, size).await
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let (fs, relative) = self.find_mount(path)?;
        fs.readlink(&relative).await
    }

    async fn listxattr(&self, path: &Path) -> VfsResult<Vec<String>> {
        if self.is_intermediate(path_str(path)?) {
            return Ok(Vec::new());
        }
        let (fs, relative) = self.find_mount(path)?;
        fs.listxattr(&relative).await
    }

    async fn getxattr(&self, path: &Path, name: &str) -> VfsResult<Vec<u8>> {
        if self.is_intermediate(path_str(path)?) {
            return Err(VfsError::no_such_attribute(name));
        }
        let (fs, relative) = self.find_mount(path)?;
        fs.getxattr(&relative, name).await
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let (fs, relative) = self.find_mount(path)?;
        fs.create(&relative, mode).await
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let (fs, relative) = self.find_mount(path)?;
        fs.write(&relative, offset, data).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let (fs, relative) = self.find_mount(path)?;
        fs.truncate(&relative, size).await
    }

    async fn release(&self, path: &Path) -> VfsResult<()> {
        let (fs, relative) = self.find_mount(path)?;
        fs.release(&relative).await
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        let (fs, relative) = self.find_mount(path)?;
        fs.unlink(&relative).await
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        // The target is link text, not a routed path.
        let (fs, relative) = self.find_mount(path)?;
        fs.symlink(&relative, target).await
    }
}
