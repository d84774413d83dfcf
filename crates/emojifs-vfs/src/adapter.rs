//! Generic emoji filesystem.
//!
//! [`EmojiFs`] turns any [`EmojiService`] into a [`VfsOps`] backend. The
//! service supplies listings and mutations; this module owns the path
//! layout, caching, content fetching, and write transactions.
//!
//! Paths seen here are relative to the mount point:
//!
//! ```text
//! Layout::Flat      /                 the single collection
//!                   /parrot.gif       an emoji
//! Layout::Grouped   /                 one directory per collection
//!                   /rustaceans       a collection (by name or id)
//!                   /rustaceans/ferris.png
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::api::ContentFetcher;
use crate::buffers::WriteBuffers;
use crate::cache::{METADATA_TTL, MetadataCache};
use crate::emoji::{CREATED_BY_XATTR, Collection, Entity, ImageFormat, URL_XATTR, entity_name};
use crate::vfs::{DirEntry, FileAttr, FileType, VfsError, VfsOps, VfsResult, path_str};

/// How collections map onto directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// The mount root is the service's only collection.
    Flat,
    /// The mount root lists collections; each is a subdirectory.
    Grouped,
}

/// A remote emoji store: the part of a backend that actually talks to it.
#[async_trait]
pub trait EmojiService: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn layout(&self) -> Layout;

    /// Every collection visible to the current principal.
    async fn list_collections(&self) -> VfsResult<Vec<Collection>>;

    /// Every emoji in `collection`.
    async fn list_entities(&self, collection: &Collection) -> VfsResult<Vec<Entity>>;

    /// Create (or replace) emoji `name` from image bytes.
    async fn upload(
        &self,
        collection: &Collection,
        name: &str,
        format: ImageFormat,
        data: Bytes,
    ) -> VfsResult<()>;

    /// Delete an emoji.
    async fn delete(&self, collection: &Collection, entity: &Entity) -> VfsResult<()>;

    /// Make `alias_name` another name for `target`.
    async fn alias(
        &self,
        _collection: &Collection,
        _target: &Entity,
        _alias_name: &str,
    ) -> VfsResult<()> {
        Err(VfsError::NotSupported("symlink"))
    }
}

const COLLECTION_CACHE_CAPACITY: u64 = 1;
const ENTITY_CACHE_CAPACITY: u64 = 100;

/// Filesystem view of one [`EmojiService`].
pub struct EmojiFs<S> {
    service: S,
    content: Arc<ContentFetcher>,
    collections: MetadataCache<(), Arc<Vec<Collection>>>,
    /// Keyed by collection id.
    entities: MetadataCache<String, Arc<Vec<Entity>>>,
    buffers: WriteBuffers,
}

impl<S: EmojiService> EmojiFs<S> {
    pub fn new(service: S, content: Arc<ContentFetcher>) -> Self {
        Self {
            service,
            content,
            collections: MetadataCache::new(
                "collections",
                COLLECTION_CACHE_CAPACITY,
                METADATA_TTL,
            ),
            entities: MetadataCache::new("entities", ENTITY_CACHE_CAPACITY, METADATA_TTL),
            buffers: WriteBuffers::new(),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Resolve a path to its collection and emoji.
    ///
    /// `(None, None)` when the collection is unknown, `(Some, None)` when the
    /// path names a collection, and `NotFound` when an emoji was named but
    /// does not exist.
    pub async fn resolve_path(
        &self,
        path: &Path,
    ) -> VfsResult<(Option<Collection>, Option<Entity>)> {
        let path = path_str(path)?;
        let (segment, file) = self.split_path(path)?;
        let Some(collection) = self.find_collection(segment).await? else {
            return Ok((None, None));
        };
        let Some(file) = file.filter(|f| !f.is_empty()) else {
            return Ok((Some(collection), None));
        };

        let name = entity_name(file);
        let entities = self.entities_of(&collection).await?;
        match entities.iter().find(|e| e.name == name) {
            Some(entity) => Ok((Some(collection), Some(entity.clone()))),
            None => Err(VfsError::not_found(path)),
        }
    }

    /// Split into (collection segment, file segment).
    ///
    /// The flat layout has no collection segment; `None` there means "the
    /// only collection".
    fn split_path<'a>(&self, path: &'a str) -> VfsResult<(Option<&'a str>, Option<&'a str>)> {
        let rel = path.trim_start_matches('/');
        match self.service.layout() {
            Layout::Flat if !rel.contains('/') => Ok((None, Some(rel))),
            Layout::Grouped => match rel.split_once('/') {
                None => Ok((Some(rel), None)),
                Some((collection, file)) if !file.contains('/') => {
                    Ok((Some(collection), Some(file)))
                }
                Some(_) => Err(VfsError::not_found(path)),
            },
            Layout::Flat => Err(VfsError::not_found(path)),
        }
    }

    fn is_root(&self, path: &str) -> bool {
        path.trim_start_matches('/').is_empty()
    }

    async fn all_collections(&self) -> VfsResult<Arc<Vec<Collection>>> {
        self.collections
            .get_or_refresh((), || async {
                Ok(Arc::new(self.service.list_collections().await?))
            })
            .await
    }

    /// Look up by id first, then by rendered directory name.
    async fn find_collection(&self, segment: Option<&str>) -> VfsResult<Option<Collection>> {
        let collections = self.all_collections().await?;
        let found = match segment {
            None => collections.first(),
            Some(segment) => collections
                .iter()
                .find(|c| c.id == segment)
                .or_else(|| collections.iter().find(|c| c.dir_name() == segment)),
        };
        Ok(found.cloned())
    }

    async fn entities_of(&self, collection: &Collection) -> VfsResult<Arc<Vec<Entity>>> {
        self.entities
            .get_or_refresh(collection.id.clone(), || async {
                Ok(Arc::new(self.service.list_entities(collection).await?))
            })
            .await
    }

    fn dir_perm(writable: bool) -> u32 {
        if writable { 0o755 } else { 0o555 }
    }

    async fn root_attr(&self) -> VfsResult<FileAttr> {
        if self.service.layout() == Layout::Grouped {
            return Ok(FileAttr::directory(0o555));
        }
        let Some(collection) = self.find_collection(None).await? else {
            return Ok(FileAttr::directory(0o555));
        };
        let attr = FileAttr::directory(Self::dir_perm(collection.writable));
        let entities = self.entities_of(&collection).await?;
        let created = entities.iter().filter_map(|e| e.created);
        match (created.clone().max(), created.min()) {
            (Some(newest), Some(oldest)) => Ok(attr.with_times(newest, oldest)),
            _ => Ok(attr),
        }
    }

    async fn entity_attr(&self, entity: &Entity) -> VfsResult<FileAttr> {
        let attr = match entity.link_target() {
            Some(target) => FileAttr::symlink(target.len() as u64, 0o444),
            None => FileAttr::file(self.content.content_length(&entity.locator).await?, 0o444),
        };
        let created = entity.created.unwrap_or_else(SystemTime::now);
        Ok(attr.with_times(created, created))
    }

    /// Upload a finished write buffer. The buffer is already detached, so
    /// its memory goes away however this ends.
    async fn commit(&self, path: &str, data: Vec<u8>) -> VfsResult<()> {
        let (segment, file) = self.split_path(path)?;
        let collection = self
            .find_collection(segment)
            .await?
            .ok_or_else(|| VfsError::not_found(path))?;
        let file = file.unwrap_or_default();
        let format = ImageFormat::from_filename(file)?;
        let name = entity_name(file);

        tracing::info!(
            service = self.service.name(),
            collection = %collection.name,
            emoji = %name,
            bytes = data.len(),
            "creating emoji"
        );
        let result = self
            .service
            .upload(&collection, name, format, Bytes::from(data))
            .await;
        self.entities.invalidate(&collection.id).await;
        if let Err(e) = &result {
            tracing::error!(emoji = %name, error = %e, "upload failed");
        }
        result
    }
}

#[async_trait]
impl<S: EmojiService> VfsOps for EmojiFs<S> {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let p = path_str(path)?;
        if self.is_root(p) {
            return self.root_attr().await;
        }
        if let Some(len) = self.buffers.len(p) {
            return Ok(FileAttr::file(len, 0o600));
        }
        match self.resolve_path(path).await? {
            (Some(_), Some(entity)) => self.entity_attr(&entity).await,
            (Some(collection), None) => {
                Ok(FileAttr::directory(Self::dir_perm(collection.writable)))
            }
            (None, _) => Err(VfsError::not_found(p)),
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let p = path_str(path)?;
        if self.is_root(p) && self.service.layout() == Layout::Grouped {
            let collections = self.all_collections().await?;
            return Ok(collections
                .iter()
                .map(|c| DirEntry::directory(c.dir_name()))
                .collect());
        }
        match self.resolve_path(path).await? {
            (Some(collection), None) => {
                let entities = self.entities_of(&collection).await?;
                Ok(entities
                    .iter()
                    .map(|e| {
                        let kind = if e.is_alias() { FileType::Symlink } else { FileType::File };
                        DirEntry::new(e.filename(), kind)
                    })
                    .collect())
            }
            (Some(_), Some(_)) => Err(VfsError::NotADirectory(p.to_string())),
            (None, _) => Err(VfsError::not_found(p)),
        }
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let p = path_str(path)?;
        if let Some(data) = self.buffers.read(p, offset, size) {
            return Ok(data);
        }
        let entity = match self.resolve_path(path).await? {
            (_, Some(entity)) => entity,
            (Some(_), None) => return Err(VfsError::IsADirectory(p.to_string())),
            (None, None) => return Err(VfsError::not_found(p)),
        };

        let content = self.content.bytes(&entity.locator).await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(size as usize).min(content.len());
        Ok(content[start..end].to_vec())
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let p = path_str(path)?;
        match self.resolve_path(path).await? {
            // Dangling when the target is gone or is a built-in emoji.
            (_, Some(entity)) => entity
                .link_target()
                .map(PathBuf::from)
                .ok_or_else(|| VfsError::NotASymlink(p.to_string())),
            (Some(_), None) => Err(VfsError::NotASymlink(p.to_string())),
            (None, None) => Err(VfsError::not_found(p)),
        }
    }

    async fn listxattr(&self, path: &Path) -> VfsResult<Vec<String>> {
        let p = path_str(path)?;
        if self.is_root(p) || self.buffers.contains(p) {
            return Ok(Vec::new());
        }
        match self.resolve_path(path).await? {
            (_, Some(_)) => Ok(vec![URL_XATTR.to_string(), CREATED_BY_XATTR.to_string()]),
            (Some(_), None) => Ok(Vec::new()),
            (None, None) => Err(VfsError::not_found(p)),
        }
    }

    async fn getxattr(&self, path: &Path, name: &str) -> VfsResult<Vec<u8>> {
        let p = path_str(path)?;
        if self.is_root(p) || self.buffers.contains(p) {
            return Err(VfsError::no_such_attribute(name));
        }
        let entity = match self.resolve_path(path).await? {
            (_, Some(entity)) => entity,
            (Some(_), None) => return Err(VfsError::no_such_attribute(name)),
            (None, None) => return Err(VfsError::not_found(p)),
        };
        match name {
            URL_XATTR => Ok(entity.locator.as_str().as_bytes().to_vec()),
            CREATED_BY_XATTR => Ok(entity.creator.into_bytes()),
            _ => Err(VfsError::no_such_attribute(name)),
        }
    }

    async fn create(&self, path: &Path, _mode: u32) -> VfsResult<FileAttr> {
        let p = path_str(path)?;
        let (segment, file) = self.split_path(p)?;
        let collection = self
            .find_collection(segment)
            .await?
            .ok_or_else(|| VfsError::not_found(p))?;
        let Some(file) = file.filter(|f| !f.is_empty()) else {
            return Err(VfsError::IsADirectory(p.to_string()));
        };
        if !collection.writable {
            return Err(VfsError::permission_denied(p));
        }
        ImageFormat::from_filename(file)?;

        tracing::debug!(path = %p, "opened write buffer");
        self.buffers.open(p);
        Ok(FileAttr::file(0, 0o600))
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let p = path_str(path)?;
        let written = self
            .buffers
            .write(p, offset, data)?
            .ok_or_else(|| VfsError::permission_denied(p))?;
        Ok(written as u32)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let p = path_str(path)?;
        if self.buffers.truncate(p, size)?.is_some() {
            return Ok(());
        }
        // Committed emoji are immutable.
        match self.resolve_path(path).await? {
            (Some(_), _) => Err(VfsError::permission_denied(p)),
            (None, _) => Err(VfsError::not_found(p)),
        }
    }

    async fn release(&self, path: &Path) -> VfsResult<()> {
        let p = path_str(path)?;
        match self.buffers.take(p) {
            Some(data) => self.commit(p, data).await,
            None => Ok(()),
        }
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        let p = path_str(path)?;
        if self.buffers.discard(p) {
            tracing::debug!(path = %p, "discarded write buffer");
            return Ok(());
        }
        let (collection, entity) = match self.resolve_path(path).await? {
            (Some(collection), Some(entity)) => (collection, entity),
            (Some(_), None) => return Err(VfsError::permission_denied(p)),
            (None, _) => return Err(VfsError::not_found(p)),
        };
        if !collection.writable {
            return Err(VfsError::permission_denied(p));
        }

        tracing::info!(
            service = self.service.name(),
            collection = %collection.name,
            emoji = %entity.name,
            "deleting emoji"
        );
        let result = self.service.delete(&collection, &entity).await;
        self.entities.invalidate(&collection.id).await;
        result
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        let p = path_str(path)?;
        let (segment, file) = self.split_path(p)?;
        let collection = self
            .find_collection(segment)
            .await?
            .ok_or_else(|| VfsError::not_found(p))?;
        let Some(file) = file.filter(|f| !f.is_empty()) else {
            return Err(VfsError::IsADirectory(p.to_string()));
        };
        if !collection.writable {
            return Err(VfsError::permission_denied(p));
        }

        let target_file = target
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| {
                VfsError::invalid_argument(format!("bad link target: {}", target.display()))
            })?;
        let target_name = entity_name(target_file);
        let entities = self.entities_of(&collection).await?;
        let original = entities
            .iter()
            .find(|e| e.name == target_name)
            .cloned()
            .ok_or_else(|| VfsError::not_found(target_file))?;
        let alias_name = entity_name(file);

        tracing::info!(
            service = self.service.name(),
            collection = %collection.name,
            alias = %alias_name,
            target = %original.name,
            "creating alias"
        );
        let result = self.service.alias(&collection, &original, alias_name).await;
        self.entities.invalidate(&collection.id).await;
        result?;

        let link = original.filename();
        Ok(FileAttr::symlink(link.len() as u64, 0o444))
    }
}
