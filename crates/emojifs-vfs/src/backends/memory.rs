//! In-memory emoji service.
//!
//! Used for `/scratch` and testing. All data is ephemeral; images are kept
//! as `data:` URLs, so reads never touch the network.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

use crate::adapter::{EmojiService, Layout};
use crate::api::content::decode_data_url;
use crate::emoji::{Collection, ContentLocator, Entity, ImageFormat};
use crate::vfs::{VfsError, VfsResult};

const CREATOR: &str = "scratch";

/// Emoji service held entirely in memory.
#[derive(Debug)]
pub struct MemoryService {
    name: String,
    layout: Layout,
    collections: RwLock<Vec<Collection>>,
    /// Collection id → emoji.
    entities: RwLock<HashMap<String, Vec<Entity>>>,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
    fail_aliases: AtomicBool,
    uploads: AtomicUsize,
    collection_listings: AtomicUsize,
    entity_listings: AtomicUsize,
}

impl MemoryService {
    fn new(name: &str, layout: Layout) -> Self {
        Self {
            name: name.to_string(),
            layout,
            collections: RwLock::new(Vec::new()),
            entities: RwLock::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_aliases: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
            collection_listings: AtomicUsize::new(0),
            entity_listings: AtomicUsize::new(0),
        }
    }

    /// A single writable collection, id and name both `name`.
    pub fn flat(name: &str) -> Self {
        let service = Self::new(name, Layout::Flat);
        service.add_collection(name, name, true);
        service
    }

    /// No collections until [`add_collection`](Self::add_collection).
    pub fn grouped(name: &str) -> Self {
        Self::new(name, Layout::Grouped)
    }

    pub fn add_collection(&self, id: &str, name: &str, writable: bool) -> Collection {
        let collection = Collection {
            id: id.to_string(),
            name: name.to_string(),
            writable,
        };
        self.collections.write().push(collection.clone());
        self.entities.write().entry(id.to_string()).or_default();
        collection
    }

    /// Store an emoji directly, bypassing any filesystem caches.
    pub fn insert(&self, collection_id: &str, name: &str, format: ImageFormat, data: &[u8]) {
        self.put(
            collection_id,
            Entity {
                name: name.to_string(),
                id: None,
                locator: ContentLocator::new(format.data_url(data)),
                alias_for: None,
                created: Some(SystemTime::now()),
                creator: CREATOR.to_string(),
            },
        );
    }

    fn put(&self, collection_id: &str, entity: Entity) {
        let mut entities = self.entities.write();
        let list = entities.entry(collection_id.to_string()).or_default();
        list.retain(|e| e.name != entity.name);
        list.push(entity);
    }

    /// Decoded content of an emoji, if it exists.
    pub fn content(&self, collection_id: &str, name: &str) -> Option<Bytes> {
        let entities = self.entities.read();
        let entity = entities.get(collection_id)?.iter().find(|e| e.name == name)?;
        decode_data_url(entity.locator.as_str()).ok()
    }

    /// Make every subsequent upload fail with an upstream error.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_aliases(&self, fail: bool) {
        self.fail_aliases.store(fail, Ordering::SeqCst);
    }

    /// Successful uploads so far.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn collection_listings(&self) -> usize {
        self.collection_listings.load(Ordering::SeqCst)
    }

    pub fn entity_listings(&self) -> usize {
        self.entity_listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmojiService for MemoryService {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> Layout {
        self.layout
    }

    async fn list_collections(&self) -> VfsResult<Vec<Collection>> {
        self.collection_listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.collections.read().clone())
    }

    async fn list_entities(&self, collection: &Collection) -> VfsResult<Vec<Entity>> {
        self.entity_listings.fetch_add(1, Ordering::SeqCst);
        self.entities
            .read()
            .get(&collection.id)
            .cloned()
            .ok_or_else(|| VfsError::not_found(&collection.id))
    }

    async fn upload(
        &self,
        collection: &Collection,
        name: &str,
        format: ImageFormat,
        data: Bytes,
    ) -> VfsResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(VfsError::upstream(500, "upload rejected"));
        }
        self.insert(&collection.id, name, format, &data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: &Collection, entity: &Entity) -> VfsResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(VfsError::upstream(500, "delete rejected"));
        }
        let mut entities = self.entities.write();
        let list = entities
            .get_mut(&collection.id)
            .ok_or_else(|| VfsError::not_found(&collection.id))?;
        let before = list.len();
        list.retain(|e| e.name != entity.name);
        if list.len() == before {
            return Err(VfsError::not_found(&entity.name));
        }
        Ok(())
    }

    async fn alias(
        &self,
        collection: &Collection,
        target: &Entity,
        alias_name: &str,
    ) -> VfsResult<()> {
        if self.fail_aliases.load(Ordering::SeqCst) {
            return Err(VfsError::upstream(500, "alias rejected"));
        }
        self.put(
            &collection.id,
            Entity {
                name: alias_name.to_string(),
                id: None,
                locator: target.locator.clone(),
                alias_for: Some(target.name.clone()),
                created: Some(SystemTime::now()),
                creator: CREATOR.to_string(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flat_has_one_writable_collection() {
        let svc = MemoryService::flat("scratch");
        let collections = svc.list_collections().await.unwrap();
        assert_eq!(collections.len(), 1);
        assert!(collections[0].writable);
        assert_eq!(svc.layout(), Layout::Flat);
    }

    #[tokio::test]
    async fn test_upload_replaces() {
        let svc = MemoryService::flat("s");
        let c = svc.list_collections().await.unwrap().remove(0);
        svc.upload(&c, "x", ImageFormat::Png, Bytes::from_static(b"one"))
            .await
            .unwrap();
        svc.upload(&c, "x", ImageFormat::Gif, Bytes::from_static(b"two"))
            .await
            .unwrap();

        let listed = svc.list_entities(&c).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename(), "x.gif");
        assert_eq!(&svc.content("s", "x").unwrap()[..], b"two");
        assert_eq!(svc.uploads(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let svc = MemoryService::flat("s");
        let c = svc.list_collections().await.unwrap().remove(0);
        svc.fail_uploads(true);
        let err = svc
            .upload(&c, "x", ImageFormat::Png, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Upstream { status: 500, .. }));
        assert_eq!(svc.uploads(), 0);
    }

    #[tokio::test]
    async fn test_injected_mutation_failures_leave_store_alone() {
        let svc = MemoryService::flat("s");
        svc.insert("s", "here", ImageFormat::Png, b"x");
        let c = svc.list_collections().await.unwrap().remove(0);
        let here = svc.list_entities(&c).await.unwrap().remove(0);

        svc.fail_deletes(true);
        svc.fail_aliases(true);
        assert!(matches!(
            svc.delete(&c, &here).await,
            Err(VfsError::Upstream { status: 500, .. })
        ));
        assert!(matches!(
            svc.alias(&c, &here, "there").await,
            Err(VfsError::Upstream { status: 500, .. })
        ));
        assert_eq!(svc.list_entities(&c).await.unwrap().len(), 1);

        svc.fail_deletes(false);
        svc.delete(&c, &here).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let svc = MemoryService::flat("s");
        svc.insert("s", "here", ImageFormat::Png, b"x");
        let c = svc.list_collections().await.unwrap().remove(0);
        let here = svc.list_entities(&c).await.unwrap().remove(0);

        svc.delete(&c, &here).await.unwrap();
        assert!(matches!(
            svc.delete(&c, &here).await,
            Err(VfsError::NotFound(_))
        ));
    }
}
