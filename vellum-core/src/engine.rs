//! The process-wide storage engine handle: the collection registry plus
//! the loaded encryption key, shared (via `Arc`) across every connection.
//! Grounded on `rust-us-kv-rs`'s `MVCC<E>` -- a single cloneable handle
//! wrapping shared state -- generalized from one engine to a registry of
//! named collections.

use crate::collection::Collection;
use crate::config::EngineConfig;
use crate::crypto::EncryptionKey;
use crate::document::Id;
use crate::error::{CResult, Error};
use crate::index::IndexDef;
use dashmap::DashMap;
use std::sync::Arc;

pub struct Engine {
    config: EngineConfig,
    encryption_key: Option<Arc<EncryptionKey>>,
    collections: DashMap<String, Arc<Collection>>,
}

impl Engine {
    /// Opens the engine against `config.data_dir`, recovering every
    /// collection directory found there (REC, §4.7).
    pub fn open(config: EngineConfig) -> CResult<Self> {
        let encryption_key = match &config.encryption_key_hex {
            Some(hex) => Some(Arc::new(EncryptionKey::from_hex(hex)?)),
            None => None,
        };
        std::fs::create_dir_all(&config.data_dir)?;

        let engine = Engine { config, encryption_key, collections: DashMap::new() };

        if engine.config.data_dir.is_dir() {
            for entry in std::fs::read_dir(&engine.config.data_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let collection = engine.open_collection(&name)?;
                collection.recover()?;
                engine.collections.insert(name, Arc::new(collection));
            }
        }
        Ok(engine)
    }

    fn open_collection(&self, name: &str) -> CResult<Collection> {
        Collection::create(name, &self.config.data_dir, self.encryption_key.clone())
    }

    pub fn create_collection(&self, name: &str) -> CResult<()> {
        if self.collections.contains_key(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }
        let collection = self.open_collection(name)?;
        self.collections.insert(name.to_string(), Arc::new(collection));
        Ok(())
    }

    /// Returns the named collection, creating it implicitly if absent --
    /// collections may come into existence via explicit `create_collection`
    /// or implicitly on first insert.
    pub fn collection_or_create(&self, name: &str) -> CResult<Arc<Collection>> {
        if let Some(c) = self.collections.get(name) {
            return Ok(c.clone());
        }
        let collection = Arc::new(self.open_collection(name)?);
        self.collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    pub fn collection(&self, name: &str) -> CResult<Arc<Collection>> {
        self.collections
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.collections.iter().map(|e| e.key().clone()).collect()
    }

    /// Drops a collection: removes it from the registry and deletes its
    /// storage directory via rename-to-tombstone then unlink.
    pub fn drop_collection(&self, name: &str) -> CResult<()> {
        let (_, collection) = self
            .collections
            .remove(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        let dir = collection.dir().to_path_buf();
        drop(collection);
        let tombstone = dir.with_extension("dropped");
        std::fs::rename(&dir, &tombstone)?;
        std::fs::remove_dir_all(&tombstone)?;
        Ok(())
    }

    pub fn create_index(&self, collection: &str, def: IndexDef) -> CResult<()> {
        self.collection(collection)?.create_index(def)
    }

    pub fn compact(&self, collection: &str) -> CResult<()> {
        self.collection(collection)?.compact()
    }

    pub fn apply(&self, collection: &str, batch: &[u8]) -> CResult<()> {
        crate::apply::apply_batch(&*self.collection(collection)?, batch)
    }

    pub fn next_id() -> Id {
        Id::new()
    }
}
