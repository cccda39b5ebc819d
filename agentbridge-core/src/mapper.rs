//! Name mapper (spec C4): public↔internal model name mapping, persisted in sqlite and
//! cached in memory so the hot path (resolving a public name on every request) never
//! touches the database.

use std::sync::Arc;

use agentbridge_protocol::ModelMapping;
use dashmap::DashMap;

use crate::persistence::{PersistError, Store};

pub struct NameMapper {
    store: Arc<Store>,
    cache: DashMap<String, String>,
    reverse: DashMap<String, String>,
}

impl NameMapper {
    /// Loads the full mapping table into the in-memory cache.
    pub async fn new(store: Arc<Store>) -> Result<Self, PersistError> {
        let mapper = Self {
            store,
            cache: DashMap::new(),
            reverse: DashMap::new(),
        };
        mapper.reload().await?;
        Ok(mapper)
    }

    async fn reload(&self) -> Result<(), PersistError> {
        self.cache.clear();
        self.reverse.clear();
        for mapping in self.store.list_mappings().await? {
            self.reverse.insert(mapping.internal_name.clone(), mapping.public_name.clone());
            self.cache.insert(mapping.public_name, mapping.internal_name);
        }
        Ok(())
    }

    /// Resolves a public model name to the internal name an agent expects. Falls back
    /// to the identity mapping (public name used verbatim) when no mapping exists.
    pub fn resolve(&self, public_name: &str) -> String {
        self.cache
            .get(public_name)
            .map(|kv| kv.value().clone())
            .unwrap_or_else(|| public_name.to_string())
    }

    /// Resolves an internal model name back to the public name clients see. Falls back
    /// to the identity mapping, symmetric with [`NameMapper::resolve`].
    pub fn internal_to_public(&self, internal_name: &str) -> String {
        self.reverse
            .get(internal_name)
            .map(|kv| kv.value().clone())
            .unwrap_or_else(|| internal_name.to_string())
    }

    pub async fn put(&self, mapping: ModelMapping) -> Result<(), PersistError> {
        self.store.put_mapping(mapping.clone()).await?;
        self.reverse.insert(mapping.internal_name.clone(), mapping.public_name.clone());
        self.cache.insert(mapping.public_name, mapping.internal_name);
        Ok(())
    }

    pub async fn delete(&self, public_name: &str) -> Result<(), PersistError> {
        self.store.delete_mapping(public_name.to_string()).await?;
        if let Some((_, internal_name)) = self.cache.remove(public_name) {
            self.reverse.remove(&internal_name);
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.cache.iter().map(|kv| (kv.key().clone(), kv.value().clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn mapper() -> (NameMapper, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(file.path()).unwrap());
        (NameMapper::new(store).await.unwrap(), file)
    }

    #[tokio::test]
    async fn unmapped_name_resolves_to_itself() {
        let (mapper, _file) = mapper().await;
        assert_eq!(mapper.resolve("gpt-local"), "gpt-local");
    }

    #[tokio::test]
    async fn put_then_resolve_returns_internal_name() {
        let (mapper, _file) = mapper().await;
        mapper.put(ModelMapping::new("gpt-local", "llama-3-8b")).await.unwrap();
        assert_eq!(mapper.resolve("gpt-local"), "llama-3-8b");
    }

    #[tokio::test]
    async fn delete_reverts_to_identity_resolution() {
        let (mapper, _file) = mapper().await;
        mapper.put(ModelMapping::new("gpt-local", "llama-3-8b")).await.unwrap();
        mapper.delete("gpt-local").await.unwrap();
        assert_eq!(mapper.resolve("gpt-local"), "gpt-local");
    }

    #[tokio::test]
    async fn unmapped_internal_name_resolves_to_itself() {
        let (mapper, _file) = mapper().await;
        assert_eq!(mapper.internal_to_public("llama-3-8b"), "llama-3-8b");
    }

    #[tokio::test]
    async fn resolve_and_internal_to_public_round_trip() {
        let (mapper, _file) = mapper().await;
        mapper.put(ModelMapping::new("gpt-local", "llama-3-8b")).await.unwrap();
        let internal = mapper.resolve("gpt-local");
        assert_eq!(mapper.internal_to_public(&internal), "gpt-local");
    }

    #[tokio::test]
    async fn delete_reverts_internal_to_public_to_identity() {
        let (mapper, _file) = mapper().await;
        mapper.put(ModelMapping::new("gpt-local", "llama-3-8b")).await.unwrap();
        mapper.delete("gpt-local").await.unwrap();
        assert_eq!(mapper.internal_to_public("llama-3-8b"), "llama-3-8b");
    }
}
