//! Dimension-to-collection registry

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::backend::IndexBackend;
use crate::config::StoreConfig;
use crate::error::{VectorError, VectorResult};
use crate::types::{CollectionHandle, Metadata};

const DIM_MARKER: &str = "_dim";

/// Extract `D` from a collection named `<prefix>_dim<D>`
pub fn parse_dimension(prefix: &str, name: &str) -> Option<usize> {
    name.strip_prefix(prefix)?
        .strip_prefix(DIM_MARKER)?
        .parse()
        .ok()
}

/// Maps each embedding dimension to one lazily created collection.
///
/// Cached lookups take a shared read lock only. Creation runs under a
/// single mutex and re-checks the cache, so concurrent first use of a
/// dimension issues one get-or-create.
pub struct CollectionRegistry {
    backend: Arc<dyn IndexBackend>,
    prefix: String,
    owner: String,
    entity: String,
    cache: RwLock<HashMap<String, CollectionHandle>>,
    create_lock: Mutex<()>,
}

impl CollectionRegistry {
    pub fn new(backend: Arc<dyn IndexBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            prefix: config.collection_prefix.clone(),
            owner: config.owner.clone(),
            entity: config.entity.clone(),
            cache: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Collection name for a dimension
    pub fn collection_name(&self, dimension: usize) -> String {
        format!("{}{DIM_MARKER}{dimension}", self.prefix)
    }

    fn collection_metadata(&self, dimension: usize) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("hnsw:space".to_string(), json!("cosine"));
        metadata.insert("dimension".to_string(), json!(dimension));
        metadata.insert("owner".to_string(), json!(self.owner));
        metadata.insert("entity".to_string(), json!(self.entity));
        metadata
    }

    /// Handle for the collection holding `dimension`-length embeddings
    pub async fn resolve(&self, dimension: usize) -> VectorResult<CollectionHandle> {
        if dimension == 0 {
            return Err(VectorError::shape("dimension must be positive"));
        }

        let name = self.collection_name(dimension);
        if let Some(handle) = self.cache.read().await.get(&name) {
            return Ok(handle.clone());
        }

        let _guard = self.create_lock.lock().await;
        if let Some(handle) = self.cache.read().await.get(&name) {
            return Ok(handle.clone());
        }

        let handle = self
            .backend
            .get_or_create_collection(&name, self.collection_metadata(dimension))
            .await?;
        info!(
            collection = %handle.name,
            dimension,
            backend = self.backend.backend_name(),
            "Collection ready"
        );

        self.cache.write().await.insert(name, handle.clone());
        Ok(handle)
    }

    /// Forget a cached handle; returns whether it was cached
    pub async fn evict(&self, name: &str) -> bool {
        self.cache.write().await.remove(name).is_some()
    }

    pub async fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;

    fn registry(index: Arc<InMemoryIndex>) -> CollectionRegistry {
        CollectionRegistry::new(index, &StoreConfig::default())
    }

    #[test]
    fn parse_dimension_from_names() {
        assert_eq!(parse_dimension("candidates", "candidates_dim768"), Some(768));
        assert_eq!(parse_dimension("candidates", "candidates_dimx"), None);
        assert_eq!(parse_dimension("candidates", "jobs_dim768"), None);
        assert_eq!(parse_dimension("candidates", "candidates_dim"), None);
    }

    #[tokio::test]
    async fn resolve_names_and_tags_collection() {
        let index = Arc::new(InMemoryIndex::new());
        let handle = registry(index.clone()).resolve(768).await.unwrap();

        assert_eq!(handle.name, "candidates_dim768");
        assert_eq!(handle.metadata.get("hnsw:space"), Some(&json!("cosine")));
        assert_eq!(handle.dimension(), Some(768));
        assert_eq!(handle.metadata.get("entity"), Some(&json!("candidate")));
    }

    #[tokio::test]
    async fn resolve_uses_cache_after_first_call() {
        let index = Arc::new(InMemoryIndex::new());
        let registry = registry(index.clone());

        let first = registry.resolve(3).await.unwrap();
        let second = registry.resolve(3).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(index.collection_requests(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_resolution_creates_once() {
        let index = Arc::new(InMemoryIndex::new());
        let registry = Arc::new(registry(index.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.resolve(1536).await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(index.collection_requests(), 1);
        assert_eq!(index.create_calls(), 1);
    }

    #[tokio::test]
    async fn zero_dimension_is_rejected() {
        let index = Arc::new(InMemoryIndex::new());
        let err = registry(index.clone()).resolve(0).await.unwrap_err();
        assert!(matches!(err, VectorError::ShapeMismatch(_)));
        assert_eq!(index.collection_requests(), 0);
    }

    #[tokio::test]
    async fn evict_forces_new_lookup() {
        let index = Arc::new(InMemoryIndex::new());
        let registry = registry(index.clone());

        registry.resolve(3).await.unwrap();
        assert!(registry.evict("candidates_dim3").await);
        assert!(!registry.evict("candidates_dim3").await);
        assert!(registry.cached_names().await.is_empty());

        registry.resolve(3).await.unwrap();
        assert_eq!(index.collection_requests(), 2);
    }
}
