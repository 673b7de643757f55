//! Dimension-sharded vector store client

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::IndexBackend;
use crate::chroma::ChromaBackend;
use crate::config::StoreConfig;
use crate::error::{VectorError, VectorResult};
use crate::registry::{parse_dimension, CollectionRegistry};
use crate::types::{
    batch_dimension, default_metadata, CollectionHandle, CollectionSummary, DeleteSelector,
    Embedding, FetchedRecords, GetSelector, Include, Metadata, QueryMatch, QueryRequest, Record,
};

/// Client over a remote index that keeps one collection per embedding
/// dimension.
///
/// Construct one per process and share it behind an `Arc`; the collection
/// cache lives inside.
pub struct VectorStoreClient {
    backend: Arc<dyn IndexBackend>,
    registry: CollectionRegistry,
    config: StoreConfig,
}

impl VectorStoreClient {
    /// Create a client over an explicit backend
    pub fn new(backend: Arc<dyn IndexBackend>, config: StoreConfig) -> Self {
        let registry = CollectionRegistry::new(backend.clone(), &config);
        Self {
            backend,
            registry,
            config,
        }
    }

    /// Create a client talking to the Chroma server in `config`
    pub fn connect(config: StoreConfig) -> VectorResult<Self> {
        config.validate()?;
        let backend = ChromaBackend::new(&config)?;
        info!(
            url = %config.url,
            prefix = %config.collection_prefix,
            "Vector store client initialized"
        );
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn collection_name(&self, dimension: usize) -> String {
        self.registry.collection_name(dimension)
    }

    /// Collection handle for a dimension, creating it on first use
    pub async fn collection(&self, dimension: usize) -> VectorResult<CollectionHandle> {
        self.registry.resolve(dimension).await
    }

    /// Insert or replace records.
    ///
    /// All embeddings must share one dimension, which must equal
    /// `dimension` when given. An empty batch is a no-op.
    pub async fn upsert(&self, records: &[Record], dimension: Option<usize>) -> VectorResult<()> {
        let Some(dim) = batch_dimension(records, dimension)? else {
            return Ok(());
        };
        if records.is_empty() {
            return Ok(());
        }

        let collection = self.registry.resolve(dim).await?;
        self.backend.upsert(&collection, records).await?;
        debug!(collection = %collection.name, records = records.len(), "Upserted records");
        Ok(())
    }

    /// Column-wise upsert; missing metadata defaults to `{"candidate_id": id}`
    pub async fn upsert_columns(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Embedding>,
        metadatas: Option<Vec<Metadata>>,
        dimension: Option<usize>,
    ) -> VectorResult<()> {
        let records = zip_columns(ids, embeddings, metadatas)?;
        self.upsert(&records, dimension).await
    }

    /// Nearest neighbors of the query embedding, closest first
    pub async fn query_similar(&self, request: QueryRequest) -> VectorResult<Vec<QueryMatch>> {
        let dim = request.resolved_dimension()?;
        let collection = self.registry.resolve(dim).await?;
        let include = Include::metadata_only().with_embeddings(request.include_embeddings);

        let matches = self
            .backend
            .query(&collection, &request.embedding, request.top_k, include)
            .await?;
        debug!(
            collection = %collection.name,
            top_k = request.top_k,
            returned = matches.len(),
            "Similarity query"
        );
        Ok(matches)
    }

    pub async fn delete_by_ids(&self, ids: &[String], dimension: usize) -> VectorResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection = self.registry.resolve(dimension).await?;
        self.backend
            .delete(&collection, DeleteSelector::Ids(ids.to_vec()))
            .await?;
        info!(collection = %collection.name, ids = ids.len(), "Deleted records");
        Ok(())
    }

    /// Delete every record in the collection for `dimension`
    pub async fn clear_collection(&self, dimension: usize) -> VectorResult<()> {
        let collection = self.registry.resolve(dimension).await?;
        self.backend.delete(&collection, DeleteSelector::All).await?;
        warn!(collection = %collection.name, "Cleared collection");
        Ok(())
    }

    pub async fn count(&self, dimension: usize) -> VectorResult<usize> {
        let collection = self.registry.resolve(dimension).await?;
        self.backend.count(&collection).await
    }

    /// Records among `ids` that exist; absent IDs are left out
    pub async fn get_by_ids(
        &self,
        ids: &[String],
        dimension: usize,
        include_embeddings: bool,
    ) -> VectorResult<FetchedRecords> {
        if ids.is_empty() {
            return Ok(FetchedRecords::default());
        }
        let collection = self.registry.resolve(dimension).await?;
        self.backend
            .get(
                &collection,
                GetSelector::Ids(ids.to_vec()),
                Include::metadata_only().with_embeddings(include_embeddings),
            )
            .await
    }

    /// A single record with its embedding; `NotFound` when absent
    pub async fn get_record(&self, id: &str, dimension: usize) -> VectorResult<Record> {
        let fetched = self
            .get_by_ids(&[id.to_string()], dimension, true)
            .await?;
        fetched
            .records
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| {
                VectorError::not_found(format!("record {id} in {}", self.collection_name(dimension)))
            })
    }

    /// One offset/limit page of records
    pub async fn get_page(
        &self,
        dimension: usize,
        offset: usize,
        limit: usize,
        include_embeddings: bool,
    ) -> VectorResult<FetchedRecords> {
        let collection = self.registry.resolve(dimension).await?;
        self.backend
            .get(
                &collection,
                GetSelector::Page { offset, limit },
                Include::metadata_only().with_embeddings(include_embeddings),
            )
            .await
    }

    /// Dimensions that have a `<prefix>_dim<D>` collection, ascending
    pub async fn list_dimensions_available(&self) -> VectorResult<Vec<usize>> {
        let mut dims: Vec<usize> = self
            .backend
            .list_collections()
            .await?
            .iter()
            .filter_map(|c| parse_dimension(self.registry.prefix(), &c.name))
            .collect();
        dims.sort_unstable();
        dims.dedup();
        Ok(dims)
    }

    /// Name, metadata and size of every remote collection
    pub async fn describe_collections(&self) -> VectorResult<Vec<CollectionSummary>> {
        let collections = self.backend.list_collections().await?;
        let mut summaries = Vec::with_capacity(collections.len());
        for collection in collections {
            let count = self.backend.count(&collection).await?;
            summaries.push(CollectionSummary {
                name: collection.name,
                metadata: collection.metadata,
                count,
            });
        }
        Ok(summaries)
    }

    /// Delete every collection, or those whose name starts with `prefix`.
    ///
    /// Returns the removed names. There is no undo.
    pub async fn drop_collections(&self, prefix: Option<&str>) -> VectorResult<Vec<String>> {
        let mut dropped = Vec::new();
        for collection in self.backend.list_collections().await? {
            if let Some(prefix) = prefix {
                if !collection.name.starts_with(prefix) {
                    continue;
                }
            }

            self.backend.delete_collection(&collection.name).await?;
            self.registry.evict(&collection.name).await;
            warn!(collection = %collection.name, "Dropped collection");
            dropped.push(collection.name);
        }
        Ok(dropped)
    }

    /// Backend-level upsert into an already resolved collection
    pub(crate) async fn upsert_resolved(
        &self,
        collection: &CollectionHandle,
        records: &[Record],
    ) -> VectorResult<()> {
        self.backend.upsert(collection, records).await
    }
}

fn zip_columns(
    ids: Vec<String>,
    embeddings: Vec<Embedding>,
    metadatas: Option<Vec<Metadata>>,
) -> VectorResult<Vec<Record>> {
    if ids.len() != embeddings.len() {
        return Err(VectorError::shape(format!(
            "{} ids but {} embeddings",
            ids.len(),
            embeddings.len()
        )));
    }

    match metadatas {
        Some(metadatas) => {
            if metadatas.len() != ids.len() {
                return Err(VectorError::shape(format!(
                    "{} metadatas but {} ids",
                    metadatas.len(),
                    ids.len()
                )));
            }
            Ok(ids
                .into_iter()
                .zip(embeddings)
                .zip(metadatas)
                .map(|((id, embedding), metadata)| Record::with_metadata(id, embedding, metadata))
                .collect())
        }
        None => Ok(ids
            .into_iter()
            .zip(embeddings)
            .map(|(id, embedding)| {
                let metadata = default_metadata(&id);
                Record::with_metadata(id, embedding, metadata)
            })
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use serde_json::json;

    fn client() -> (VectorStoreClient, Arc<InMemoryIndex>) {
        let index = Arc::new(InMemoryIndex::new());
        let client = VectorStoreClient::new(index.clone(), StoreConfig::default());
        (client, index)
    }

    fn abc() -> Vec<Record> {
        vec![
            Record::new("a", vec![1.0, 0.0, 0.0]),
            Record::new("b", vec![0.0, 1.0, 0.0]),
            Record::new("c", vec![0.0, 0.0, 1.0]),
        ]
    }

    #[tokio::test]
    async fn query_ranks_identical_vector_first() {
        let (client, _) = client();
        client.upsert(&abc(), None).await.unwrap();

        let matches = client
            .query_similar(QueryRequest::new(vec![1.0, 0.0, 0.0]).with_top_k(2))
            .await
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "a");
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
        assert!(matches[1].id == "b" || matches[1].id == "c");
        assert!(matches[1].similarity.abs() < 1e-6);
        assert_eq!(matches[0].metadata.as_ref().unwrap()["candidate_id"], json!("a"));
        assert!(matches[0].embedding.is_none());
    }

    #[tokio::test]
    async fn dimensions_are_isolated() {
        let (client, _) = client();
        client.upsert(&abc(), None).await.unwrap();
        client
            .upsert(&[Record::new("z", vec![1.0, 0.0])], None)
            .await
            .unwrap();

        let matches = client
            .query_similar(QueryRequest::new(vec![1.0, 0.0]).with_top_k(10))
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["z"]);
        assert_eq!(client.list_dimensions_available().await.unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn explicit_query_dimension_must_match() {
        let (client, index) = client();
        let err = client
            .query_similar(QueryRequest::new(vec![1.0, 0.0, 0.0]).with_dimension(768))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 768, actual: 3 }));
        assert_eq!(index.collection_requests(), 0);
    }

    #[tokio::test]
    async fn upsert_validates_before_remote_calls() {
        let (client, index) = client();
        let ragged = vec![Record::new("a", vec![1.0, 0.0]), Record::new("b", vec![1.0])];
        assert!(matches!(
            client.upsert(&ragged, None).await,
            Err(VectorError::ShapeMismatch(_))
        ));
        assert!(matches!(
            client.upsert(&abc(), Some(768)).await,
            Err(VectorError::ShapeMismatch(_))
        ));
        assert_eq!(index.upsert_calls(), 0);
        assert_eq!(index.collection_requests(), 0);
    }

    #[tokio::test]
    async fn upsert_columns_checks_lengths_and_defaults_metadata() {
        let (client, _) = client();
        let err = client
            .upsert_columns(vec!["a".into()], vec![vec![1.0], vec![2.0]], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::ShapeMismatch(_)));

        let err = client
            .upsert_columns(vec!["a".into()], vec![vec![1.0]], Some(Vec::new()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::ShapeMismatch(_)));

        client
            .upsert_columns(vec!["1253".into()], vec![vec![0.5, 0.5]], None, Some(2))
            .await
            .unwrap();
        let record = client.get_record("1253", 2).await.unwrap();
        assert_eq!(record.metadata["candidate_id"], json!("1253"));
        assert_eq!(record.embedding, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn get_record_miss_is_not_found() {
        let (client, _) = client();
        client.upsert(&abc(), None).await.unwrap();
        let err = client.get_record("missing", 3).await.unwrap_err();
        assert!(matches!(err, VectorError::NotFound(_)));

        let fetched = client
            .get_by_ids(&["a".to_string(), "missing".to_string()], 3, false)
            .await
            .unwrap();
        assert_eq!(fetched.ids().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (client, _) = client();
        client.upsert(&abc(), None).await.unwrap();

        client.delete_by_ids(&["a".to_string()], 3).await.unwrap();
        assert_eq!(client.count(3).await.unwrap(), 2);

        client.clear_collection(3).await.unwrap();
        assert_eq!(client.count(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drop_collections_filters_and_evicts() {
        let (client, index) = client();
        client.upsert(&abc(), None).await.unwrap();
        client
            .upsert(&[Record::new("z", vec![1.0, 0.0])], None)
            .await
            .unwrap();
        index
            .get_or_create_collection("jobs_dim3", Metadata::new())
            .await
            .unwrap();

        let dropped = client.drop_collections(Some("candidates")).await.unwrap();
        assert_eq!(dropped, vec!["candidates_dim2", "candidates_dim3"]);
        assert!(client.registry().cached_names().await.is_empty());
        assert_eq!(index.collection_names().await, vec!["jobs_dim3"]);

        let dropped = client.drop_collections(None).await.unwrap();
        assert_eq!(dropped, vec!["jobs_dim3"]);
    }

    #[tokio::test]
    async fn describe_reports_counts() {
        let (client, _) = client();
        client.upsert(&abc(), None).await.unwrap();

        let summaries = client.describe_collections().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "candidates_dim3");
        assert_eq!(summaries[0].count, 3);
        assert_eq!(summaries[0].metadata["dimension"], json!(3));
    }
}
