//! Remote index capability

use async_trait::async_trait;

use crate::error::VectorResult;
use crate::types::{
    CollectionHandle, DeleteSelector, Embedding, FetchedRecords, GetSelector, Include, Metadata,
    QueryMatch, Record,
};

/// Operations the store client needs from a vector index.
///
/// Implementations translate their transport failures into
/// [`VectorError`](crate::VectorError) kinds; in particular an oversized
/// request must surface as `PayloadTooLarge` so the bulk writer can split it.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Fetch the named collection, creating it with `metadata` if absent
    async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: Metadata,
    ) -> VectorResult<CollectionHandle>;

    /// Insert or replace records by ID
    async fn upsert(&self, collection: &CollectionHandle, records: &[Record]) -> VectorResult<()>;

    /// Nearest neighbors of `embedding`, closest first
    async fn query(
        &self,
        collection: &CollectionHandle,
        embedding: &Embedding,
        n_results: usize,
        include: Include,
    ) -> VectorResult<Vec<QueryMatch>>;

    /// Read records by ID or by page
    async fn get(
        &self,
        collection: &CollectionHandle,
        selector: GetSelector,
        include: Include,
    ) -> VectorResult<FetchedRecords>;

    /// Number of records in a collection
    async fn count(&self, collection: &CollectionHandle) -> VectorResult<usize>;

    async fn delete(&self, collection: &CollectionHandle, selector: DeleteSelector)
        -> VectorResult<()>;

    async fn list_collections(&self) -> VectorResult<Vec<CollectionHandle>>;

    /// Remove a collection by name; `NotFound` if it does not exist
    async fn delete_collection(&self, name: &str) -> VectorResult<()>;

    fn backend_name(&self) -> &'static str;
}
