//! In-memory index for tests and local runs

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend::IndexBackend;
use crate::error::{VectorError, VectorResult};
use crate::types::{
    CollectionHandle, DeleteSelector, Embedding, FetchedRecords, GetSelector, Include, Metadata,
    QueryMatch, Record,
};

/// Cosine distance, `1 - cos(a, b)`; zero vectors are at distance 1
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (mag_a * mag_b)
    }
}

#[derive(Debug, Default)]
struct MemoryCollection {
    handle: Option<CollectionHandle>,
    dimension: Option<usize>,
    records: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl MemoryCollection {
    fn upsert(&mut self, record: Record) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn retain(&mut self, keep: impl Fn(&Record) -> bool) {
        self.records.retain(|r| keep(r));
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id.clone(), pos))
            .collect();
    }
}

fn project(record: &Record, include: Include) -> Record {
    Record {
        id: record.id.clone(),
        embedding: if include.embeddings {
            record.embedding.clone()
        } else {
            Vec::new()
        },
        metadata: if include.metadatas {
            record.metadata.clone()
        } else {
            Metadata::new()
        },
    }
}

/// Exact-search index kept in process memory.
///
/// `with_max_batch` makes upserts of more records than the limit fail with
/// `PayloadTooLarge`, mimicking a server body-size cap.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    collections: Arc<RwLock<BTreeMap<String, MemoryCollection>>>,
    next_id: AtomicUsize,
    max_batch: Option<usize>,
    upsert_calls: AtomicUsize,
    create_calls: AtomicUsize,
    collection_requests: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject upserts larger than `max_records`
    pub fn with_max_batch(mut self, max_records: usize) -> Self {
        self.max_batch = Some(max_records);
        self
    }

    /// Upsert requests received, including rejected ones
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Collections actually created
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Get-or-create requests received
    pub fn collection_requests(&self) -> usize {
        self.collection_requests.load(Ordering::SeqCst)
    }

    /// Make every call fail with `RemoteUnavailable` while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> VectorResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(VectorError::unavailable("in-memory index is offline"))
        } else {
            Ok(())
        }
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.collections.read().await.keys().cloned().collect()
    }

    async fn with_collection<T>(
        &self,
        handle: &CollectionHandle,
        f: impl FnOnce(&MemoryCollection) -> T,
    ) -> VectorResult<T> {
        self.ensure_online()?;
        let collections = self.collections.read().await;
        collections
            .get(&handle.name)
            .map(f)
            .ok_or_else(|| VectorError::not_found(format!("collection {}", handle.name)))
    }
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: Metadata,
    ) -> VectorResult<CollectionHandle> {
        self.collection_requests.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        if let Some(handle) = self
            .collections
            .read()
            .await
            .get(name)
            .and_then(|c| c.handle.clone())
        {
            return Ok(handle);
        }

        // Give concurrent callers a chance to interleave here.
        tokio::task::yield_now().await;

        let mut collections = self.collections.write().await;
        let entry = collections.entry(name.to_string()).or_default();
        if let Some(handle) = &entry.handle {
            return Ok(handle.clone());
        }

        let handle = CollectionHandle {
            id: format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: name.to_string(),
            metadata,
        };
        entry.dimension = handle.dimension();
        entry.handle = Some(handle.clone());
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn upsert(&self, collection: &CollectionHandle, records: &[Record]) -> VectorResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        if let Some(max) = self.max_batch {
            if records.len() > max {
                return Err(VectorError::PayloadTooLarge {
                    records: records.len(),
                });
            }
        }

        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(&collection.name)
            .ok_or_else(|| VectorError::not_found(format!("collection {}", collection.name)))?;

        for record in records {
            let expected = *entry.dimension.get_or_insert(record.dimension());
            if record.dimension() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    actual: record.dimension(),
                });
            }
        }

        for record in records {
            entry.upsert(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        embedding: &Embedding,
        n_results: usize,
        include: Include,
    ) -> VectorResult<Vec<QueryMatch>> {
        self.with_collection(collection, |c| {
            let mut scored: Vec<(f32, &Record)> = c
                .records
                .iter()
                .map(|r| (cosine_distance(embedding, &r.embedding), r))
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(n_results);

            scored
                .into_iter()
                .map(|(distance, r)| {
                    QueryMatch::from_distance(
                        r.id.clone(),
                        distance,
                        include.metadatas.then(|| r.metadata.clone()),
                        include.embeddings.then(|| r.embedding.clone()),
                    )
                })
                .collect()
        })
        .await
    }

    async fn get(
        &self,
        collection: &CollectionHandle,
        selector: GetSelector,
        include: Include,
    ) -> VectorResult<FetchedRecords> {
        self.with_collection(collection, |c| {
            let records = match selector {
                GetSelector::Ids(ids) => ids
                    .iter()
                    .filter_map(|id| c.positions.get(id))
                    .map(|&pos| project(&c.records[pos], include))
                    .collect(),
                GetSelector::Page { offset, limit } => c
                    .records
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .map(|r| project(r, include))
                    .collect(),
            };
            FetchedRecords { records }
        })
        .await
    }

    async fn count(&self, collection: &CollectionHandle) -> VectorResult<usize> {
        self.with_collection(collection, |c| c.records.len()).await
    }

    async fn delete(
        &self,
        collection: &CollectionHandle,
        selector: DeleteSelector,
    ) -> VectorResult<()> {
        self.ensure_online()?;
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(&collection.name)
            .ok_or_else(|| VectorError::not_found(format!("collection {}", collection.name)))?;

        match selector {
            DeleteSelector::All => entry.retain(|_| false),
            DeleteSelector::Ids(ids) => entry.retain(|r| !ids.contains(&r.id)),
        }
        Ok(())
    }

    async fn list_collections(&self) -> VectorResult<Vec<CollectionHandle>> {
        self.ensure_online()?;
        Ok(self
            .collections
            .read()
            .await
            .values()
            .filter_map(|c| c.handle.clone())
            .collect())
    }

    async fn delete_collection(&self, name: &str) -> VectorResult<()> {
        self.ensure_online()?;
        self.collections
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VectorError::not_found(format!("collection {name}")))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
