//! Core types for vector storage

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{VectorError, VectorResult};

/// Free-form record metadata
pub type Metadata = Map<String, Value>;

/// Embedding vector; its length is the dimensionality
pub type Embedding = Vec<f32>;

/// Metadata attached when a caller supplies none
pub fn default_metadata(id: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("candidate_id".to_string(), json!(id));
    metadata
}

/// A stored vector with its ID and metadata.
///
/// The same shape is used on the wire, in the JSONL interchange files and
/// inside the in-memory index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Unique within a collection
    pub id: String,
    /// Embedding vector
    pub embedding: Embedding,
    /// Record metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Record {
    /// Create a record with `{"candidate_id": id}` metadata
    pub fn new(id: impl Into<String>, embedding: Embedding) -> Self {
        let id = id.into();
        let metadata = default_metadata(&id);
        Self {
            id,
            embedding,
            metadata,
        }
    }

    /// Create a record with explicit metadata
    pub fn with_metadata(id: impl Into<String>, embedding: Embedding, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata,
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Check that every record shares one dimension and return it.
///
/// `expected` pins the dimension; otherwise it is inferred from the first
/// record. Embedding values must be finite. Returns `None` for an empty
/// batch without an explicit dimension.
pub fn batch_dimension(records: &[Record], expected: Option<usize>) -> VectorResult<Option<usize>> {
    let inferred = match records.first() {
        Some(first) => first.dimension(),
        None => return Ok(expected),
    };

    if let Some(dim) = expected {
        if dim != inferred {
            return Err(VectorError::shape(format!(
                "declared dimension {dim} does not match embeddings of length {inferred}"
            )));
        }
    }

    if inferred == 0 {
        return Err(VectorError::shape("embeddings cannot be empty"));
    }

    if let Some((index, record)) = records
        .iter()
        .enumerate()
        .find(|(_, r)| r.dimension() != inferred)
    {
        return Err(VectorError::shape(format!(
            "embedding {index} (id {}) has length {}, expected {inferred}",
            record.id,
            record.dimension()
        )));
    }

    if let Some(record) = records
        .iter()
        .find(|r| r.embedding.iter().any(|x| !x.is_finite()))
    {
        return Err(VectorError::shape(format!(
            "embedding for id {} contains NaN or infinite values",
            record.id
        )));
    }

    Ok(Some(inferred))
}

/// Handle to a remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionHandle {
    /// Remote identifier used in per-collection calls
    pub id: String,
    /// Collection name, `<prefix>_dim<D>`
    pub name: String,
    /// Collection metadata as stored remotely
    #[serde(default)]
    pub metadata: Metadata,
}

impl CollectionHandle {
    /// Dimension recorded in the collection metadata, if any
    pub fn dimension(&self) -> Option<usize> {
        self.metadata
            .get("dimension")
            .and_then(Value::as_u64)
            .and_then(|d| usize::try_from(d).ok())
    }
}

/// Collection overview used for operator inspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub metadata: Metadata,
    pub count: usize,
}

/// Similarity query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Query vector
    pub embedding: Embedding,
    /// Number of neighbors to return
    pub top_k: usize,
    /// Explicit dimension; must agree with the vector length
    pub dimension: Option<usize>,
    /// Return stored embeddings alongside each match
    pub include_embeddings: bool,
}

impl QueryRequest {
    pub const DEFAULT_TOP_K: usize = 5;

    /// Create a query for a single embedding
    pub fn new(embedding: Embedding) -> Self {
        Self {
            embedding,
            top_k: Self::DEFAULT_TOP_K,
            dimension: None,
            include_embeddings: false,
        }
    }

    /// Create a query from a batch that must hold exactly one embedding
    pub fn from_batch(mut batch: Vec<Embedding>) -> VectorResult<Self> {
        if batch.len() != 1 {
            return Err(VectorError::shape(format!(
                "query batch must hold exactly one embedding, got {}",
                batch.len()
            )));
        }
        Ok(Self::new(batch.remove(0)))
    }

    /// Set number of neighbors; `0` is raised to `1`
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Pin the dimension
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Include stored embeddings in results
    pub fn with_embeddings(mut self) -> Self {
        self.include_embeddings = true;
        self
    }

    /// Resolve the collection dimension for this query
    pub fn resolved_dimension(&self) -> VectorResult<usize> {
        let actual = self.embedding.len();
        if actual == 0 {
            return Err(VectorError::shape("query embedding cannot be empty"));
        }
        match self.dimension {
            Some(expected) if expected != actual => {
                Err(VectorError::DimensionMismatch { expected, actual })
            }
            _ => Ok(actual),
        }
    }
}

/// One neighbor returned by a similarity query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    pub id: String,
    /// Cosine distance reported by the index
    pub distance: f32,
    /// `1 - distance`
    pub similarity: f32,
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl QueryMatch {
    /// Build a match from a cosine distance
    pub fn from_distance(
        id: String,
        distance: f32,
        metadata: Option<Metadata>,
        embedding: Option<Embedding>,
    ) -> Self {
        Self {
            id,
            distance,
            similarity: 1.0 - distance,
            metadata,
            embedding,
        }
    }
}

/// Fields requested from the index in reads and queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Include {
    pub metadatas: bool,
    pub embeddings: bool,
    pub distances: bool,
}

impl Include {
    pub fn metadata_only() -> Self {
        Self {
            metadatas: true,
            ..Self::default()
        }
    }

    pub fn records() -> Self {
        Self {
            metadatas: true,
            embeddings: true,
            distances: false,
        }
    }

    pub fn with_embeddings(mut self, embeddings: bool) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Names understood by the remote `include` parameter
    pub fn to_fields(self) -> Vec<&'static str> {
        let mut fields = Vec::with_capacity(3);
        if self.metadatas {
            fields.push("metadatas");
        }
        if self.embeddings {
            fields.push("embeddings");
        }
        if self.distances {
            fields.push("distances");
        }
        fields
    }
}

/// Read selection for `get`
#[derive(Debug, Clone, PartialEq)]
pub enum GetSelector {
    /// Specific IDs; absent IDs are omitted from the result
    Ids(Vec<String>),
    /// Offset/limit page in index order
    Page { offset: usize, limit: usize },
}

/// Delete selection
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    All,
}

/// Records fetched by `get`; `embedding` is empty when not requested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRecords {
    pub records: Vec<Record>,
}

impl FetchedRecords {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_new_sets_candidate_metadata() {
        let record = Record::new("1253", vec![0.1, 0.2]);
        assert_eq!(record.metadata.get("candidate_id"), Some(&json!("1253")));
        assert_eq!(record.dimension(), 2);
    }

    #[test]
    fn batch_dimension_infers_from_first_record() {
        let records = vec![Record::new("a", vec![1.0, 0.0]), Record::new("b", vec![0.0, 1.0])];
        assert_eq!(batch_dimension(&records, None).unwrap(), Some(2));
        assert_eq!(batch_dimension(&records, Some(2)).unwrap(), Some(2));
    }

    #[test]
    fn batch_dimension_rejects_ragged_batches() {
        let records = vec![Record::new("a", vec![1.0, 0.0]), Record::new("b", vec![0.0])];
        let err = batch_dimension(&records, None).unwrap_err();
        assert!(matches!(err, VectorError::ShapeMismatch(ref msg) if msg.contains("id b")));
    }

    #[test]
    fn batch_dimension_rejects_declared_mismatch() {
        let records = vec![Record::new("a", vec![1.0, 0.0, 0.0])];
        assert!(matches!(
            batch_dimension(&records, Some(768)),
            Err(VectorError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn batch_dimension_rejects_non_finite_values() {
        let records = vec![
            Record::new("a", vec![1.0, 0.0]),
            Record::new("b", vec![f32::NAN, 1.0]),
        ];
        let err = batch_dimension(&records, None).unwrap_err();
        assert!(matches!(err, VectorError::ShapeMismatch(ref msg) if msg.contains("id b")));

        let records = vec![Record::new("c", vec![f32::INFINITY, 1.0])];
        assert!(batch_dimension(&records, Some(2)).is_err());
    }

    #[test]
    fn top_k_zero_is_raised_to_one() {
        let query = QueryRequest::new(vec![1.0]).with_top_k(0);
        assert_eq!(query.top_k, 1);
        assert_eq!(QueryRequest::new(vec![1.0]).with_top_k(7).top_k, 7);
    }

    #[test]
    fn query_request_dimension_checks() {
        let query = QueryRequest::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(query.resolved_dimension().unwrap(), 3);

        let pinned = QueryRequest::new(vec![1.0, 0.0, 0.0]).with_dimension(4);
        match pinned.resolved_dimension() {
            Err(VectorError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn query_request_from_batch_requires_single_row() {
        assert!(QueryRequest::from_batch(vec![vec![1.0]]).is_ok());
        assert!(QueryRequest::from_batch(vec![vec![1.0], vec![2.0]]).is_err());
        assert!(QueryRequest::from_batch(Vec::new()).is_err());
    }

    #[test]
    fn similarity_is_one_minus_distance() {
        let m = QueryMatch::from_distance("a".into(), 0.25, None, None);
        assert!((m.similarity - 0.75).abs() < 1e-6);
    }

    #[test]
    fn include_fields_follow_flags() {
        assert_eq!(Include::records().to_fields(), vec!["metadatas", "embeddings"]);
        assert_eq!(Include::default().to_fields(), Vec::<&str>::new());
    }
}
