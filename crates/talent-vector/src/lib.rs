//! Talent Vector Storage - dimension-sharded vector store and bulk pipeline
//!
//! This crate provides:
//! - `IndexBackend` trait over the remote vector index, with a Chroma HTTP
//!   implementation and an in-memory one for tests
//! - `CollectionRegistry` mapping each embedding dimension to one collection
//! - `VectorStoreClient` for upserts, cosine similarity queries and admin
//! - `safe_upsert`, which halves batches the index rejects as too large
//! - JSONL export/import with an idempotency check

pub mod backend;
pub mod chroma;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod registry;
pub mod types;
pub mod writer;

pub use backend::IndexBackend;
pub use chroma::ChromaBackend;
pub use client::VectorStoreClient;
pub use config::{IdempotencyMode, StoreConfig};
pub use error::{VectorError, VectorResult};
pub use memory::InMemoryIndex;
pub use registry::CollectionRegistry;
pub use types::{CollectionHandle, CollectionSummary, Metadata, QueryMatch, QueryRequest, Record};
pub use writer::{safe_upsert, WriteStats};

/// Prelude for common imports
pub mod prelude {
    pub use crate::client::VectorStoreClient;
    pub use crate::config::{IdempotencyMode, StoreConfig};
    pub use crate::error::{VectorError, VectorResult};
    pub use crate::pipeline::{export_collection, import_collection, ExportOptions, ImportOptions};
    pub use crate::types::{Metadata, QueryMatch, QueryRequest, Record};
}
