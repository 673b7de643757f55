//! Bulk upsert that splits oversized batches

use std::ops::Range;

use tracing::{debug, warn};

use crate::client::VectorStoreClient;
use crate::error::VectorResult;
use crate::types::{batch_dimension, Record};

/// Outcome of a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub records_written: usize,
    /// Upsert requests sent, including rejected ones
    pub remote_calls: usize,
    /// Times a range was halved after `PayloadTooLarge`
    pub splits: usize,
}

impl WriteStats {
    pub fn merge(&mut self, other: Self) {
        self.records_written += other.records_written;
        self.remote_calls += other.remote_calls;
        self.splits += other.splits;
    }
}

/// Upsert `records`, halving any range the index rejects as too large.
///
/// Ranges are processed from an explicit stack, left half first, so record
/// order is preserved and depth stays logarithmic. A single record that is
/// still too large fails with `PayloadTooLarge`; every other error is
/// returned as is. Records written before a failure stay written.
pub async fn safe_upsert(
    client: &VectorStoreClient,
    records: &[Record],
    dimension: Option<usize>,
) -> VectorResult<WriteStats> {
    let mut stats = WriteStats::default();
    let Some(dim) = batch_dimension(records, dimension)? else {
        return Ok(stats);
    };
    if records.is_empty() {
        return Ok(stats);
    }

    let collection = client.collection(dim).await?;
    let mut pending: Vec<Range<usize>> = vec![0..records.len()];

    while let Some(range) = pending.pop() {
        stats.remote_calls += 1;
        match client
            .upsert_resolved(&collection, &records[range.clone()])
            .await
        {
            Ok(()) => stats.records_written += range.len(),
            Err(err) if err.is_payload_too_large() && range.len() > 1 => {
                let mid = range.start + range.len() / 2;
                warn!(
                    collection = %collection.name,
                    records = range.len(),
                    "Payload too large, splitting batch"
                );
                stats.splits += 1;
                pending.push(mid..range.end);
                pending.push(range.start..mid);
            }
            Err(err) => return Err(err),
        }
    }

    debug!(
        collection = %collection.name,
        written = stats.records_written,
        calls = stats.remote_calls,
        splits = stats.splits,
        "Bulk upsert finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::VectorError;
    use crate::memory::InMemoryIndex;
    use std::sync::Arc;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("r{i}"), vec![i as f32 + 1.0, 1.0]))
            .collect()
    }

    fn client_with(index: Arc<InMemoryIndex>) -> VectorStoreClient {
        VectorStoreClient::new(index, StoreConfig::default())
    }

    #[tokio::test]
    async fn writes_in_one_call_when_under_limit() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client_with(index.clone());

        let stats = safe_upsert(&client, &records(10), None).await.unwrap();
        assert_eq!(
            stats,
            WriteStats {
                records_written: 10,
                remote_calls: 1,
                splits: 0
            }
        );
    }

    #[tokio::test]
    async fn halves_until_batches_fit() {
        let index = Arc::new(InMemoryIndex::new().with_max_batch(3));
        let client = client_with(index.clone());

        let stats = safe_upsert(&client, &records(10), None).await.unwrap();

        assert_eq!(stats.records_written, 10);
        assert!(stats.splits > 0);
        assert_eq!(stats.remote_calls, index.upsert_calls());
        assert_eq!(client.count(2).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn split_preserves_record_order() {
        let index = Arc::new(InMemoryIndex::new().with_max_batch(2));
        let client = client_with(index.clone());
        safe_upsert(&client, &records(7), None).await.unwrap();

        let page = client.get_page(2, 0, 100, false).await.unwrap();
        let ids: Vec<&str> = page.ids().collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4", "r5", "r6"]);
    }

    #[tokio::test]
    async fn single_oversized_record_fails() {
        let index = Arc::new(InMemoryIndex::new().with_max_batch(0));
        let client = client_with(index.clone());

        let err = safe_upsert(&client, &records(4), None).await.unwrap_err();
        assert!(matches!(err, VectorError::PayloadTooLarge { records: 1 }));
        assert_eq!(client.count(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client_with(index.clone());
        client.collection(2).await.unwrap();
        index.set_offline(true);

        let err = safe_upsert(&client, &records(8), None).await.unwrap_err();
        assert!(matches!(err, VectorError::RemoteUnavailable(_)));
        assert_eq!(index.upsert_calls(), 1);
    }

    #[tokio::test]
    async fn validation_happens_before_any_call() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client_with(index.clone());
        let mut batch = records(3);
        batch[1].embedding.push(0.0);

        let err = safe_upsert(&client, &batch, None).await.unwrap_err();
        assert!(matches!(err, VectorError::ShapeMismatch(_)));
        assert_eq!(index.upsert_calls(), 0);
    }
}
