//! JSONL import with an idempotency short-circuit

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{extract_id, next_line, parse_line, ParsedLine};
use crate::client::VectorStoreClient;
use crate::config::{IdempotencyMode, StoreConfig};
use crate::error::{VectorError, VectorResult};
use crate::types::Record;
use crate::writer::{safe_upsert, WriteStats};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportOptions {
    /// Records per upsert flush
    pub batch_size: usize,
    /// Run the sampling check before importing
    pub skip_if_present: bool,
    pub sample_size: usize,
    pub mode: IdempotencyMode,
}

impl ImportOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            batch_size: config.import_batch,
            skip_if_present: true,
            sample_size: config.sample_size,
            mode: config.idempotency_mode,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Always import, even if sampled IDs are already stored
    pub fn force(mut self) -> Self {
        self.skip_if_present = false;
        self
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportReport {
    pub collection: String,
    /// Records parsed from the file
    pub records_read: usize,
    /// Unparsable lines that were skipped
    pub skipped_lines: usize,
    pub batches: usize,
    pub write: WriteStats,
    /// The idempotency check found the data already present
    pub skipped_as_present: bool,
    /// Stopped early on the cancellation token
    pub cancelled: bool,
}

/// First `sample` record IDs in the file; unreadable lines are ignored
pub async fn sample_ids(path: impl AsRef<Path>, sample: usize) -> VectorResult<Vec<String>> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut buf = Vec::new();
    let mut ids = Vec::with_capacity(sample);

    while ids.len() < sample {
        let Some(line) = next_line(&mut reader, &mut buf).await? else {
            break;
        };
        let Ok(line) = line else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        let id = serde_json::from_str::<Value>(&line)
            .ok()
            .and_then(|value| value.get("id").and_then(extract_id));
        if let Some(id) = id {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Decide whether importing `path` into the `dimension` collection can be
/// skipped.
///
/// An empty collection is always imported. Otherwise the first `sample`
/// IDs of the file are looked up and `mode` decides. This is a heuristic:
/// a file whose leading records are stored but whose later ones are new is
/// still skipped. A `sample` of zero is rejected.
pub async fn should_skip_import(
    client: &VectorStoreClient,
    dimension: usize,
    path: impl AsRef<Path>,
    sample: usize,
    mode: IdempotencyMode,
) -> VectorResult<bool> {
    if sample == 0 {
        return Err(VectorError::Config("import sample size must be positive".to_string()));
    }

    let total = client.count(dimension).await?;
    if total == 0 {
        return Ok(false);
    }

    let ids = sample_ids(path, sample).await?;
    if ids.is_empty() {
        return Ok(true);
    }

    let fetched = client.get_by_ids(&ids, dimension, false).await?;
    let existing: HashSet<&str> = fetched.ids().collect();
    let present = ids
        .iter()
        .filter(|id| existing.contains(id.as_str()))
        .count();

    debug!(sampled = ids.len(), present, total, "Import idempotency check");
    Ok(mode.should_skip(present, ids.len()))
}

async fn flush(
    client: &VectorStoreClient,
    dimension: usize,
    batch: &mut Vec<Record>,
    report: &mut ImportReport,
) -> VectorResult<()> {
    let stats = safe_upsert(client, batch, Some(dimension)).await?;
    report.write.merge(stats);
    report.batches += 1;
    debug!(
        collection = %report.collection,
        records = batch.len(),
        total = report.write.records_written,
        "Imported batch"
    );
    batch.clear();
    Ok(())
}

/// Load a JSONL file into the `dimension` collection.
///
/// Blank lines are ignored and unparsable ones (bad JSON or bad UTF-8)
/// skipped with a warning; a
/// record without a usable `id` or `embedding` aborts the run, as does any
/// write failure. Batches already flushed stay written.
pub async fn import_collection(
    client: &VectorStoreClient,
    dimension: usize,
    path: impl AsRef<Path>,
    options: ImportOptions,
    cancel: &CancellationToken,
) -> VectorResult<ImportReport> {
    if options.batch_size == 0 {
        return Err(VectorError::Config("import batch size must be positive".to_string()));
    }
    if options.skip_if_present && options.sample_size == 0 {
        return Err(VectorError::Config("import sample size must be positive".to_string()));
    }

    let path = path.as_ref();
    let mut report = ImportReport {
        collection: client.collection_name(dimension),
        ..ImportReport::default()
    };

    if options.skip_if_present
        && should_skip_import(client, dimension, path, options.sample_size, options.mode).await?
    {
        info!(
            collection = %report.collection,
            path = %path.display(),
            "Import skipped, collection already holds this data"
        );
        report.skipped_as_present = true;
        return Ok(report);
    }

    info!(collection = %report.collection, path = %path.display(), "Starting import");

    let mut reader = BufReader::new(File::open(path).await?);
    let mut buf = Vec::new();
    let mut batch: Vec<Record> = Vec::with_capacity(options.batch_size);
    let mut line_no = 0;

    while let Some(line) = next_line(&mut reader, &mut buf).await? {
        line_no += 1;
        let parsed = match line {
            Ok(text) => parse_line(&text, line_no)?,
            Err(reason) => ParsedLine::Unparsable(reason),
        };
        match parsed {
            ParsedLine::Blank => continue,
            ParsedLine::Unparsable(reason) => {
                warn!(line = line_no, error = %reason, "Skipping unparsable line");
                report.skipped_lines += 1;
                continue;
            }
            ParsedLine::Record(record) => {
                report.records_read += 1;
                batch.push(record);
            }
        }

        if batch.len() >= options.batch_size {
            flush(client, dimension, &mut batch, &mut report).await?;
            if cancel.is_cancelled() {
                warn!(collection = %report.collection, line = line_no, "Import cancelled");
                report.cancelled = true;
                break;
            }
        }
    }

    if !report.cancelled && !batch.is_empty() {
        flush(client, dimension, &mut batch, &mut report).await?;
    }

    info!(
        collection = %report.collection,
        read = report.records_read,
        written = report.write.records_written,
        skipped = report.skipped_lines,
        "Import finished"
    );
    Ok(report)
}
