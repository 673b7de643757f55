//! Collection export to JSONL

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::encode_line;
use crate::client::VectorStoreClient;
use crate::config::StoreConfig;
use crate::error::{VectorError, VectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Records requested per page
    pub batch_size: usize,
}

impl ExportOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            batch_size: config.export_batch,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub collection: String,
    pub records_written: usize,
    pub pages: usize,
    /// Stopped early on the cancellation token
    pub cancelled: bool,
}

/// Write every record of the `dimension` collection to `path` as JSONL.
///
/// Memory stays bounded to one page. The token is checked before `path` is
/// created and between pages; on cancellation the file holds whole lines
/// for the pages already read.
pub async fn export_collection(
    client: &VectorStoreClient,
    dimension: usize,
    path: impl AsRef<Path>,
    options: ExportOptions,
    cancel: &CancellationToken,
) -> VectorResult<ExportReport> {
    if options.batch_size == 0 {
        return Err(VectorError::Config("export batch size must be positive".to_string()));
    }

    let path = path.as_ref();
    if cancel.is_cancelled() {
        warn!(path = %path.display(), "Export cancelled before start, output left untouched");
        return Ok(ExportReport {
            collection: client.collection_name(dimension),
            records_written: 0,
            pages: 0,
            cancelled: true,
        });
    }

    let collection = client.collection(dimension).await?;
    let total = client.count(dimension).await?;
    info!(
        collection = %collection.name,
        total,
        path = %path.display(),
        "Starting export"
    );

    let mut out = BufWriter::new(File::create(path).await?);
    let mut report = ExportReport {
        collection: collection.name.clone(),
        records_written: 0,
        pages: 0,
        cancelled: false,
    };

    let mut offset = 0;
    while offset < total {
        if cancel.is_cancelled() {
            warn!(collection = %collection.name, offset, "Export cancelled");
            report.cancelled = true;
            break;
        }

        let page = client
            .get_page(dimension, offset, options.batch_size, true)
            .await?;
        if page.is_empty() {
            break;
        }

        for record in &page.records {
            out.write_all(encode_line(record)?.as_bytes()).await?;
        }
        out.flush().await?;

        offset += page.len();
        report.records_written += page.len();
        report.pages += 1;
        info!(
            collection = %collection.name,
            written = report.records_written,
            total,
            "Exported page"
        );

        if page.len() < options.batch_size && offset < total {
            warn!(
                collection = %collection.name,
                offset,
                total,
                "Short page before reaching count, collection shrank during export"
            );
            break;
        }
    }

    out.flush().await?;
    info!(
        collection = %collection.name,
        records = report.records_written,
        pages = report.pages,
        "Export finished"
    );
    Ok(report)
}
