use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use talent_vector::pipeline::{export_collection, import_collection, ExportOptions, ImportOptions};
use talent_vector::types::Embedding;
use talent_vector::{
    IdempotencyMode, QueryMatch, QueryRequest, StoreConfig, VectorError, VectorStoreClient,
};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "talent",
    version,
    about = "Talent vector store operator tool",
    long_about = "Operator tool for the candidate vector store: bulk JSONL export and import, \
                  similarity queries and collection administration"
)]
pub struct Cli {
    #[arg(long, global = true, env = "CHROMA_URL", help = "Vector index base URL")]
    pub url: Option<String>,
    #[arg(
        long,
        global = true,
        env = "CHROMA_COLLECTION_PREFIX",
        help = "Collection name prefix"
    )]
    pub prefix: Option<String>,
    #[arg(
        long,
        global = true,
        env = "CHROMA_AUTH_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the index"
    )]
    pub auth_token: Option<String>,
    #[arg(
        long,
        global = true,
        env = "TALENT_REQUEST_TIMEOUT_SECS",
        help = "Per-request timeout in seconds"
    )]
    pub timeout_secs: Option<u64>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Export a dimension's collection to a JSONL file")]
    Export {
        #[arg(help = "Output JSONL path")]
        output: PathBuf,
        #[arg(long, help = "Embedding dimension, defaults to TALENT_DEFAULT_DIM")]
        dim: Option<usize>,
        #[arg(long, help = "Records per page")]
        batch: Option<usize>,
    },
    #[command(about = "Import a JSONL file into a dimension's collection")]
    Import {
        #[arg(help = "Input JSONL path")]
        input: PathBuf,
        #[arg(long, help = "Embedding dimension, defaults to TALENT_DEFAULT_DIM")]
        dim: Option<usize>,
        #[arg(long, help = "Records per upsert")]
        batch: Option<usize>,
        #[arg(long, help = "Import even when sampled IDs are already stored")]
        force: bool,
        #[arg(long, help = "Number of leading IDs sampled by the idempotency check")]
        sample: Option<usize>,
        #[arg(
            long,
            value_parser = parse_mode,
            help = "Idempotency mode: all, ratio or ratio:<0.0-1.0>"
        )]
        mode: Option<IdempotencyMode>,
    },
    #[command(about = "List dimensions that have a collection")]
    Dims,
    #[command(about = "Show every collection with its size and metadata")]
    Info,
    #[command(about = "Find the nearest records to an embedding")]
    Query {
        #[arg(
            long,
            allow_hyphen_values = true,
            required_unless_present = "file",
            conflicts_with = "file",
            help = "Comma separated embedding, e.g. 0.1,-0.2,0.3"
        )]
        vector: Option<String>,
        #[arg(long, help = "JSON file holding one embedding array")]
        file: Option<PathBuf>,
        #[arg(long, help = "Expected dimension of the embedding")]
        dim: Option<usize>,
        #[arg(long, default_value_t = 5, help = "Number of neighbors")]
        top_k: usize,
    },
    #[command(about = "Delete collections")]
    Drop {
        #[arg(
            long,
            conflicts_with = "all",
            help = "Only drop collections whose name starts with this"
        )]
        matching: Option<String>,
        #[arg(long, help = "Drop every collection on the server")]
        all: bool,
        #[arg(long, help = "Confirm the deletion")]
        yes: bool,
    },
    #[command(about = "Remove every record from a dimension's collection")]
    Clear {
        #[arg(long, help = "Embedding dimension, defaults to TALENT_DEFAULT_DIM")]
        dim: Option<usize>,
        #[arg(long, help = "Confirm the deletion")]
        yes: bool,
    },
    #[command(about = "Delete records by ID")]
    Delete {
        #[arg(required = true, num_args = 1.., help = "Record IDs")]
        ids: Vec<String>,
        #[arg(long, help = "Embedding dimension, defaults to TALENT_DEFAULT_DIM")]
        dim: Option<usize>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Store(#[from] VectorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_mode(value: &str) -> Result<IdempotencyMode, String> {
    value.parse().map_err(|err: VectorError| err.to_string())
}

impl Cli {
    /// Apply the global flags on top of `base`
    pub fn apply(&self, base: StoreConfig) -> Result<StoreConfig, CliError> {
        let mut config = base;
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(prefix) = &self.prefix {
            config = config.with_prefix(prefix.as_str());
        }
        if let Some(token) = &self.auth_token {
            config = config.with_auth_token(token.as_str());
        }
        if let Some(timeout) = self.timeout_secs {
            config = config.with_timeout(timeout);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parse a comma separated embedding
pub fn parse_vector(raw: &str) -> Result<Embedding, CliError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>()
                .map_err(|_| CliError::InvalidArgument(format!("invalid embedding value '{part}'")))
        })
        .collect()
}

/// Read a query embedding from JSON: either `[..]` or a single-row `[[..]]`
pub async fn read_query_file(path: &Path) -> Result<QueryRequest, CliError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|err| CliError::InvalidArgument(format!("{}: {err}", path.display())))?;

    let nested = value
        .as_array()
        .and_then(|rows| rows.first())
        .is_some_and(Value::is_array);
    let invalid = |err: serde_json::Error| {
        CliError::InvalidArgument(format!("{}: expected an embedding array: {err}", path.display()))
    };

    if nested {
        let rows: Vec<Embedding> = serde_json::from_value(value).map_err(invalid)?;
        Ok(QueryRequest::from_batch(rows)?)
    } else {
        let embedding: Embedding = serde_json::from_value(value).map_err(invalid)?;
        Ok(QueryRequest::new(embedding))
    }
}

pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<String, CliError> {
    let config = cli.apply(StoreConfig::from_env()?)?;
    let client = VectorStoreClient::connect(config)?;
    execute(&client, cli.command, &cancel).await
}

/// Run one command against an existing client
pub async fn execute(
    client: &VectorStoreClient,
    command: Commands,
    cancel: &CancellationToken,
) -> Result<String, CliError> {
    let default_dim = client.config().default_dimension;

    match command {
        Commands::Export { output, dim, batch } => {
            let dim = dim.unwrap_or(default_dim);
            let mut options = ExportOptions::from_config(client.config());
            if let Some(batch) = batch {
                options = options.with_batch_size(batch);
            }
            let report = export_collection(client, dim, &output, options, cancel).await?;
            let mut out = format!(
                "exported {} records from {} to {} ({} pages)",
                report.records_written,
                report.collection,
                output.display(),
                report.pages
            );
            if report.cancelled {
                out.push_str(", cancelled before completion");
            }
            Ok(out)
        }
        Commands::Import {
            input,
            dim,
            batch,
            force,
            sample,
            mode,
        } => {
            let dim = dim.unwrap_or(default_dim);
            let mut options = ImportOptions::from_config(client.config());
            if let Some(batch) = batch {
                options = options.with_batch_size(batch);
            }
            if let Some(sample) = sample {
                if sample == 0 {
                    return Err(CliError::InvalidArgument(
                        "--sample must be positive".to_string(),
                    ));
                }
                options.sample_size = sample;
            }
            if let Some(mode) = mode {
                options.mode = mode;
            }
            if force {
                options = options.force();
            }

            let report = import_collection(client, dim, &input, options, cancel).await?;
            if report.skipped_as_present {
                return Ok(format!(
                    "import skipped: {} already holds the records sampled from {}",
                    report.collection,
                    input.display()
                ));
            }
            let mut out = format!(
                "imported {} records into {} ({} batches, {} splits, {} skipped lines)",
                report.write.records_written,
                report.collection,
                report.batches,
                report.write.splits,
                report.skipped_lines
            );
            if report.cancelled {
                out.push_str(", cancelled before completion");
            }
            Ok(out)
        }
        Commands::Dims => {
            let dims = client.list_dimensions_available().await?;
            if dims.is_empty() {
                return Ok("no dimension collections found".to_string());
            }
            Ok(dims
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Commands::Info => {
            let summaries = client.describe_collections().await?;
            if summaries.is_empty() {
                return Ok("no collections found".to_string());
            }
            let mut out = String::new();
            for summary in summaries {
                let _ = writeln!(out, "{} ({} records)", summary.name, summary.count);
                for (key, value) in &summary.metadata {
                    let _ = writeln!(out, "  {key}: {value}");
                }
            }
            Ok(out.trim_end().to_string())
        }
        Commands::Query {
            vector,
            file,
            dim,
            top_k,
        } => {
            let mut request = match (vector, file) {
                (Some(raw), _) => QueryRequest::new(parse_vector(&raw)?),
                (None, Some(path)) => read_query_file(&path).await?,
                (None, None) => {
                    return Err(CliError::InvalidArgument(
                        "either --vector or --file is required".to_string(),
                    ))
                }
            };
            request = request.with_top_k(top_k);
            if let Some(dim) = dim {
                request = request.with_dimension(dim);
            }
            let matches = client.query_similar(request).await?;
            Ok(format_matches(&matches))
        }
        Commands::Drop { matching, all, yes } => {
            if !yes {
                return Err(CliError::InvalidArgument(
                    "dropping collections cannot be undone, pass --yes to confirm".to_string(),
                ));
            }
            let scope = if all {
                None
            } else {
                Some(matching.unwrap_or_else(|| format!("{}_dim", client.registry().prefix())))
            };
            info!(scope = ?scope, "Dropping collections");
            let dropped = client.drop_collections(scope.as_deref()).await?;
            if dropped.is_empty() {
                return Ok("no collections dropped".to_string());
            }
            let mut out = format!("dropped {} collections:", dropped.len());
            for name in dropped {
                let _ = write!(out, "\n- {name}");
            }
            Ok(out)
        }
        Commands::Clear { dim, yes } => {
            let dim = dim.unwrap_or(default_dim);
            if !yes {
                return Err(CliError::InvalidArgument(
                    "clearing a collection cannot be undone, pass --yes to confirm".to_string(),
                ));
            }
            client.clear_collection(dim).await?;
            Ok(format!("cleared {}", client.collection_name(dim)))
        }
        Commands::Delete { ids, dim } => {
            let dim = dim.unwrap_or(default_dim);
            client.delete_by_ids(&ids, dim).await?;
            Ok(format!(
                "deleted {} ids from {}",
                ids.len(),
                client.collection_name(dim)
            ))
        }
    }
}

fn format_matches(matches: &[QueryMatch]) -> String {
    if matches.is_empty() {
        return "No matches found.".to_string();
    }
    let mut out = String::new();
    for (i, m) in matches.iter().enumerate() {
        let _ = write!(out, "{}. {} [similarity: {:.4}]", i + 1, m.id, m.similarity);
        if let Some(metadata) = m.metadata.as_ref().filter(|md| !md.is_empty()) {
            let _ = write!(out, " {}", Value::Object(metadata.clone()));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::{execute, parse_vector, Cli, CliError, Commands};
    use clap::Parser;
    use std::sync::Arc;
    use talent_vector::{IdempotencyMode, InMemoryIndex, Record, StoreConfig, VectorStoreClient};
    use tokio_util::sync::CancellationToken;

    fn memory_client() -> (VectorStoreClient, Arc<InMemoryIndex>) {
        let index = Arc::new(InMemoryIndex::new());
        let config = StoreConfig::default().with_prefix("test");
        (VectorStoreClient::new(index.clone(), config), index)
    }

    async fn run_command(client: &VectorStoreClient, args: &[&str]) -> Result<String, CliError> {
        let mut argv = vec!["talent"];
        argv.extend_from_slice(args);
        let cli = Cli::parse_from(argv);
        execute(client, cli.command, &CancellationToken::new()).await
    }

    #[test]
    fn cli_parses_import_command() {
        let cli = Cli::parse_from([
            "talent", "import", "dump.jsonl", "--dim", "384", "--batch", "50", "--mode",
            "ratio:0.5", "--force",
        ]);
        match cli.command {
            Commands::Import {
                input,
                dim,
                batch,
                force,
                sample,
                mode,
            } => {
                assert_eq!(input.to_str(), Some("dump.jsonl"));
                assert_eq!(dim, Some(384));
                assert_eq!(batch, Some(50));
                assert!(force);
                assert_eq!(sample, None);
                assert_eq!(mode, Some(IdempotencyMode::Ratio(0.5)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_unknown_mode() {
        let result = Cli::try_parse_from(["talent", "import", "x.jsonl", "--mode", "maybe"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_query_requires_an_embedding_source() {
        assert!(Cli::try_parse_from(["talent", "query"]).is_err());
        let cli = Cli::parse_from(["talent", "query", "--vector", "-0.5,1", "--top-k", "3"]);
        match cli.command {
            Commands::Query { vector, top_k, .. } => {
                assert_eq!(vector.as_deref(), Some("-0.5,1"));
                assert_eq!(top_k, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::parse_from([
            "talent",
            "--url",
            "http://chroma:9000",
            "--prefix",
            "people",
            "--timeout-secs",
            "5",
            "dims",
        ]);
        let config = cli.apply(StoreConfig::default()).unwrap();
        assert_eq!(config.url, "http://chroma:9000");
        assert_eq!(config.collection_prefix, "people");
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn zero_timeout_flag_is_rejected() {
        let cli = Cli::parse_from(["talent", "--timeout-secs", "0", "dims"]);
        assert!(matches!(
            cli.apply(StoreConfig::default()),
            Err(CliError::Store(_))
        ));
    }

    #[test]
    fn parse_vector_reads_comma_separated_floats() {
        assert_eq!(parse_vector("1, 0.5 ,-2").unwrap(), vec![1.0, 0.5, -2.0]);
        assert!(matches!(
            parse_vector("1,abc"),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn import_then_query_through_commands() {
        let (client, _) = memory_client();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("abc.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"{"id": "a", "embedding": [1, 0, 0], "metadata": {"candidate_id": "a"}}"#,
                "\n",
                r#"{"id": "b", "embedding": [0, 1, 0], "metadata": {"candidate_id": "b"}}"#,
                "\n",
                r#"{"id": "c", "embedding": [0, 0, 1], "metadata": {"candidate_id": "c"}}"#,
                "\n",
            ),
        )
        .unwrap();
        let input = input.to_str().unwrap();

        let out = run_command(&client, &["import", input, "--dim", "3"])
            .await
            .unwrap();
        assert!(out.starts_with("imported 3 records into test_dim3"), "{out}");

        let again = run_command(&client, &["import", input, "--dim", "3"])
            .await
            .unwrap();
        assert!(again.starts_with("import skipped"), "{again}");

        let out = run_command(&client, &["query", "--vector", "1,0,0", "--top-k", "2"])
            .await
            .unwrap();
        let first = out.lines().next().unwrap();
        assert!(first.starts_with("1. a [similarity: 1.0000]"), "{out}");
        assert_eq!(out.lines().count(), 2);
    }

    #[tokio::test]
    async fn export_writes_jsonl_file() {
        let (client, _) = memory_client();
        client
            .upsert(
                &[Record::new("x", vec![1.0, 2.0]), Record::new("y", vec![2.0, 1.0])],
                None,
            )
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");

        let out = run_command(
            &client,
            &["export", output.to_str().unwrap(), "--dim", "2", "--batch", "1"],
        )
        .await
        .unwrap();
        assert!(out.starts_with("exported 2 records from test_dim2"), "{out}");
        assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn dims_and_drop_commands() {
        let (client, index) = memory_client();
        client.upsert(&[Record::new("a", vec![1.0, 0.0])], None).await.unwrap();
        client.upsert(&[Record::new("b", vec![1.0, 0.0, 0.0])], None).await.unwrap();

        let dims = run_command(&client, &["dims"]).await.unwrap();
        assert_eq!(dims, "2\n3");

        let refused = run_command(&client, &["drop"]).await.unwrap_err();
        assert!(matches!(refused, CliError::InvalidArgument(_)));

        let out = run_command(&client, &["drop", "--yes"]).await.unwrap();
        assert!(out.starts_with("dropped 2 collections"), "{out}");
        assert!(index.collection_names().await.is_empty());
        assert_eq!(
            run_command(&client, &["dims"]).await.unwrap(),
            "no dimension collections found"
        );
    }

    #[tokio::test]
    async fn delete_and_clear_commands() {
        let (client, _) = memory_client();
        client
            .upsert(
                &[
                    Record::new("a", vec![1.0, 0.0]),
                    Record::new("b", vec![0.0, 1.0]),
                    Record::new("c", vec![1.0, 1.0]),
                ],
                None,
            )
            .await
            .unwrap();

        let out = run_command(&client, &["delete", "a", "b", "--dim", "2"])
            .await
            .unwrap();
        assert_eq!(out, "deleted 2 ids from test_dim2");
        assert_eq!(client.count(2).await.unwrap(), 1);

        run_command(&client, &["clear", "--dim", "2", "--yes"])
            .await
            .unwrap();
        assert_eq!(client.count(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn info_lists_collection_metadata() {
        let (client, _) = memory_client();
        client.upsert(&[Record::new("a", vec![1.0, 0.0])], None).await.unwrap();

        let out = run_command(&client, &["info"]).await.unwrap();
        assert!(out.starts_with("test_dim2 (1 records)"), "{out}");
        assert!(out.contains("dimension: 2"), "{out}");
    }
}
