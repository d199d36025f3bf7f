use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use shardsearch::config::{DEFAULT_INDEXED_FIELD, DEFAULT_SHARD_SIZE};
use shardsearch::{load_documents, EncoderArgs, IndexConfig, ShardWriter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shardsearch-indexer",
    about = "Embeds a JSONL document file and writes a sharded index"
)]
struct IndexCli {
    /// JSONL file with one document object per line
    #[arg(long, env = "SHARDSEARCH_INPUT", default_value = "documents.jsonl")]
    input: PathBuf,

    /// Directory receiving embeddings_{k}.bin / metadata_{k}.json shards
    #[arg(long, env = "SHARDSEARCH_INDEX_DIR", default_value = "index")]
    index_dir: PathBuf,

    /// Document field whose text is embedded
    #[arg(long, env = "SHARDSEARCH_INDEXED_FIELD", default_value = DEFAULT_INDEXED_FIELD)]
    indexed_field: String,

    /// Maximum documents per shard
    #[arg(long, env = "SHARDSEARCH_SHARD_SIZE", default_value_t = DEFAULT_SHARD_SIZE)]
    shard_size: usize,

    /// Texts handed to the encoder per batch
    #[arg(long, env = "SHARDSEARCH_ENCODE_BATCH", default_value_t = 32)]
    encode_batch: usize,

    /// Number of concurrent encoding workers
    #[arg(long, env = "SHARDSEARCH_ENCODE_WORKERS", default_value_t = 1)]
    encode_workers: usize,

    #[command(flatten)]
    encoder: EncoderArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = IndexCli::parse();
    let encoder = cli.encoder.build().context("failed to build encoder")?;
    let documents = load_documents(&cli.input)?;
    info!(
        input = %cli.input.display(),
        documents = documents.len(),
        model = encoder.model_id(),
        "documents loaded"
    );

    let config = IndexConfig::new(cli.indexed_field, cli.shard_size, cli.index_dir.clone())
        .with_encoding(cli.encode_batch, cli.encode_workers);
    let writer = ShardWriter::new(config, encoder)?;
    let start = Instant::now();
    let report = writer
        .write(documents)
        .with_context(|| format!("failed to build index in {:?}", cli.index_dir))?;

    println!(
        "indexed {} of {} documents ({} skipped) into {} shard(s), dim {}, in {:.1}s -> {}",
        report.indexed,
        report.total_documents,
        report.skipped,
        report.shards,
        report.dimensions,
        start.elapsed().as_secs_f64(),
        cli.index_dir.display()
    );
    Ok(())
}
