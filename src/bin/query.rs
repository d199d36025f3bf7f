use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shardsearch::{load_index, EncoderArgs, QueryEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shardsearch-query",
    about = "Runs a single similarity query against a sharded index"
)]
struct QueryCli {
    /// Query text to encode and rank against the index
    #[arg(long)]
    query: String,

    /// Directory holding the shard files
    #[arg(long, env = "SHARDSEARCH_INDEX_DIR", default_value = "index")]
    index_dir: PathBuf,

    /// Number of results to print
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Print results as JSON instead of a table
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    encoder: EncoderArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = QueryCli::parse();
    let encoder = cli.encoder.build().context("failed to build encoder")?;
    let corpus = load_index(&cli.index_dir)
        .with_context(|| format!("failed to load index from {:?}", cli.index_dir))?;
    let engine = QueryEngine::new(Arc::new(corpus), encoder);
    let results = engine
        .search(&cli.query, cli.top_k)
        .with_context(|| format!("query {:?} failed", cli.query))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>3}. {:.4}  {}",
            rank + 1,
            result.score,
            result.metadata.indexed_field_value
        );
    }
    Ok(())
}
