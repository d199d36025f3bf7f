//! Explicit configuration values handed to the writer and the encoder adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use crate::encoder::hashing::HashingEncoder;
use crate::encoder::openai::OpenAiEncoder;
use crate::encoder::Encoder;

/// Field embedded when no other field is configured.
pub const DEFAULT_INDEXED_FIELD: &str = "title";
/// Documents stored per shard unless overridden.
pub const DEFAULT_SHARD_SIZE: usize = 25_000;
/// Texts sent to the encoder per batch unless overridden.
pub const DEFAULT_ENCODE_BATCH: usize = 32;

/// Settings that drive a single index build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexConfig {
    indexed_field: String,
    shard_size: usize,
    output_dir: PathBuf,
    encode_batch_size: usize,
    encode_workers: usize,
}

impl IndexConfig {
    /// Constructs a build configuration with default encoding parallelism.
    pub fn new(
        indexed_field: impl Into<String>,
        shard_size: usize,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            indexed_field: indexed_field.into(),
            shard_size,
            output_dir: output_dir.into(),
            encode_batch_size: DEFAULT_ENCODE_BATCH,
            encode_workers: 1,
        }
    }

    /// Overrides the encoder batch size and worker count (both floored at 1).
    pub fn with_encoding(mut self, batch_size: usize, workers: usize) -> Self {
        self.encode_batch_size = batch_size.max(1);
        self.encode_workers = workers.max(1);
        self
    }

    /// Field whose text is embedded.
    pub fn indexed_field(&self) -> &str {
        &self.indexed_field
    }

    /// Maximum documents per shard.
    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Directory receiving the shard files.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Texts per encoder call.
    pub fn encode_batch_size(&self) -> usize {
        self.encode_batch_size
    }

    /// Threads issuing encoder calls concurrently.
    pub fn encode_workers(&self) -> usize {
        self.encode_workers
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INDEXED_FIELD, DEFAULT_SHARD_SIZE, "index")
    }
}

/// Encoder backends selectable from the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EncoderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Local deterministic feature-hashing encoder.
    Hashing,
}

/// Encoder flags shared by every binary that builds or queries an index.
#[derive(Args, Debug, Clone)]
pub struct EncoderArgs {
    /// Encoder backend used for documents and queries
    #[arg(long, env = "SHARDSEARCH_ENCODER", value_enum, default_value = "openai")]
    pub encoder: EncoderKind,

    /// Vector dimension (required for hashing, optional override for OpenAI)
    #[arg(long, env = "SHARDSEARCH_DIMENSIONS")]
    pub dimensions: Option<usize>,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    /// Embedding model identifier (e.g. text-embedding-3-small)
    #[arg(
        long,
        env = "SHARDSEARCH_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub openai_model: String,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "SHARDSEARCH_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Max inputs per embedding request
    #[arg(long, env = "SHARDSEARCH_OPENAI_BATCH", default_value_t = 32)]
    pub openai_batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "SHARDSEARCH_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    pub openai_timeout_secs: u64,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "SHARDSEARCH_OPENAI_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,
}

impl EncoderArgs {
    /// Builds the configured encoder once; callers share the returned handle.
    pub fn build(&self) -> Result<Arc<dyn Encoder>> {
        match self.encoder {
            EncoderKind::Openai => {
                let api_key = self
                    .openai_api_key
                    .clone()
                    .context("OPENAI_API_KEY must be set for the openai encoder")?;
                let encoder = OpenAiEncoder::new(
                    api_key,
                    self.openai_base_url.clone(),
                    self.openai_model.clone(),
                    self.dimensions,
                    Duration::from_secs(self.openai_timeout_secs.max(1)),
                    self.max_retries.max(1),
                    self.openai_batch_size.max(1),
                )?;
                Ok(Arc::new(encoder))
            }
            EncoderKind::Hashing => {
                let dimensions = self
                    .dimensions
                    .context("--dimensions is required for the hashing encoder")?;
                Ok(Arc::new(HashingEncoder::new(dimensions)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        encoder: EncoderArgs,
    }

    #[test]
    fn encoding_overrides_are_floored() {
        let config = IndexConfig::new("name", 10, "out").with_encoding(0, 0);
        assert_eq!(config.encode_batch_size(), 1);
        assert_eq!(config.encode_workers(), 1);
        assert_eq!(config.indexed_field(), "name");
        assert_eq!(config.output_dir(), Path::new("out"));
    }

    #[test]
    fn hashing_encoder_requires_dimensions() {
        let harness = Harness::parse_from(["test", "--encoder", "hashing"]);
        assert!(harness.encoder.build().is_err());

        let harness = Harness::parse_from(["test", "--encoder", "hashing", "--dimensions", "16"]);
        let encoder = harness.encoder.build().expect("hashing encoder");
        assert_eq!(encoder.encode("hello").expect("encode").len(), 16);
    }
}
