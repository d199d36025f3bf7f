//! Encoder adapters that turn text into fixed-dimension embedding vectors.

use anyhow::{anyhow, Result};

pub mod hashing;
pub mod openai;

/// Text-to-vector adapter shared by the shard writer and the query engine.
///
/// Implementations must be deterministic for a fixed model and safe to call
/// from several threads at once; one instance is built per process and
/// injected wherever embeddings are needed.
pub trait Encoder: Send + Sync {
    /// Identifier of the underlying model, recorded in the index manifest.
    fn model_id(&self) -> &str;

    /// Embeds every input, returning one vector per input in input order.
    fn encode_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single text.
    fn encode(&self, input: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode_batch(&[input])?;
        anyhow::ensure!(
            vectors.len() == 1,
            "encoder returned {} vectors for a single input",
            vectors.len()
        );
        vectors
            .pop()
            .ok_or_else(|| anyhow!("encoder returned no embedding"))
    }
}
