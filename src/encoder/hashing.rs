//! Deterministic feature-hashing encoder for offline builds and tests.
//!
//! Each lowercase alphanumeric token is hashed twice: one seed picks the
//! bucket, the other picks the sign. Bucket counts are L2-normalised, so two
//! texts with the same token multiset always embed to the same unit vector and
//! a text without tokens embeds to the zero vector.

use anyhow::Result;

use super::Encoder;

/// Feature-hashing encoder producing `dimensions`-wide unit vectors.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimensions: usize,
    model_id: String,
}

impl HashingEncoder {
    /// Builds an encoder emitting vectors of the given width.
    pub fn new(dimensions: usize) -> Result<Self> {
        anyhow::ensure!(dimensions > 0, "hashing encoder needs at least one dimension");
        Ok(Self {
            dimensions,
            model_id: format!("feature-hashing-{dimensions}"),
        })
    }

    /// Output width.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for token in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|tok| !tok.is_empty())
        {
            let token = token.to_lowercase();
            let bytes = token.as_bytes();
            let bucket = (token_hash(bytes, BUCKET_SEED) as usize) % self.dimensions;
            let sign = if token_hash(bytes, SIGN_SEED) & 1 == 0 {
                1.0
            } else {
                -1.0
            };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Encoder for HashingEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.embed(text)).collect())
    }
}

const BUCKET_SEED: u64 = 0x517c_c1b7_2722_0a95;
const SIGN_SEED: u64 = 0x6d0f_27bd_ceb7_b067;

fn token_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ data.len() as u64;
    for &byte in data {
        hash ^= (byte as u64).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    hash ^ (hash >> 33)
}
