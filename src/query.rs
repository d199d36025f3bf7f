//! Exhaustive cosine-similarity query engine over the loaded corpus.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::document::MetadataRecord;
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::loader::Corpus;

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// Metadata of the matching row.
    pub metadata: MetadataRecord,
}

/// Scores every corpus row against an encoded query.
///
/// The engine holds only shared, immutable state, so any number of threads
/// may call [`QueryEngine::search`] at once.
#[derive(Clone)]
pub struct QueryEngine {
    corpus: Arc<Corpus>,
    encoder: Arc<dyn Encoder>,
}

impl QueryEngine {
    /// Wraps the loaded corpus and the process-wide encoder.
    pub fn new(corpus: Arc<Corpus>, encoder: Arc<dyn Encoder>) -> Self {
        Self { corpus, encoder }
    }

    /// Corpus being searched.
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Encoder used for queries.
    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    /// Encodes `query_text` and returns the `min(top_k, N)` most similar rows.
    pub fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<QueryResult>> {
        check_top_k(top_k)?;
        if self.corpus.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.encoder.encode(query_text).map_err(Error::encoding)?;
        self.search_vector(&query, top_k)
    }

    /// Ranks the corpus against an already-encoded query vector.
    ///
    /// Results are sorted by descending score; equal scores keep corpus
    /// order, so the row ingested first ranks first.
    pub fn search_vector(&self, query: &[f32], top_k: usize) -> Result<Vec<QueryResult>> {
        check_top_k(top_k)?;
        let corpus = self.corpus.as_ref();
        if corpus.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != corpus.dimensions() {
            return Err(Error::Encoding(format!(
                "query has {} dimensions but the corpus has {}",
                query.len(),
                corpus.dimensions()
            )));
        }
        if let Some(pos) = query.iter().position(|value| !value.is_finite()) {
            return Err(Error::Encoding(format!(
                "query component {pos} is not finite ({})",
                query[pos]
            )));
        }

        let start = Instant::now();
        let query_norm = norm(query);
        let scores: Vec<f32> = corpus
            .vectors()
            .par_chunks_exact(corpus.dimensions())
            .zip(corpus.norms().par_iter())
            .map(|(row, &row_norm)| cosine(query, query_norm, row, row_norm))
            .collect();

        let ranked = top_k_indices(&scores, top_k);
        debug!(
            rows = corpus.len(),
            returned = ranked.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "scored corpus"
        );
        Ok(ranked
            .into_iter()
            .map(|idx| QueryResult {
                score: scores[idx],
                metadata: corpus.records()[idx].clone(),
            })
            .collect())
    }
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::InvalidArgument("top_k must be positive".to_string()));
    }
    Ok(())
}

fn norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity; 0 when either side has zero norm.
fn cosine(query: &[f32], query_norm: f64, row: &[f32], row_norm: f64) -> f32 {
    if query_norm == 0.0 || row_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = query
        .iter()
        .zip(row)
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    (dot / (query_norm * row_norm)).clamp(-1.0, 1.0) as f32
}

/// Higher score first, then lower corpus index.
fn rank_order(scores: &[f32], a: usize, b: usize) -> Ordering {
    scores[b].total_cmp(&scores[a]).then_with(|| a.cmp(&b))
}

/// Indices of the `min(k, len)` best scores in rank order.
fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    let k = k.min(indices.len());
    if k == 0 {
        return Vec::new();
    }
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| rank_order(scores, a, b));
        indices.truncate(k);
    }
    indices.sort_unstable_by(|&a, &b| rank_order(scores, a, b));
    indices
}
