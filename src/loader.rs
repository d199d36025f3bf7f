//! Index loader: materialises every shard into one immutable in-memory corpus.

use std::path::Path;

use tracing::{debug, info};

use crate::document::MetadataRecord;
use crate::error::{Error, Result};
use crate::manifest::{file_crc32, IndexManifest};
use crate::shard::{check_shard_numbers, read_embeddings, read_metadata, scan_shards, ShardListing};

/// Shard-ordered concatenation of every embedding and metadata record.
///
/// Row `i` of the matrix belongs to `records()[i]`. The corpus never changes
/// after construction; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    dimensions: usize,
    vectors: Vec<f32>,
    norms: Vec<f64>,
    records: Vec<MetadataRecord>,
}

impl Corpus {
    /// A corpus with no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a corpus from per-row vectors and their metadata records.
    pub fn from_rows(rows: Vec<Vec<f32>>, records: Vec<MetadataRecord>) -> Result<Self> {
        let dimensions = rows.first().map(Vec::len).unwrap_or_default();
        if let Some(idx) = rows.iter().position(|row| row.len() != dimensions) {
            return Err(Error::Validation(format!(
                "row {idx} has {} values, expected {dimensions}",
                rows[idx].len()
            )));
        }
        Self::from_parts(dimensions, rows.concat(), records)
    }

    fn from_parts(dimensions: usize, vectors: Vec<f32>, records: Vec<MetadataRecord>) -> Result<Self> {
        let rows = if dimensions == 0 {
            0
        } else {
            vectors.len() / dimensions
        };
        if rows != records.len() || rows * dimensions != vectors.len() {
            return Err(Error::Validation(format!(
                "corpus has {rows} vectors but {} metadata records",
                records.len()
            )));
        }
        if let Some(pos) = vectors.iter().position(|value| !value.is_finite()) {
            return Err(Error::Validation(format!(
                "corpus row {} contains a non-finite value",
                pos / dimensions
            )));
        }
        let norms = if dimensions == 0 {
            Vec::new()
        } else {
            vectors
                .chunks_exact(dimensions)
                .map(|row| row.iter().map(|&v| f64::from(v) * f64::from(v)).sum::<f64>().sqrt())
                .collect()
        };
        Ok(Self {
            dimensions: if rows == 0 { 0 } else { dimensions },
            vectors,
            norms,
            records,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the corpus holds no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding width (0 for an empty corpus).
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embedding of row `index`, or `None` past the last row.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.dimensions;
        self.vectors.get(start..start + self.dimensions)
    }

    /// Row-major embedding matrix.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Euclidean norm of every row, precomputed at load time.
    pub fn norms(&self) -> &[f64] {
        &self.norms
    }

    /// Metadata records in corpus order.
    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }
}

/// Loads every shard of the index in `dir` into a [`Corpus`].
///
/// Fails with a validation error when the vector and metadata shard numbers
/// differ, are duplicated, or are not contiguous from 1; when a manifest is
/// present and a file checksum disagrees with it; or when a shard's rows and
/// records, or the shards' dimensions, disagree.
pub fn load_index(dir: &Path) -> Result<Corpus> {
    let listing = scan_shards(dir)?;
    check_shard_numbers(&listing)?;
    let manifest = IndexManifest::load(dir)?;
    if let Some(manifest) = &manifest {
        verify_manifest(manifest, &listing)?;
    }

    let mut dimensions = 0usize;
    let mut vectors = Vec::new();
    let mut records = Vec::new();
    for (vector_file, metadata_file) in listing.embeddings.iter().zip(listing.metadata.iter()) {
        let shard = vector_file.number;
        let matrix = read_embeddings(&vector_file.path)?;
        let shard_records = read_metadata(&metadata_file.path)?;
        if matrix.rows() != shard_records.len() {
            return Err(Error::Validation(format!(
                "shard {shard}: vector file has {} rows but metadata file has {} records",
                matrix.rows(),
                shard_records.len()
            )));
        }
        if matrix.rows() > 0 {
            if dimensions == 0 {
                dimensions = matrix.dimensions;
            } else if matrix.dimensions != dimensions {
                return Err(Error::Validation(format!(
                    "shard {shard} has {} dimensions but earlier shards have {dimensions}",
                    matrix.dimensions
                )));
            }
        }
        debug!(shard, rows = matrix.rows(), "loaded shard");
        vectors.extend(matrix.data);
        records.extend(shard_records);
    }

    if let Some(manifest) = &manifest {
        if !records.is_empty() && manifest.dimensions != dimensions {
            return Err(Error::Validation(format!(
                "manifest declares {} dimensions but shards have {dimensions}",
                manifest.dimensions
            )));
        }
    }

    let corpus = Corpus::from_parts(dimensions, vectors, records)?;
    info!(
        shards = listing.embeddings.len(),
        rows = corpus.len(),
        dimensions = corpus.dimensions(),
        "index loaded from {:?}",
        dir
    );
    Ok(corpus)
}

fn verify_manifest(manifest: &IndexManifest, listing: &ShardListing) -> Result<()> {
    let declared: Vec<u32> = manifest.shards.iter().map(|entry| entry.shard).collect();
    let found = listing.embedding_numbers();
    if declared != found {
        return Err(Error::Validation(format!(
            "manifest lists shards {:?} but the directory holds {:?}",
            declared, found
        )));
    }
    let files = listing.embeddings.iter().zip(listing.metadata.iter());
    for (entry, (vector_file, metadata_file)) in manifest.shards.iter().zip(files) {
        if file_crc32(&vector_file.path)? != entry.embeddings_crc32 {
            return Err(Error::Validation(format!(
                "shard {}: vector file checksum does not match the manifest",
                entry.shard
            )));
        }
        if file_crc32(&metadata_file.path)? != entry.metadata_crc32 {
            return Err(Error::Validation(format!(
                "shard {}: metadata file checksum does not match the manifest",
                entry.shard
            )));
        }
    }
    Ok(())
}
