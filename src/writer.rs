//! Shard writer: embeds documents and persists them as fixed-size shard file pairs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::document::{Document, MetadataRecord};
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::manifest::{file_crc32, now_epoch_ms, IndexManifest, ShardEntry};
use crate::shard::{
    embeddings_file_name, metadata_file_name, remove_index_files, write_embeddings,
    write_metadata,
};
use crate::validator::{validate_index, ValidationReport};

/// Summary of a completed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Documents received.
    pub total_documents: usize,
    /// Documents embedded and written.
    pub indexed: usize,
    /// Documents skipped for a missing or empty indexed field.
    pub skipped: usize,
    /// Shards written.
    pub shards: u32,
    /// Embedding width (0 when nothing was indexed).
    pub dimensions: usize,
    /// Result of the post-build validation pass.
    pub validation: ValidationReport,
}

/// Builds a complete shard set from a batch of documents.
pub struct ShardWriter {
    config: IndexConfig,
    encoder: Arc<dyn Encoder>,
}

impl ShardWriter {
    /// Creates a writer; the encoder is shared, never rebuilt per call.
    pub fn new(config: IndexConfig, encoder: Arc<dyn Encoder>) -> Result<Self> {
        if config.shard_size() == 0 {
            return Err(Error::Configuration("shard size must be at least 1".to_string()));
        }
        if config.indexed_field().trim().is_empty() {
            return Err(Error::Configuration(
                "indexed field name must not be empty".to_string(),
            ));
        }
        Ok(Self { config, encoder })
    }

    /// Configuration this writer was built with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Embeds `documents`, replaces any shard set in the output directory, and
    /// validates the result.
    ///
    /// Documents without a usable indexed field are skipped and counted. The
    /// previous shard set is only removed once every embedding is available.
    pub fn write<I>(&self, documents: I) -> Result<BuildReport>
    where
        I: IntoIterator<Item = Document>,
    {
        let output_dir = self.config.output_dir();
        prepare_output_dir(output_dir)?;

        let field = self.config.indexed_field();
        let mut total_documents = 0usize;
        let mut retained: Vec<Document> = Vec::new();
        for document in documents {
            total_documents += 1;
            if document.indexed_text(field).is_some() {
                retained.push(document);
            }
        }
        let skipped = total_documents - retained.len();
        if skipped > 0 {
            warn!(
                skipped,
                field, "skipped documents with a missing or empty indexed field"
            );
        }

        let texts: Vec<&str> = retained
            .iter()
            .filter_map(|document| document.indexed_text(field))
            .collect();
        info!(
            documents = texts.len(),
            model = self.encoder.model_id(),
            "encoding indexed field {field:?}"
        );
        let embeddings = self.encode_in_order(&texts)?;
        let dimensions = check_dimensions(&embeddings)?;

        let removed = remove_index_files(output_dir)?;
        if removed > 0 {
            info!(removed, "removed shard files from a previous build");
        }

        let shard_size = self.config.shard_size();
        let shard_count = texts.len().div_ceil(shard_size);
        let mut entries = Vec::with_capacity(shard_count);
        for shard_idx in 0..shard_count {
            let number = u32::try_from(shard_idx + 1).map_err(|_| {
                Error::Configuration(format!("{shard_count} shards exceed the shard numbering range"))
            })?;
            let start = shard_idx * shard_size;
            let end = (start + shard_size).min(texts.len());
            let records: Vec<MetadataRecord> = (start..end)
                .map(|idx| {
                    MetadataRecord::from_document((idx - start) as u64, texts[idx], &retained[idx])
                })
                .collect();

            let vector_path = output_dir.join(embeddings_file_name(number));
            let metadata_path = output_dir.join(metadata_file_name(number));
            write_embeddings(&vector_path, dimensions, &embeddings[start..end])?;
            write_metadata(&metadata_path, &records)?;
            entries.push(ShardEntry {
                shard: number,
                rows: (end - start) as u64,
                embeddings_crc32: file_crc32(&vector_path)?,
                metadata_crc32: file_crc32(&metadata_path)?,
            });
            info!(shard = number, rows = end - start, "stored rows {start}-{end}");
        }

        let manifest = IndexManifest {
            model: self.encoder.model_id().to_string(),
            dimensions,
            indexed_field: field.to_string(),
            shard_size,
            created_epoch_ms: now_epoch_ms(),
            shards: entries,
        };
        manifest.store(output_dir)?;

        let validation = validate_index(output_dir)?;
        if validation.total_rows != texts.len() as u64 {
            return Err(Error::Validation(format!(
                "validated {} rows but {} documents were written",
                validation.total_rows,
                texts.len()
            )));
        }
        info!(
            indexed = texts.len(),
            skipped,
            shards = shard_count,
            "index build complete in {:?}",
            output_dir
        );
        Ok(BuildReport {
            total_documents,
            indexed: texts.len(),
            skipped,
            shards: shard_count as u32,
            dimensions,
            validation,
        })
    }

    /// Encodes `texts` in batches, fanning out to the configured workers and
    /// reassembling results in input order.
    fn encode_in_order(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.config.encode_batch_size();
        let batch_count = texts.len().div_ceil(batch_size);
        let workers = self.config.encode_workers().min(batch_count);
        if workers <= 1 {
            let mut vectors = Vec::with_capacity(texts.len());
            for (batch_id, inputs) in texts.chunks(batch_size).enumerate() {
                vectors.extend(encode_batch(self.encoder.as_ref(), batch_id, inputs)?);
            }
            return Ok(vectors);
        }

        debug!(workers, batches = batch_count, "launching encoder workers");
        let (task_tx, task_rx) = bounded::<EncodeTask<'_>>(workers * 2);
        let (result_tx, result_rx) = bounded::<EncodeResult>(workers * 2);
        let encoder = self.encoder.as_ref();
        thread::scope(|scope| {
            for worker_id in 0..workers {
                let worker_rx = task_rx.clone();
                let worker_tx = result_tx.clone();
                scope.spawn(move || worker_loop(worker_id, encoder, worker_rx, worker_tx));
            }
            drop(task_rx);
            drop(result_tx);

            scope.spawn(move || {
                for (id, inputs) in texts.chunks(batch_size).enumerate() {
                    if task_tx.send(EncodeTask { id, inputs }).is_err() {
                        break;
                    }
                }
            });

            let results = result_rx;
            let mut pending: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
            let mut next_id = 0usize;
            let mut vectors = Vec::with_capacity(texts.len());
            for result in results.iter() {
                let (id, batch) = result?;
                pending.insert(id, batch);
                while let Some(batch) = pending.remove(&next_id) {
                    vectors.extend(batch);
                    next_id += 1;
                }
            }
            if next_id != batch_count {
                return Err(Error::Encoding(format!(
                    "encoder workers finished {next_id} of {batch_count} batches"
                )));
            }
            Ok(vectors)
        })
    }
}

struct EncodeTask<'a> {
    id: usize,
    inputs: &'a [&'a str],
}

type EncodeResult = Result<(usize, Vec<Vec<f32>>)>;

fn worker_loop(
    worker_id: usize,
    encoder: &dyn Encoder,
    receiver: Receiver<EncodeTask<'_>>,
    sender: Sender<EncodeResult>,
) {
    for task in receiver.iter() {
        debug!(worker_id, batch = task.id, size = task.inputs.len(), "encoding batch");
        let result = encode_batch(encoder, task.id, task.inputs).map(|vectors| (task.id, vectors));
        if sender.send(result).is_err() {
            break;
        }
    }
}

fn encode_batch(encoder: &dyn Encoder, batch_id: usize, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
    let vectors = encoder.encode_batch(inputs).map_err(Error::encoding)?;
    if vectors.len() != inputs.len() {
        return Err(Error::Encoding(format!(
            "batch {batch_id}: encoder returned {} vectors for {} inputs",
            vectors.len(),
            inputs.len()
        )));
    }
    Ok(vectors)
}

/// Returns the shared embedding width, rejecting empty or ragged vectors.
fn check_dimensions(embeddings: &[Vec<f32>]) -> Result<usize> {
    let Some(first) = embeddings.first() else {
        return Ok(0);
    };
    let dimensions = first.len();
    if dimensions == 0 {
        return Err(Error::Encoding("encoder returned an empty vector".to_string()));
    }
    if let Some(idx) = embeddings.iter().position(|v| v.len() != dimensions) {
        return Err(Error::Encoding(format!(
            "document {idx} embedded to {} dimensions, expected {dimensions}",
            embeddings[idx].len()
        )));
    }
    Ok(dimensions)
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(Error::Configuration(format!(
            "output path {:?} is not a directory",
            dir
        )));
    }
    fs::create_dir_all(dir).map_err(|err| {
        Error::Configuration(format!("cannot create output directory {:?}: {err}", dir))
    })
}
