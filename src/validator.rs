//! Shard validator: checks that every shard's vector rows match its metadata records.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::shard::{check_shard_numbers, metadata_len, read_embeddings_header, scan_shards};

/// Outcome of a successful validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of shard pairs checked.
    pub shards: usize,
    /// Rows across all shards.
    pub total_rows: u64,
}

/// Validates every shard in `dir`, failing on the first inconsistency.
///
/// Vector and metadata files are counted, sorted by shard number, and paired
/// positionally. Shard numbers must be unique, match across the pair, and run
/// contiguously from 1 (the same rules the loader enforces), and each vector
/// file's row count must equal its metadata array length.
pub fn validate_index(dir: &Path) -> Result<ValidationReport> {
    let listing = scan_shards(dir)?;
    if listing.embeddings.len() != listing.metadata.len() {
        return Err(Error::Validation(format!(
            "{:?} holds {} vector files but {} metadata files",
            dir,
            listing.embeddings.len(),
            listing.metadata.len()
        )));
    }

    check_shard_numbers(&listing)?;

    let mut total_rows = 0u64;
    for (vectors, metadata) in listing.embeddings.iter().zip(listing.metadata.iter()) {
        let rows = read_embeddings_header(&vectors.path)?.rows;
        let records = metadata_len(&metadata.path)? as u64;
        if rows != records {
            return Err(Error::Validation(format!(
                "shard {}: vector file has {rows} rows but metadata file has {records} records",
                vectors.number
            )));
        }
        debug!(shard = vectors.number, rows, "shard validated");
        total_rows += rows;
    }

    Ok(ValidationReport {
        shards: listing.embeddings.len(),
        total_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MetadataRecord;
    use crate::error::ErrorKind;
    use crate::shard::{embeddings_file_name, metadata_file_name, write_embeddings, write_metadata};
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn write_shard(dir: &Path, number: u32, rows: usize, records: usize) {
        let vectors: Vec<Vec<f32>> = (0..rows).map(|i| vec![i as f32, 1.0]).collect();
        write_embeddings(&dir.join(embeddings_file_name(number)), 2, &vectors).expect("vectors");
        let metadata: Vec<MetadataRecord> = (0..records)
            .map(|id| MetadataRecord {
                id: id as u64,
                indexed_field_value: format!("row {id}"),
                fields: IndexMap::new(),
            })
            .collect();
        write_metadata(&dir.join(metadata_file_name(number)), &metadata).expect("metadata");
    }

    #[test]
    fn consistent_index_passes() {
        let dir = TempDir::new().expect("tempdir");
        write_shard(dir.path(), 1, 3, 3);
        write_shard(dir.path(), 2, 1, 1);
        let report = validate_index(dir.path()).expect("valid");
        assert_eq!(report, ValidationReport { shards: 2, total_rows: 4 });
    }

    #[test]
    fn empty_directory_is_valid() {
        let dir = TempDir::new().expect("tempdir");
        let report = validate_index(dir.path()).expect("valid");
        assert_eq!(report.shards, 0);
    }

    #[test]
    fn row_mismatch_names_the_shard() {
        let dir = TempDir::new().expect("tempdir");
        write_shard(dir.path(), 1, 2, 2);
        write_shard(dir.path(), 2, 10, 9);
        let err = validate_index(dir.path()).expect_err("misaligned shard");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let message = err.to_string();
        assert!(message.contains("shard 2"), "{message}");
        assert!(message.contains("10 rows"), "{message}");
        assert!(message.contains("9 records"), "{message}");
    }

    #[test]
    fn gap_in_shard_numbers_fails() {
        let dir = TempDir::new().expect("tempdir");
        write_shard(dir.path(), 1, 1, 1);
        write_shard(dir.path(), 2, 1, 1);
        write_shard(dir.path(), 3, 1, 1);
        std::fs::remove_file(dir.path().join(embeddings_file_name(2))).expect("remove");
        std::fs::remove_file(dir.path().join(metadata_file_name(2))).expect("remove");
        let err = validate_index(dir.path()).expect_err("gap");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("expected shard 2, found shard 3"), "{err}");
    }

    #[test]
    fn duplicate_suffixes_fail() {
        let dir = TempDir::new().expect("tempdir");
        write_shard(dir.path(), 1, 1, 1);
        std::fs::copy(
            dir.path().join(embeddings_file_name(1)),
            dir.path().join("embeddings_01.bin"),
        )
        .expect("copy");
        std::fs::copy(
            dir.path().join(metadata_file_name(1)),
            dir.path().join("metadata_01.json"),
        )
        .expect("copy");
        let err = validate_index(dir.path()).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate vector shard 1"), "{err}");
    }

    #[test]
    fn file_count_mismatch_fails() {
        let dir = TempDir::new().expect("tempdir");
        write_shard(dir.path(), 1, 1, 1);
        std::fs::remove_file(dir.path().join(metadata_file_name(1))).expect("remove");
        let err = validate_index(dir.path()).expect_err("count mismatch");
        assert!(err.to_string().contains("1 vector files but 0 metadata files"));
    }
}
