//! Index manifest recorded next to the shards of a completed build.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name of the manifest inside an index directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Checksums and row count of one written shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    /// 1-based shard number.
    pub shard: u32,
    /// Rows in both files of the shard.
    pub rows: u64,
    /// CRC32 of the vector file bytes.
    pub embeddings_crc32: u32,
    /// CRC32 of the metadata file bytes.
    pub metadata_crc32: u32,
}

/// Summary of a completed index build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Encoder model used for the documents.
    pub model: String,
    /// Embedding width (0 when the index is empty).
    pub dimensions: usize,
    /// Document field that was embedded.
    pub indexed_field: String,
    /// Configured maximum rows per shard.
    pub shard_size: usize,
    /// Epoch milliseconds when the build finished.
    pub created_epoch_ms: u64,
    /// Shards in ascending order.
    pub shards: Vec<ShardEntry>,
}

impl IndexManifest {
    /// Total rows across all shards.
    pub fn total_rows(&self) -> u64 {
        self.shards.iter().map(|entry| entry.rows).sum()
    }

    /// Writes the manifest into `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let file = File::create(&path).map_err(|err| Error::io(&path, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|err| Error::metadata(&path, err))?;
        writer.flush().map_err(|err| Error::io(&path, err))?;
        Ok(())
    }

    /// Reads the manifest from `dir`, returning `None` when there is none.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|err| Error::io(&path, err))?;
        let manifest =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| Error::metadata(&path, err))?;
        Ok(Some(manifest))
    }
}

/// CRC32 of a file's full contents.
pub fn file_crc32(path: &Path) -> Result<u32> {
    let bytes = fs::read(path).map_err(|err| Error::io(path, err))?;
    Ok(crc32fast::hash(&bytes))
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn stores_and_loads() {
        let dir = TempDir::new().expect("tempdir");
        let manifest = IndexManifest {
            model: "feature-hashing-8".to_string(),
            dimensions: 8,
            indexed_field: "title".to_string(),
            shard_size: 2,
            created_epoch_ms: 1,
            shards: vec![
                ShardEntry {
                    shard: 1,
                    rows: 2,
                    embeddings_crc32: 7,
                    metadata_crc32: 9,
                },
                ShardEntry {
                    shard: 2,
                    rows: 1,
                    embeddings_crc32: 11,
                    metadata_crc32: 13,
                },
            ],
        };
        manifest.store(dir.path()).expect("store");
        let loaded = IndexManifest::load(dir.path()).expect("load").expect("present");
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.total_rows(), 3);
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = TempDir::new().expect("tempdir");
        assert!(IndexManifest::load(dir.path()).expect("load").is_none());
    }
}
