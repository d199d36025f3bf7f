//! On-disk shard files: naming, directory scanning, and the two file codecs.
//!
//! A shard `k` is the pair `embeddings_{k}.bin` / `metadata_{k}.json`.
//!
//! ```text
//! embeddings_{k}.bin
//! Offset   Size        Type      Description
//! 0x00     8           [u8; 8]   Magic: "SHRDEMB1"
//! 0x08     8           u64 LE    N: number of rows
//! 0x10     4           u32 LE    D: dimensions
//! 0x14     4           u32 LE    reserved (zero)
//! 0x18     N*D*4       [f32 LE]  row-major vector data
//! ```
//!
//! `metadata_{k}.json` is a JSON array of N [`MetadataRecord`]s.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::IgnoredAny;

use crate::document::MetadataRecord;
use crate::error::{Error, Result};
use crate::manifest::MANIFEST_FILE;

/// Magic bytes opening every vector file.
pub const MAGIC: [u8; 8] = *b"SHRDEMB1";
/// Vector file header size in bytes.
pub const HEADER_SIZE: usize = 24;

const EMBEDDINGS_PREFIX: &str = "embeddings_";
const METADATA_PREFIX: &str = "metadata_";
const EMBEDDINGS_EXT: &str = "bin";
const METADATA_EXT: &str = "json";

/// Which half of a shard a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardFileKind {
    /// `embeddings_{k}.bin`
    Embeddings,
    /// `metadata_{k}.json`
    Metadata,
}

/// File name of shard `number`'s vector matrix.
pub fn embeddings_file_name(number: u32) -> String {
    format!("{EMBEDDINGS_PREFIX}{number}.{EMBEDDINGS_EXT}")
}

/// File name of shard `number`'s metadata array.
pub fn metadata_file_name(number: u32) -> String {
    format!("{METADATA_PREFIX}{number}.{METADATA_EXT}")
}

/// Splits a shard file name into its kind and numeric suffix.
///
/// Leading zeros are accepted (`embeddings_01.bin` parses as shard 1) so that
/// the loader can report them as duplicates instead of silently ignoring them.
pub fn parse_shard_file_name(name: &str) -> Option<(ShardFileKind, u32)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let (kind, digits) = match ext {
        EMBEDDINGS_EXT => (ShardFileKind::Embeddings, stem.strip_prefix(EMBEDDINGS_PREFIX)?),
        METADATA_EXT => (ShardFileKind::Metadata, stem.strip_prefix(METADATA_PREFIX)?),
        _ => return None,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|number| (kind, number))
}

/// A discovered shard file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    /// Numeric suffix parsed from the file name.
    pub number: u32,
    /// Full path to the file.
    pub path: PathBuf,
}

/// Shard files found in an index directory, each list sorted by shard number.
#[derive(Debug, Default)]
pub struct ShardListing {
    /// Vector files.
    pub embeddings: Vec<ShardFile>,
    /// Metadata files.
    pub metadata: Vec<ShardFile>,
}

impl ShardListing {
    /// Sorted shard numbers of the vector files.
    pub fn embedding_numbers(&self) -> Vec<u32> {
        self.embeddings.iter().map(|file| file.number).collect()
    }

    /// Sorted shard numbers of the metadata files.
    pub fn metadata_numbers(&self) -> Vec<u32> {
        self.metadata.iter().map(|file| file.number).collect()
    }

    /// Every shard file, vectors first.
    pub fn all_files(&self) -> impl Iterator<Item = &ShardFile> {
        self.embeddings.iter().chain(self.metadata.iter())
    }
}

/// Lists shard files in `dir`; other entries are ignored.
pub fn scan_shards(dir: &Path) -> Result<ShardListing> {
    ensure_index_dir(dir)?;
    let mut listing = ShardListing::default();
    let entries = fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(dir, err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some((kind, number)) = parse_shard_file_name(name) else {
            continue;
        };
        let file = ShardFile { number, path };
        match kind {
            ShardFileKind::Embeddings => listing.embeddings.push(file),
            ShardFileKind::Metadata => listing.metadata.push(file),
        }
    }
    listing
        .embeddings
        .sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));
    listing
        .metadata
        .sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));
    Ok(listing)
}

/// Checks that vector and metadata shard numbers are unique, identical, and
/// contiguous from 1.
pub(crate) fn check_shard_numbers(listing: &ShardListing) -> Result<()> {
    check_duplicates("vector", &listing.embeddings)?;
    check_duplicates("metadata", &listing.metadata)?;

    let vector_numbers: BTreeSet<u32> = listing.embedding_numbers().into_iter().collect();
    let metadata_numbers: BTreeSet<u32> = listing.metadata_numbers().into_iter().collect();
    if vector_numbers != metadata_numbers {
        let only_vectors: Vec<u32> = vector_numbers.difference(&metadata_numbers).copied().collect();
        let only_metadata: Vec<u32> = metadata_numbers.difference(&vector_numbers).copied().collect();
        return Err(Error::Validation(format!(
            "vector and metadata shard numbers differ: vector-only {:?}, metadata-only {:?}",
            only_vectors, only_metadata
        )));
    }

    for (vectors, metadata) in listing.embeddings.iter().zip(listing.metadata.iter()) {
        if vectors.number != metadata.number {
            return Err(Error::Validation(format!(
                "vector shard {} is paired with metadata shard {}",
                vectors.number, metadata.number
            )));
        }
    }

    for (position, file) in listing.embeddings.iter().enumerate() {
        let expected = position as u32 + 1;
        if file.number != expected {
            return Err(Error::Validation(format!(
                "shard numbers must be contiguous from 1: expected shard {expected}, found shard {}",
                file.number
            )));
        }
    }
    Ok(())
}

fn check_duplicates(label: &str, files: &[ShardFile]) -> Result<()> {
    for pair in files.windows(2) {
        if pair[0].number == pair[1].number {
            return Err(Error::Validation(format!(
                "duplicate {label} shard {}: {:?} and {:?}",
                pair[0].number, pair[0].path, pair[1].path
            )));
        }
    }
    Ok(())
}

/// Deletes every shard file and the manifest in `dir`, returning how many shard
/// files were removed.
pub(crate) fn remove_index_files(dir: &Path) -> Result<usize> {
    let listing = scan_shards(dir)?;
    let mut removed = 0usize;
    for file in listing.all_files() {
        fs::remove_file(&file.path).map_err(|err| Error::io(&file.path, err))?;
        removed += 1;
    }
    let manifest = dir.join(MANIFEST_FILE);
    if manifest.is_file() {
        fs::remove_file(&manifest).map_err(|err| Error::io(&manifest, err))?;
    }
    Ok(removed)
}

/// Fails with a configuration error unless `dir` is an existing directory.
pub(crate) fn ensure_index_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Err(Error::Configuration(format!(
            "index directory {:?} does not exist",
            dir
        )));
    }
    if !dir.is_dir() {
        return Err(Error::Configuration(format!(
            "index path {:?} is not a directory",
            dir
        )));
    }
    Ok(())
}

/// Parsed vector file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorHeader {
    /// Number of rows (N).
    pub rows: u64,
    /// Row width (D).
    pub dimensions: u32,
}

impl VectorHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8..16].copy_from_slice(&self.rows.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes
    }

    fn from_bytes(path: &Path, bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[0..8] != MAGIC {
            return Err(Error::Validation(format!(
                "{:?} is not a shard vector file (bad magic)",
                path
            )));
        }
        let mut rows_le = [0u8; 8];
        rows_le.copy_from_slice(&bytes[8..16]);
        let mut dims_le = [0u8; 4];
        dims_le.copy_from_slice(&bytes[16..20]);
        let rows = u64::from_le_bytes(rows_le);
        let dimensions = u32::from_le_bytes(dims_le);
        if rows > 0 && dimensions == 0 {
            return Err(Error::Validation(format!(
                "{:?} declares {rows} rows of zero dimensions",
                path
            )));
        }
        Ok(Self { rows, dimensions })
    }

    /// Payload size in bytes implied by the header.
    fn payload_len(&self, path: &Path) -> Result<u64> {
        self.rows
            .checked_mul(u64::from(self.dimensions))
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| {
                Error::Validation(format!("{:?} header overflows the payload size", path))
            })
    }
}

/// A shard's vector matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    /// Row width.
    pub dimensions: usize,
    /// `rows * dimensions` values.
    pub data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Number of rows.
    pub fn rows(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }
}

/// Writes `rows` (each exactly `dimensions` wide) as a vector file.
pub fn write_embeddings(path: &Path, dimensions: usize, rows: &[Vec<f32>]) -> Result<()> {
    let dims = u32::try_from(dimensions).map_err(|_| {
        Error::InvalidArgument(format!("dimension {dimensions} exceeds the file format"))
    })?;
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != dimensions) {
        return Err(Error::InvalidArgument(format!(
            "row {idx} has {} values, expected {dimensions}",
            row.len()
        )));
    }
    let header = VectorHeader {
        rows: rows.len() as u64,
        dimensions: dims,
    };
    let file = File::create(path).map_err(|err| Error::io(path, err))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&header.to_bytes())
        .map_err(|err| Error::io(path, err))?;
    for value in rows.iter().flatten() {
        writer
            .write_all(&value.to_le_bytes())
            .map_err(|err| Error::io(path, err))?;
    }
    writer.flush().map_err(|err| Error::io(path, err))?;
    Ok(())
}

/// Reads a vector file header and checks the file length matches it.
pub fn read_embeddings_header(path: &Path) -> Result<VectorHeader> {
    let mut file = File::open(path).map_err(|err| Error::io(path, err))?;
    let file_len = file.metadata().map_err(|err| Error::io(path, err))?.len();
    if file_len < HEADER_SIZE as u64 {
        return Err(Error::Validation(format!(
            "{:?} is too small for a vector file header",
            path
        )));
    }
    let mut bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut bytes)
        .map_err(|err| Error::io(path, err))?;
    let header = VectorHeader::from_bytes(path, &bytes)?;
    let expected = header.payload_len(path)? + HEADER_SIZE as u64;
    if file_len != expected {
        return Err(Error::Validation(format!(
            "{:?} holds {file_len} bytes but its header implies {expected}",
            path
        )));
    }
    Ok(header)
}

/// Reads a full vector file.
pub fn read_embeddings(path: &Path) -> Result<EmbeddingMatrix> {
    let bytes = fs::read(path).map_err(|err| Error::io(path, err))?;
    let header_bytes: &[u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            Error::Validation(format!("{:?} is too small for a vector file header", path))
        })?;
    let header = VectorHeader::from_bytes(path, header_bytes)?;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() as u64 != header.payload_len(path)? {
        return Err(Error::Validation(format!(
            "{:?} payload is {} bytes but its header declares {} rows x {} dims",
            path,
            payload.len(),
            header.rows,
            header.dimensions
        )));
    }
    let data = payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(EmbeddingMatrix {
        dimensions: header.dimensions as usize,
        data,
    })
}

/// Writes a metadata array.
pub fn write_metadata(path: &Path, records: &[MetadataRecord]) -> Result<()> {
    let file = File::create(path).map_err(|err| Error::io(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, records).map_err(|err| Error::metadata(path, err))?;
    writer.flush().map_err(|err| Error::io(path, err))?;
    Ok(())
}

/// Reads a metadata array.
pub fn read_metadata(path: &Path) -> Result<Vec<MetadataRecord>> {
    let file = File::open(path).map_err(|err| Error::io(path, err))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| Error::metadata(path, err))
}

/// Counts metadata records without materialising them.
pub fn metadata_len(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(|err| Error::io(path, err))?;
    let records: Vec<IgnoredAny> =
        serde_json::from_reader(BufReader::new(file)).map_err(|err| Error::metadata(path, err))?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    #[test]
    fn parses_shard_names() {
        assert_eq!(
            parse_shard_file_name("embeddings_12.bin"),
            Some((ShardFileKind::Embeddings, 12))
        );
        assert_eq!(
            parse_shard_file_name("metadata_3.json"),
            Some((ShardFileKind::Metadata, 3))
        );
        assert_eq!(
            parse_shard_file_name("embeddings_01.bin"),
            Some((ShardFileKind::Embeddings, 1))
        );
        assert_eq!(parse_shard_file_name("embeddings_.bin"), None);
        assert_eq!(parse_shard_file_name("embeddings_1.json"), None);
        assert_eq!(parse_shard_file_name("metadata_-1.json"), None);
        assert_eq!(parse_shard_file_name("manifest.json"), None);
    }

    #[test]
    fn vector_file_keeps_values_and_header() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(embeddings_file_name(1));
        let rows = vec![vec![1.0, -2.5, 0.0], vec![0.25, 8.0, -0.125]];
        write_embeddings(&path, 3, &rows).expect("write");

        let header = read_embeddings_header(&path).expect("header");
        assert_eq!(header, VectorHeader { rows: 2, dimensions: 3 });
        let matrix = read_embeddings(&path).expect("read");
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.data, rows.concat());
    }

    #[test]
    fn truncated_vector_file_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(embeddings_file_name(1));
        write_embeddings(&path, 2, &[vec![1.0, 2.0]]).expect("write");
        let bytes = fs::read(&path).expect("read bytes");
        fs::write(&path, &bytes[..bytes.len() - 2]).expect("truncate");

        let err = read_embeddings(&path).expect_err("truncated payload");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = read_embeddings_header(&path).expect_err("truncated payload");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(embeddings_file_name(1));
        fs::write(&path, [0u8; HEADER_SIZE]).expect("write");
        let err = read_embeddings(&path).expect_err("bad magic");
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn ragged_rows_are_refused() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(embeddings_file_name(1));
        let err = write_embeddings(&path, 2, &[vec![1.0, 2.0], vec![1.0]]).expect_err("ragged");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn metadata_length_counts_records() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(metadata_file_name(1));
        let records: Vec<MetadataRecord> = (0..4)
            .map(|id| MetadataRecord {
                id,
                indexed_field_value: format!("doc {id}"),
                fields: IndexMap::new(),
            })
            .collect();
        write_metadata(&path, &records).expect("write");
        assert_eq!(metadata_len(&path).expect("len"), 4);
        assert_eq!(read_metadata(&path).expect("read"), records);
    }

    #[test]
    fn scan_ignores_unrelated_files_and_sorts_numerically() {
        let dir = TempDir::new().expect("tempdir");
        for name in [
            "embeddings_10.bin",
            "embeddings_2.bin",
            "metadata_2.json",
            "metadata_10.json",
            "manifest.json",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"").expect("touch");
        }
        let listing = scan_shards(dir.path()).expect("scan");
        assert_eq!(listing.embedding_numbers(), vec![2, 10]);
        assert_eq!(listing.metadata_numbers(), vec![2, 10]);
    }

    #[test]
    fn scan_of_missing_directory_is_configuration_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = scan_shards(&dir.path().join("absent")).expect_err("missing dir");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
