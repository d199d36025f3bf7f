//! Packs an index directory into a single zip archive and restores it.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::manifest::MANIFEST_FILE;
use crate::shard::{ensure_index_dir, parse_shard_file_name, remove_index_files, scan_shards};

/// Files moved by a pack or unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Entry names in archive order.
    pub entries: Vec<String>,
    /// Uncompressed bytes across all entries.
    pub bytes: u64,
}

fn is_index_entry(name: &str) -> bool {
    name == MANIFEST_FILE || parse_shard_file_name(name).is_some()
}

/// Writes every shard file of `index_dir`, plus its manifest when present,
/// into a deflate-compressed zip at `archive_path`.
pub fn pack(index_dir: &Path, archive_path: &Path) -> Result<ArchiveReport> {
    ensure_index_dir(index_dir)?;
    let listing = scan_shards(index_dir)?;
    let mut files: Vec<PathBuf> = listing.all_files().map(|file| file.path.clone()).collect();
    let manifest = index_dir.join(MANIFEST_FILE);
    if manifest.is_file() {
        files.push(manifest);
    }

    let out = File::create(archive_path).map_err(|err| Error::io(archive_path, err))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut report = ArchiveReport {
        entries: Vec::with_capacity(files.len()),
        bytes: 0,
    };
    for path in files {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
        zip.start_file(name, options)
            .map_err(|err| Error::archive(archive_path, err))?;
        zip.write_all(&bytes)
            .map_err(|err| Error::io(archive_path, err))?;
        debug!(entry = name, bytes = bytes.len(), "archived");
        report.bytes += bytes.len() as u64;
        report.entries.push(name.to_string());
    }
    let mut writer = zip
        .finish()
        .map_err(|err| Error::archive(archive_path, err))?;
    writer.flush().map_err(|err| Error::io(archive_path, err))?;

    info!(
        archive = %archive_path.display(),
        entries = report.entries.len(),
        bytes = report.bytes,
        "index packed"
    );
    Ok(report)
}

/// Restores an archive written by [`pack`] into `target_dir`, creating it if needed.
///
/// Every entry name is checked before anything is written: entries with
/// directory components or names outside the shard and manifest naming scheme
/// fail with a validation error. Shard files and a manifest already in
/// `target_dir` are removed first, so the directory ends up holding exactly
/// the archived index.
pub fn unpack(archive_path: &Path, target_dir: &Path) -> Result<ArchiveReport> {
    let file = File::open(archive_path).map_err(|err| Error::io(archive_path, err))?;
    let mut zip =
        ZipArchive::new(BufReader::new(file)).map_err(|err| Error::archive(archive_path, err))?;

    let mut names = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip
            .by_index(index)
            .map_err(|err| Error::archive(archive_path, err))?;
        let raw = entry.name().to_string();
        let single = entry
            .enclosed_name()
            .filter(|path| path.components().count() == 1)
            .and_then(|path| path.to_str().map(str::to_string));
        match single {
            Some(name) if !entry.is_dir() && is_index_entry(&name) => names.push(name),
            _ => {
                return Err(Error::Validation(format!(
                    "archive {:?} holds unexpected entry {raw:?}",
                    archive_path
                )))
            }
        }
    }

    if target_dir.exists() && !target_dir.is_dir() {
        return Err(Error::Configuration(format!(
            "unpack target {:?} is not a directory",
            target_dir
        )));
    }
    fs::create_dir_all(target_dir).map_err(|err| Error::io(target_dir, err))?;
    let replaced = remove_index_files(target_dir)?;
    if replaced > 0 {
        info!(replaced, "removed shard files already present in the unpack target");
    }

    let mut report = ArchiveReport {
        entries: Vec::with_capacity(names.len()),
        bytes: 0,
    };
    for (index, name) in names.into_iter().enumerate() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| Error::archive(archive_path, err))?;
        let path = target_dir.join(&name);
        let mut out = BufWriter::new(File::create(&path).map_err(|err| Error::io(&path, err))?);
        let written = io::copy(&mut entry, &mut out).map_err(|err| Error::io(&path, err))?;
        out.flush().map_err(|err| Error::io(&path, err))?;
        debug!(entry = %name, bytes = written, "restored");
        report.bytes += written;
        report.entries.push(name);
    }

    info!(
        target = %target_dir.display(),
        entries = report.entries.len(),
        "index unpacked"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn round_trip_restores_identical_bytes() {
        let source = TempDir::new().expect("tempdir");
        fs::write(source.path().join("embeddings_1.bin"), [1u8, 2, 3, 4]).expect("write");
        fs::write(source.path().join("metadata_1.json"), b"[]").expect("write");
        fs::write(source.path().join(MANIFEST_FILE), b"{}").expect("write");
        fs::write(source.path().join("notes.txt"), b"ignored").expect("write");

        let scratch = TempDir::new().expect("tempdir");
        let archive = scratch.path().join("index.zip");
        let packed = pack(source.path(), &archive).expect("pack");
        assert_eq!(
            packed.entries,
            vec!["embeddings_1.bin", "metadata_1.json", MANIFEST_FILE]
        );

        let target = scratch.path().join("restored");
        let unpacked = unpack(&archive, &target).expect("unpack");
        assert_eq!(unpacked, packed);
        for name in &packed.entries {
            let original = fs::read(source.path().join(name)).expect("read");
            let restored = fs::read(target.join(name)).expect("read");
            assert_eq!(original, restored, "{name}");
        }
        assert!(!target.join("notes.txt").exists());
    }

    #[test]
    fn unpacking_over_a_larger_index_drops_its_extra_shards() {
        let scratch = TempDir::new().expect("tempdir");
        let small = scratch.path().join("small");
        fs::create_dir(&small).expect("mkdir");
        for n in 1..=2 {
            fs::write(small.join(format!("embeddings_{n}.bin")), [n as u8]).expect("write");
            fs::write(small.join(format!("metadata_{n}.json")), b"[]").expect("write");
        }
        let archive = scratch.path().join("small.zip");
        pack(&small, &archive).expect("pack");

        let target = scratch.path().join("target");
        fs::create_dir(&target).expect("mkdir");
        for n in 1..=3 {
            fs::write(target.join(format!("embeddings_{n}.bin")), b"old").expect("write");
            fs::write(target.join(format!("metadata_{n}.json")), b"old").expect("write");
        }
        fs::write(target.join(MANIFEST_FILE), b"old").expect("write");
        fs::write(target.join("notes.txt"), b"keep").expect("write");

        unpack(&archive, &target).expect("unpack");
        let listing = scan_shards(&target).expect("scan");
        assert_eq!(listing.embedding_numbers(), vec![1, 2]);
        assert_eq!(listing.metadata_numbers(), vec![1, 2]);
        assert!(!target.join(MANIFEST_FILE).exists());
        assert_eq!(fs::read(target.join("embeddings_2.bin")).expect("read"), vec![2u8]);
        assert_eq!(fs::read(target.join("notes.txt")).expect("read"), b"keep".to_vec());
    }

    #[test]
    fn rejects_foreign_entries() {
        let scratch = TempDir::new().expect("tempdir");
        let archive = scratch.path().join("foreign.zip");
        let mut zip = ZipWriter::new(File::create(&archive).expect("create"));
        zip.start_file("../evil.bin", SimpleFileOptions::default())
            .expect("start");
        zip.write_all(b"x").expect("write");
        zip.finish().expect("finish");

        let target = scratch.path().join("out");
        let err = unpack(&archive, &target).expect_err("foreign entry");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!target.exists());
    }

    #[test]
    fn packing_a_missing_directory_is_a_configuration_error() {
        let scratch = TempDir::new().expect("tempdir");
        let err = pack(&scratch.path().join("absent"), &scratch.path().join("a.zip"))
            .expect_err("missing dir");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
