//! Error taxonomy shared by the writer, validator, loader, and query engine.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by index building, validation, loading, and search.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad directories, paths, or configuration values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Shard count or row/metadata misalignment, or a corrupt shard file.
    #[error("validation error: {0}")]
    Validation(String),

    /// The encoder adapter failed or returned an unusable vector.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading or writing a file failed.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// A metadata or manifest file is not valid JSON for its schema.
    #[error("malformed JSON in {path:?}: {source}")]
    Metadata {
        /// Offending file.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A shard archive could not be written or read.
    #[error("archive error at {path:?}: {source}")]
    Archive {
        /// Archive file.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
}

/// Coarse classification of [`Error`] used by adapters (HTTP status mapping, exit codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::Configuration`].
    Configuration,
    /// See [`Error::Validation`] and [`Error::Metadata`].
    Validation,
    /// See [`Error::Encoding`].
    Encoding,
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// See [`Error::Io`] and [`Error::Archive`].
    Io,
}

impl Error {
    /// Returns the coarse error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Validation(_) | Error::Metadata { .. } => ErrorKind::Validation,
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Io { .. } | Error::Archive { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn metadata(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Error::Metadata {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn archive(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        Error::Archive {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wraps an encoder adapter failure, keeping the full context chain.
    pub(crate) fn encoding(err: anyhow::Error) -> Self {
        Error::Encoding(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_errors_classify_as_validation() {
        let source = serde_json::from_str::<Vec<u8>>("{").expect_err("invalid json");
        let err = Error::metadata("metadata_1.json", source);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("metadata_1.json"));
    }

    #[test]
    fn encoding_wrapper_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("embedding request failed");
        let wrapped = Error::encoding(err);
        assert_eq!(wrapped.kind(), ErrorKind::Encoding);
        assert_eq!(
            wrapped.to_string(),
            "encoding error: embedding request failed: connection refused"
        );
    }
}
