#![warn(missing_docs)]
//! Sharded embedding index with exhaustive cosine-similarity search.
//!
//! Documents are encoded by an injected [`Encoder`], written as numbered
//! vector/metadata shard pairs by [`ShardWriter`], checked by
//! [`validate_index`], loaded into an immutable [`Corpus`], and searched by
//! [`QueryEngine`].

pub mod archive;
pub mod config;
pub mod document;
pub mod encoder;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod manifest;
pub mod query;
pub mod shard;
pub mod validator;
pub mod writer;

pub use archive::{pack, unpack, ArchiveReport};
pub use config::{EncoderArgs, EncoderKind, IndexConfig};
pub use document::{Document, MetadataRecord};
pub use encoder::Encoder;
pub use error::{Error, ErrorKind, Result};
pub use ingest::load_documents;
pub use loader::{load_index, Corpus};
pub use manifest::IndexManifest;
pub use query::{QueryEngine, QueryResult};
pub use validator::{validate_index, ValidationReport};
pub use writer::{BuildReport, ShardWriter};
