use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shardsearch::{pack, unpack, validate_index};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shardsearch-archive",
    about = "Packs an index directory into a zip archive or restores one"
)]
struct ArchiveCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress every shard file and the manifest into one archive
    Pack {
        /// Index directory to read
        #[arg(long, env = "SHARDSEARCH_INDEX_DIR", default_value = "index")]
        index_dir: PathBuf,
        /// Archive file to write
        #[arg(long)]
        archive: PathBuf,
    },
    /// Restore an archive into a directory and validate the result
    Unpack {
        /// Archive file to read
        #[arg(long)]
        archive: PathBuf,
        /// Directory receiving the shard files
        #[arg(long, env = "SHARDSEARCH_INDEX_DIR", default_value = "index")]
        index_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match ArchiveCli::parse().command {
        Command::Pack { index_dir, archive } => {
            validate_index(&index_dir)
                .with_context(|| format!("refusing to pack invalid index {:?}", index_dir))?;
            let report = pack(&index_dir, &archive)?;
            println!(
                "packed {} file(s), {} bytes -> {}",
                report.entries.len(),
                report.bytes,
                archive.display()
            );
        }
        Command::Unpack { archive, index_dir } => {
            let report = unpack(&archive, &index_dir)?;
            let validation = validate_index(&index_dir)
                .with_context(|| format!("restored index in {:?} is inconsistent", index_dir))?;
            println!(
                "restored {} file(s), {} shard(s), {} rows -> {}",
                report.entries.len(),
                validation.shards,
                validation.total_rows,
                index_dir.display()
            );
        }
    }
    Ok(())
}
