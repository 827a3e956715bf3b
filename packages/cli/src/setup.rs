//! Wiring for the binary: database, storage and batch backends.

use std::path::PathBuf;

use batch::{CommandReader, LocalBatchClient, ReaderRegistry};
use db::DbConfig;
use reading_core::{Manifest, ManifestError, ReaderName};
use storage::{Storage, StorageConfig, StorageError};

use crate::args::RunArgs;

/// Anything that stops a run before its first job is tracked.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

pub async fn load_manifest(args: &RunArgs) -> Result<Manifest, SetupError> {
    let text = tokio::fs::read_to_string(&args.manifest)
        .await
        .map_err(|source| SetupError::Io {
            path: args.manifest.clone(),
            source,
        })?;
    let manifest = Manifest::from_json(&text)?;
    if args.readers.is_empty() {
        Ok(manifest)
    } else {
        Ok(manifest.with_readers(args.readers.clone()))
    }
}

/// Open the database named by `--db`, falling back to READING_DB_* variables.
pub async fn init_db(endpoint: Option<&str>) -> Result<DbConfig, SetupError> {
    let config = match endpoint {
        Some(endpoint) => DbConfig::endpoint(endpoint),
        None => DbConfig::from_env(),
    };
    db::init(config.clone()).await?;
    Ok(config)
}

pub async fn open_storage(args: &RunArgs) -> Result<Storage, SetupError> {
    let storage = match &args.storage_root {
        Some(root) => Storage::new(StorageConfig::filesystem(root)).await?,
        None => Storage::from_env().await?,
    };
    tracing::info!("Using {} object storage", storage.kind_str());
    Ok(storage)
}

/// Local backend with one command reader per `--reader NAME=PROGRAM`.
pub fn local_backend(
    args: &RunArgs,
    manifest: &Manifest,
    storage: &Storage,
) -> Result<LocalBatchClient, SetupError> {
    let mut readers = ReaderRegistry::new();
    for (name, program) in &args.reader_programs {
        let mut reader = CommandReader::new(*name, program, storage.clone());
        if let Some(dir) = &args.work_dir {
            reader = reader.with_work_dir(dir);
        }
        readers.register(reader);
    }

    let selected = ReaderName::parse_selection(&manifest.readers)
        .map_err(|e| SetupError::Manifest(ManifestError::from(e)))?;
    for name in selected {
        if !readers.has_reader(name) {
            tracing::warn!("No program configured for reader {}; its jobs will fail", name);
        }
    }
    let available = readers.available();
    for name in readers.names() {
        if !available.contains(&name) {
            tracing::warn!("Reader {} is not runnable on this host", name);
        }
    }

    Ok(LocalBatchClient::new(readers, args.concurrency))
}
