//! Object storage for reader inputs, outputs and stashed job logs.
//!
//! Backends:
//! - S3-compatible storage for production batches
//! - On-disk storage for local runs
//! - In-memory storage for tests
//!
//! A thin wrapper around `object_store`, which already provides S3, local
//! filesystem, and in-memory backends.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("object is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

impl S3Config {
    /// Bucket-only config; everything else at its default.
    pub fn bucket(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            allow_http: false,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            virtual_hosted_style: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from process environment variables.
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from a variable lookup.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 variables (S3-compatible):
    /// - `S3_BUCKET` (default: `bigmech`)
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem variables:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional, e.g. `reading/`)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).and_then(non_empty);
        let prefix = var("STORAGE_PREFIX");
        let fs_root = || {
            var("STORAGE_FS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/object_store"))
        };

        let cfg = match var("STORAGE_BACKEND").as_deref() {
            Some("s3") => Self::s3(read_s3_config(&var)?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        tracing::debug!("Opened {} object storage", kind.as_str());

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
            _ => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Whether an object exists at `key`.
    ///
    /// Only a not-found answer maps to `false`; other failures are errors.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.to_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }

    pub async fn put_text(&self, key: &str, text: impl Into<String>) -> Result<(), StorageError> {
        self.put_bytes(key, Bytes::from(text.into())).await
    }

    pub async fn get_text(&self, key: &str) -> Result<String, StorageError> {
        let bytes = self.get_bytes(key).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub async fn put_json_value(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_bytes(key, Bytes::from(bytes)).await
    }

    pub async fn get_json_value(&self, key: &str) -> Result<serde_json::Value, StorageError> {
        let bytes = self.get_bytes(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(name: &str, value: Option<String>) -> Result<Option<bool>, StorageError> {
    let Some(v) = value else {
        return Ok(None);
    };

    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(StorageError::InvalidConfig(format!(
            "invalid boolean for {name}={v} (expected true/false)"
        ))),
    }
}

fn read_s3_config(var: &dyn Fn(&str) -> Option<String>) -> Result<S3Config, StorageError> {
    let bucket = var("S3_BUCKET").unwrap_or_else(|| "bigmech".to_string());
    let region = var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = var("S3_ENDPOINT");
    let allow_http = match parse_bool("S3_ALLOW_HTTP", var("S3_ALLOW_HTTP"))? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style =
        parse_bool("S3_VIRTUAL_HOSTED_STYLE", var("S3_VIRTUAL_HOSTED_STYLE"))?.unwrap_or(false);

    Ok(S3Config {
        endpoint,
        allow_http,
        access_key_id: var("AWS_ACCESS_KEY_ID"),
        secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
        session_token: var("AWS_SESSION_TOKEN"),
        virtual_hosted_style,
        ..S3Config::bucket(bucket, region)
    })
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[tokio::test]
    async fn exists_tracks_put_and_delete() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        assert!(!storage.exists("reading_results/reach/x/output.json").await?);

        storage
            .put_text("reading_results/reach/x/output.json", "{}")
            .await?;
        assert!(storage.exists("reading_results/reach/x/output.json").await?);

        storage.delete("reading_results/reach/x/output.json").await?;
        assert!(!storage.exists("reading_results/reach/x/output.json").await?);
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_honours_prefix() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage =
            Storage::new(StorageConfig::filesystem(dir.path()).with_prefix("/runs/")).await?;

        storage.put_text("logs/a.log", "line one\nline two").await?;
        assert_eq!(storage.get_text("logs/a.log").await?, "line one\nline two");
        assert!(dir.path().join("runs/logs/a.log").exists());
        Ok(())
    }

    #[tokio::test]
    async fn json_round_trip_in_memory() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let value = serde_json::json!({"statements": 3, "reader": "sparser"});
        storage.put_json_value("out.json", &value).await?;
        assert_eq!(storage.get_json_value("out.json").await?, value);
        Ok(())
    }

    #[tokio::test]
    async fn empty_key_is_rejected() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let err = storage.put_text("/", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
        Ok(())
    }

    #[test]
    fn lookup_selects_backend() -> Result<(), StorageError> {
        let cfg = StorageConfig::from_lookup(lookup(&[("STORAGE_BACKEND", "memory")]))?;
        assert!(matches!(cfg.backend, StorageBackendConfig::Memory));

        let cfg = StorageConfig::from_lookup(lookup(&[
            ("STORAGE_BACKEND", "s3"),
            ("S3_ENDPOINT", "http://localhost:9000"),
            ("STORAGE_PREFIX", "reading/"),
        ]))?;
        match cfg.backend {
            StorageBackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "bigmech");
                assert!(s3.allow_http);
            }
            other => panic!("expected s3, got {other:?}"),
        }
        assert_eq!(cfg.prefix.as_deref(), Some("reading/"));
        Ok(())
    }

    #[test]
    fn lookup_rejects_bad_values() {
        let err = StorageConfig::from_lookup(lookup(&[("STORAGE_BACKEND", "ftp")])).unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));

        let err = StorageConfig::from_lookup(lookup(&[
            ("STORAGE_BACKEND", "s3"),
            ("S3_ALLOW_HTTP", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
    }
}
