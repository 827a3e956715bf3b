//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Process-wide connection, opened by the first `init_db`.
static DB: LazyLock<OnceCell<Connection>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

struct Connection {
    db: Database,
    endpoint: String,
}

/// Endpoint schemes whose data outlives the process.
const DURABLE_SCHEMES: [&str; 5] = ["rocksdb://", "surrealkv://", "file://", "ws://", "wss://"];

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path", "surrealkv://path", "ws://host"
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "reading".to_string(),
            database: "batch".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for an explicit endpoint URL.
    ///
    /// A bare path without a scheme is opened with RocksDB.
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = if endpoint.contains("://") {
            endpoint
        } else {
            format!("rocksdb://{}", endpoint)
        };
        Self {
            endpoint,
            ..Default::default()
        }
    }

    /// Build a config from a variable lookup.
    ///
    /// - `READING_DB_ENDPOINT` (default: `mem://`)
    /// - `READING_DB_NAMESPACE` (default: `reading`)
    /// - `READING_DB_DATABASE` (default: `batch`)
    /// - `READING_DB_USER` and `READING_DB_PASS` (both or neither)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = match var("READING_DB_ENDPOINT") {
            Some(endpoint) => Self::endpoint(endpoint),
            None => Self::default(),
        };
        if let Some(namespace) = var("READING_DB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = var("READING_DB_DATABASE") {
            config.database = database;
        }
        if let (Some(user), Some(pass)) = (var("READING_DB_USER"), var("READING_DB_PASS")) {
            config = config.with_credentials(user, pass);
        }
        config
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Whether job state written through this endpoint survives a restart.
    pub fn is_durable(&self) -> bool {
        DURABLE_SCHEMES
            .iter()
            .any(|scheme| self.endpoint.starts_with(scheme))
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Initialize the database connection.
///
/// Later calls return the connection made by the first one.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    let conn = DB
        .get_or_try_init(|| async {
            tracing::info!("Connecting to database: {}", config.endpoint);
            if !config.is_durable() {
                tracing::debug!("Job state will not survive this process");
            }

            let db = connect(&config.endpoint).await?;

            if let Some((username, password)) = &config.credentials {
                db.signin(Root { username, password }).await?;
            }

            db.use_ns(&config.namespace)
                .use_db(&config.database)
                .await?;

            tracing::info!(
                "Connected to database: {}/{}",
                config.namespace,
                config.database
            );

            Ok::<_, DbError>(Connection {
                db,
                endpoint: config.endpoint.clone(),
            })
        })
        .await?;

    if conn.endpoint != config.endpoint {
        tracing::warn!(
            "Database already open at {}; ignoring {}",
            conn.endpoint,
            config.endpoint
        );
    }
    Ok(&conn.db)
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().map(|conn| &conn.db).ok_or(DbError::NotInitialized)
}
