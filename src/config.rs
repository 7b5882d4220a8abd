//! Sync configuration from environment variables
//!
//! Loaded once at startup (after `dotenv`). Every value except the API key and
//! the query bindings has a default.

use crate::types::ExternalQueryHandle;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.dune.com/api/v1";
pub const DEFAULT_API_KEY_HEADER: &str = "X-Dune-API-Key";

/// Largest insert batch that keeps a multi-row INSERT under SQLite's
/// 32766 bound-parameter limit (4 parameters per row).
pub const MAX_INSERT_BATCH: usize = 8_191;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Remote query API connection settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_key_header: String,
    pub timeout: Duration,
}

/// Configuration for the sync runtime
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api: ApiConfig,

    /// Protocol → query bindings, in declaration order
    pub queries: Vec<ExternalQueryHandle>,

    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the idempotent `*.sql` schema files
    pub schema_dir: String,

    /// Rows requested per chunk
    pub chunk_size: u64,

    /// Chunks downloaded/parsed concurrently within one batch
    pub max_parallel: usize,

    /// Rows per INSERT statement
    pub insert_batch_size: usize,

    /// Where in-flight chunk files live
    pub temp_dir: PathBuf,

    /// Extra attempts per chunk after the first failure
    pub download_retries: u32,
    pub retry_base_ms: u64,

    /// Parser progress log granularity (rows)
    pub progress_every: u64,

    /// Optional webhook notified after each successful load
    pub cache_invalidate_url: Option<String>,
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `QUERY_API_KEY` (required)
    /// - `SYNC_QUERIES` (required, `protocol=queryId,...`)
    /// - `QUERY_API_BASE_URL` (default: https://api.dune.com/api/v1)
    /// - `QUERY_API_KEY_HEADER` (default: X-Dune-API-Key)
    /// - `QUERY_API_TIMEOUT_SECS` (default: 300)
    /// - `SYNC_DB_PATH` (default: /var/lib/solrank/solrank.db)
    /// - `SYNC_SCHEMA_DIR` (default: sql)
    /// - `SYNC_CHUNK_SIZE` (default: 10000)
    /// - `SYNC_MAX_PARALLEL` (default: 6)
    /// - `SYNC_INSERT_BATCH` (default: 500)
    /// - `SYNC_TEMP_DIR` (default: $TMPDIR/solrank)
    /// - `SYNC_DOWNLOAD_RETRIES` (default: 2)
    /// - `SYNC_RETRY_BASE_MS` (default: 500)
    /// - `SYNC_PROGRESS_EVERY` (default: 50000)
    /// - `CACHE_INVALIDATE_URL` (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading through an arbitrary lookup
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = var("QUERY_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "QUERY_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        let api_key = var("QUERY_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("QUERY_API_KEY".to_string()))?;

        let queries = parse_query_bindings(
            &var("SYNC_QUERIES")
                .ok_or_else(|| ConfigError::MissingVariable("SYNC_QUERIES".to_string()))?,
        )?;

        let chunk_size = parse_or("SYNC_CHUNK_SIZE", &var, 10_000u64)?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue("SYNC_CHUNK_SIZE must be >= 1".to_string()));
        }

        let max_parallel = parse_or("SYNC_MAX_PARALLEL", &var, 6usize)?;
        if max_parallel == 0 {
            return Err(ConfigError::InvalidValue("SYNC_MAX_PARALLEL must be >= 1".to_string()));
        }

        let insert_batch_size = parse_or("SYNC_INSERT_BATCH", &var, 500usize)?;
        if insert_batch_size == 0 || insert_batch_size > MAX_INSERT_BATCH {
            return Err(ConfigError::InvalidValue(format!(
                "SYNC_INSERT_BATCH must be between 1 and {}",
                MAX_INSERT_BATCH
            )));
        }

        let temp_dir = var("SYNC_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("solrank"));

        Ok(Self {
            api: ApiConfig {
                base_url,
                api_key,
                api_key_header: var("QUERY_API_KEY_HEADER")
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
                timeout: Duration::from_secs(parse_or("QUERY_API_TIMEOUT_SECS", &var, 300u64)?),
            },
            queries,
            db_path: var("SYNC_DB_PATH")
                .unwrap_or_else(|| "/var/lib/solrank/solrank.db".to_string()),
            schema_dir: var("SYNC_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),
            chunk_size,
            max_parallel,
            insert_batch_size,
            temp_dir,
            download_retries: parse_or("SYNC_DOWNLOAD_RETRIES", &var, 2u32)?,
            retry_base_ms: parse_or("SYNC_RETRY_BASE_MS", &var, 500u64)?,
            progress_every: parse_or("SYNC_PROGRESS_EVERY", &var, 50_000u64)?.max(1),
            cache_invalidate_url: var("CACHE_INVALIDATE_URL").filter(|u| !u.trim().is_empty()),
        })
    }
}

fn parse_or<T, F>(key: &str, var: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} is not a valid number: {}", key, raw))),
    }
}

/// Parse `protocol=queryId` pairs separated by commas
fn parse_query_bindings(raw: &str) -> Result<Vec<ExternalQueryHandle>, ConfigError> {
    let mut seen = HashSet::new();
    let mut handles = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (protocol, query_id) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue(format!("SYNC_QUERIES entry '{}' is not protocol=queryId", entry))
        })?;
        let (protocol, query_id) = (protocol.trim(), query_id.trim());

        if protocol.is_empty() || query_id.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "SYNC_QUERIES entry '{}' has an empty protocol or query id",
                entry
            )));
        }
        if !seen.insert(protocol.to_string()) {
            return Err(ConfigError::InvalidValue(format!(
                "SYNC_QUERIES binds protocol '{}' more than once",
                protocol
            )));
        }

        handles.push(ExternalQueryHandle::new(query_id, protocol));
    }

    if handles.is_empty() {
        return Err(ConfigError::InvalidValue("SYNC_QUERIES is empty".to_string()));
    }

    Ok(handles)
}
