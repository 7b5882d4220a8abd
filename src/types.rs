//! Core data types shared by every pipeline stage

use serde::{Deserialize, Serialize};

/// A remote analytical query bound to exactly one protocol partition
///
/// Configured once at startup (see `SYNC_QUERIES`), never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalQueryHandle {
    query_id: String,
    partition_key: String,
}

impl ExternalQueryHandle {
    pub fn new(query_id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            partition_key: partition_key.into(),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Protocol identifier whose rows are replaced as a unit
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }
}

/// One `[offset, offset + limit)` slice of a remote result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub offset: u64,
    pub limit: u64,
}

impl ChunkDescriptor {
    /// Exclusive upper bound of the covered row range
    pub fn end(&self) -> u64 {
        self.offset + self.limit
    }
}

/// Per-trader volume row produced by the parser
///
/// `address` is never empty and `volume_usd` is always finite and >= 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderVolumeRecord {
    pub address: String,
    pub volume_usd: f64,
}

impl TraderVolumeRecord {
    pub fn new(address: impl Into<String>, volume_usd: f64) -> Self {
        Self {
            address: address.into(),
            volume_usd,
        }
    }
}

/// Row-count metadata reported by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Availability {
    pub row_count: u64,
    pub has_results: bool,
}

impl Availability {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn rows(row_count: u64) -> Self {
        Self {
            row_count,
            has_results: row_count > 0,
        }
    }
}

/// Outcome of one partition sync, as reported to callers and written to `sync_runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub protocol: String,
    pub success: bool,
    pub rows_imported: usize,
    /// Probe found nothing; the stored partition was left untouched
    pub no_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rows_per_sec: f64,
}

impl SyncResult {
    pub fn imported(protocol: &str, rows_imported: usize, rows_per_sec: f64) -> Self {
        Self {
            protocol: protocol.to_string(),
            success: true,
            rows_imported,
            no_data: false,
            error: None,
            rows_per_sec,
        }
    }

    pub fn no_data(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            success: true,
            rows_imported: 0,
            no_data: true,
            error: None,
            rows_per_sec: 0.0,
        }
    }

    pub fn failed(protocol: &str, error: impl ToString) -> Self {
        Self {
            protocol: protocol.to_string(),
            success: false,
            rows_imported: 0,
            no_data: false,
            error: Some(error.to_string()),
            rows_per_sec: 0.0,
        }
    }
}
