//! # SolRank
//!
//! Bulk ingestion and ranking pipeline for per-trader protocol volume.
//!
//! ## Flow
//!
//! ```text
//! ResultAvailabilityProbe
//!     ↓
//! ChunkPlanner (offset/limit chunks, grouped into bounded batches)
//!     ↓
//! BatchOrchestrator (parallel ChunkDownloader → StreamingRecordParser per batch)
//!     ↓
//! PartitionLoader (replace the protocol's rows inside one transaction)
//!     ↓
//! RankStatisticsEngine (percentile ladder over the volume-sorted snapshot)
//!     ↓
//! CacheInvalidationHook
//! ```
//!
//! `service::SyncService` wires the stages together; `bin/sync_runtime.rs` is the
//! production entry point.

pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod ranking;
pub mod service;
pub mod store;
pub mod types;

pub use error::SyncError;
pub use types::{ChunkDescriptor, ExternalQueryHandle, SyncResult, TraderVolumeRecord};
