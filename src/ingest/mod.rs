//! # Chunked ingestion
//!
//! Pulls a remote query's full result set into memory as `TraderVolumeRecord`s.
//!
//! ## Stages
//!
//! 1. `ResultAvailabilityProbe` asks for row-count metadata (soft-fails to "no data")
//! 2. `ChunkPlanner` splits `[0, rows)` into offset/limit chunks, grouped into
//!    batches of at most `max_parallel`
//! 3. `ChunkDownloader` streams each chunk's CSV into its own temp file
//! 4. `StreamingRecordParser` tokenizes the file, resolves column aliases and
//!    deletes the file
//! 5. `BatchOrchestrator` drives 2–4 batch by batch and concatenates the output
//!
//! Batches run strictly one after another. Within a batch every download runs
//! concurrently, and only once all of them have finished do the parses start.

pub mod api;
pub mod downloader;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod probe;
pub mod retry;

#[cfg(test)]
pub(crate) mod fake;

pub use api::{QueryApiClient, QueryResultsSource};
pub use downloader::{ChunkDownloader, TempChunkFile};
pub use orchestrator::{BatchOrchestrator, BatchRun, Throughput};
pub use parser::StreamingRecordParser;
pub use planner::ChunkPlanner;
pub use probe::ResultAvailabilityProbe;
pub use retry::ExponentialBackoff;
