//! Batch orchestration: probe → plan → (download all, then parse all) per batch
//!
//! ## Concurrency
//!
//! ```text
//! batch 0: [download c0 | download c1 | ... ] → [parse c0 | parse c1 | ...]
//! batch 1:                                                                 [download c6 | ...] → ...
//! ```
//!
//! Batches never overlap. A batch's parses start only after every download in
//! that batch has finished, so temp-file disk usage is bounded by one batch.
//!
//! ## Failure
//!
//! Any chunk failure aborts the run. The orchestrator still waits for the other
//! tasks of the failing batch to settle, then drops their temp files, so nothing
//! is left behind in the temp directory.

use super::downloader::{ChunkDownloader, TempChunkFile};
use super::parser::StreamingRecordParser;
use super::planner::ChunkPlanner;
use super::probe::ResultAvailabilityProbe;
use crate::error::SyncError;
use crate::types::{ChunkDescriptor, ExternalQueryHandle, TraderVolumeRecord};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Cap on the up-front allocation for the accumulator
const MAX_PREALLOCATED_ROWS: u64 = 1_000_000;

/// Cumulative ingestion rate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Throughput {
    pub rows: usize,
    pub elapsed: Duration,
    pub rows_per_sec: f64,
}

impl Throughput {
    pub fn measure(rows: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            rows,
            elapsed,
            rows_per_sec: if secs > 0.0 { rows as f64 / secs } else { 0.0 },
        }
    }
}

/// Output of one orchestrator run
#[derive(Debug, Clone, Default)]
pub struct BatchRun {
    /// Records in chunk order
    pub records: Vec<TraderVolumeRecord>,
    /// The probe reported nothing to fetch
    pub no_data: bool,
    pub chunks: usize,
    pub throughput: Throughput,
}

impl BatchRun {
    fn no_data() -> Self {
        Self {
            no_data: true,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    probe: ResultAvailabilityProbe,
    downloader: ChunkDownloader,
    parser: StreamingRecordParser,
}

impl BatchOrchestrator {
    pub fn new(
        probe: ResultAvailabilityProbe,
        downloader: ChunkDownloader,
        parser: StreamingRecordParser,
    ) -> Self {
        Self {
            probe,
            downloader,
            parser,
        }
    }

    /// Fetch the full result set of `handle`
    ///
    /// Returns an empty, `no_data` run when the probe finds nothing (this is
    /// not an error).
    pub async fn run(
        &self,
        handle: &ExternalQueryHandle,
        chunk_size: u64,
        max_parallel: usize,
    ) -> Result<BatchRun, SyncError> {
        let started = Instant::now();
        let protocol = handle.partition_key();

        let availability = self.probe.check(handle).await;
        if !availability.has_results {
            log::info!("📭 {}: no data available, nothing to sync", protocol);
            return Ok(BatchRun::no_data());
        }

        let batches = ChunkPlanner::plan(availability.row_count, chunk_size, max_parallel);
        let total_chunks: usize = batches.iter().map(Vec::len).sum();

        log::info!("🗂️  {}: sync plan", protocol);
        log::info!("   ├─ Rows: {}", availability.row_count);
        log::info!("   ├─ Chunks: {} x {} rows", total_chunks, chunk_size);
        log::info!("   └─ Batches: {} (max {} parallel)", batches.len(), max_parallel);

        let mut records =
            Vec::with_capacity(availability.row_count.min(MAX_PREALLOCATED_ROWS) as usize);
        let mut throughput = Throughput::default();

        for (batch_no, batch) in batches.iter().enumerate() {
            let files = self.download_batch(handle, batch).await?;
            let parsed = self.parse_batch(files).await?;

            for chunk_records in parsed {
                records.extend(chunk_records);
            }

            throughput = Throughput::measure(records.len(), started.elapsed());
            log::info!(
                "📦 {}: batch {}/{} done | {} rows | {:.0} rows/sec",
                protocol,
                batch_no + 1,
                batches.len(),
                records.len(),
                throughput.rows_per_sec
            );
        }

        log::info!(
            "✅ {}: fetched {} records in {:.1}s",
            protocol,
            records.len(),
            throughput.elapsed.as_secs_f64()
        );

        Ok(BatchRun {
            records,
            no_data: false,
            chunks: total_chunks,
            throughput,
        })
    }

    /// Download every chunk of one batch concurrently
    async fn download_batch(
        &self,
        handle: &ExternalQueryHandle,
        batch: &[ChunkDescriptor],
    ) -> Result<Vec<TempChunkFile>, SyncError> {
        let mut tasks = JoinSet::new();
        for (slot, chunk) in batch.iter().copied().enumerate() {
            let downloader = self.downloader.clone();
            let handle = handle.clone();
            tasks.spawn(async move { (slot, downloader.download(&handle, &chunk).await) });
        }

        let mut files: Vec<Option<TempChunkFile>> = batch.iter().map(|_| None).collect();
        let mut first_error = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, Ok(file))) => files[slot] = Some(file),
                Ok((slot, Err(e))) => {
                    log::error!(
                        "❌ {} chunk {} download failed: {}",
                        handle.partition_key(),
                        batch[slot].index,
                        e
                    );
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(SyncError::from(e));
                }
            }
        }

        if let Some(err) = first_error {
            let discarded = files.iter().flatten().count();
            // dropping the handles deletes the files
            drop(files);
            if discarded > 0 {
                log::warn!(
                    "🧹 {}: discarded {} downloaded sibling chunks after failure",
                    handle.partition_key(),
                    discarded
                );
            }
            return Err(err);
        }

        Ok(files.into_iter().flatten().collect())
    }

    /// Parse every downloaded file of one batch concurrently, keeping chunk order
    async fn parse_batch(
        &self,
        files: Vec<TempChunkFile>,
    ) -> Result<Vec<Vec<TraderVolumeRecord>>, SyncError> {
        let mut tasks = JoinSet::new();
        let slots = files.len();

        for (slot, file) in files.into_iter().enumerate() {
            let parser = self.parser.clone();
            tasks.spawn_blocking(move || (slot, parser.parse_blocking(file)));
        }

        let mut parsed: Vec<Vec<TraderVolumeRecord>> = vec![Vec::new(); slots];
        let mut first_error = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, Ok(records))) => parsed[slot] = records,
                Ok((slot, Err(e))) => {
                    log::error!("❌ chunk slot {} parse failed: {}", slot, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(SyncError::from(e));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(parsed),
        }
    }
}
