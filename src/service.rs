//! Partition sync service
//!
//! Wires the stages for one protocol partition:
//!
//! ```text
//! BatchOrchestrator::run → PartitionLoader::load → RankStatisticsEngine::compute
//!     → PartitionLoader::store_rank_statistics → CacheInvalidationHook::invalidate
//!     → PartitionLoader::record_sync_run
//! ```
//!
//! Every outcome, including failures, is reported as a `SyncResult` rather than
//! an error so that multi-partition runs isolate failures per partition.
//!
//! A "no data" run (probe soft-failed or the query returned zero rows) leaves
//! the stored partition untouched and does not invalidate the cache.

use crate::cache::{CacheInvalidationHook, NoopCacheHook, WebhookCacheHook};
use crate::config::{ConfigError, SyncConfig};
use crate::error::SyncError;
use crate::ingest::{
    BatchOrchestrator, ChunkDownloader, ExponentialBackoff, QueryApiClient,
    ResultAvailabilityProbe, StreamingRecordParser,
};
use crate::ranking::{RankStatistics, RankStatisticsEngine};
use crate::store::{PartitionLoader, SyncRunEntry};
use crate::types::{ExternalQueryHandle, SyncResult};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Longest backoff between two chunk attempts, as a multiple of the base delay
const MAX_BACKOFF_FACTOR: u64 = 8;

pub struct SyncService {
    orchestrator: BatchOrchestrator,
    loader: Arc<dyn PartitionLoader>,
    ranking: RankStatisticsEngine,
    cache: Arc<dyn CacheInvalidationHook>,
    chunk_size: u64,
    max_parallel: usize,
}

impl SyncService {
    pub fn new(
        orchestrator: BatchOrchestrator,
        loader: Arc<dyn PartitionLoader>,
        cache: Arc<dyn CacheInvalidationHook>,
    ) -> Self {
        Self {
            orchestrator,
            loader,
            ranking: RankStatisticsEngine::default(),
            cache,
            chunk_size: 10_000,
            max_parallel: 6,
        }
    }

    pub fn with_chunking(mut self, chunk_size: u64, max_parallel: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_ranking(mut self, ranking: RankStatisticsEngine) -> Self {
        self.ranking = ranking;
        self
    }

    /// Production wiring: HTTP query client, retrying downloader, optional webhook
    pub fn from_config(
        config: &SyncConfig,
        loader: Arc<dyn PartitionLoader>,
    ) -> Result<Self, ConfigError> {
        let source = Arc::new(QueryApiClient::new(&config.api)?);

        let retry = ExponentialBackoff::new(
            config.retry_base_ms,
            config.retry_base_ms.saturating_mul(MAX_BACKOFF_FACTOR),
            config.download_retries,
        );

        let orchestrator = BatchOrchestrator::new(
            ResultAvailabilityProbe::new(source.clone()),
            ChunkDownloader::new(source, config.temp_dir.clone()).with_retry(retry),
            StreamingRecordParser::new(config.progress_every),
        );

        let cache: Arc<dyn CacheInvalidationHook> = match &config.cache_invalidate_url {
            Some(url) => Arc::new(
                WebhookCacheHook::new(url.clone())
                    .map_err(|e| ConfigError::InvalidValue(format!("CACHE_INVALIDATE_URL: {}", e)))?,
            ),
            None => Arc::new(NoopCacheHook),
        };

        Ok(Self::new(orchestrator, loader, cache)
            .with_chunking(config.chunk_size, config.max_parallel))
    }

    /// Fetch, replace and rank one partition
    pub async fn sync_partition(&self, handle: &ExternalQueryHandle) -> SyncResult {
        let protocol = handle.partition_key();
        let started_at = chrono::Utc::now().timestamp();

        log::info!("🚀 Syncing {} (query {})", protocol, handle.query_id());

        let result = match self.try_sync(handle).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("❌ {} sync failed: {}", protocol, e);
                SyncResult::failed(protocol, &e)
            }
        };

        let entry = SyncRunEntry {
            result: result.clone(),
            started_at,
            finished_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self.loader.record_sync_run(&entry).await {
            log::warn!("⚠️  Failed to record sync run for {}: {}", protocol, e);
        }

        result
    }

    async fn try_sync(&self, handle: &ExternalQueryHandle) -> Result<SyncResult, SyncError> {
        let protocol = handle.partition_key();

        let run = self
            .orchestrator
            .run(handle, self.chunk_size, self.max_parallel)
            .await?;

        if run.no_data {
            log::info!("📭 {}: stored partition left untouched", protocol);
            return Ok(SyncResult::no_data(protocol));
        }

        // ranked before the records move into the loader
        let stats = self.ranking.compute(&run.records);
        let rows_imported = self.loader.load(protocol, run.records).await?;

        if let Err(e) = self.loader.store_rank_statistics(protocol, &stats).await {
            log::warn!("⚠️  Failed to store rank statistics for {}: {}", protocol, e);
        }

        self.cache.invalidate(protocol).await;

        log::info!("✅ {} synced", protocol);
        log::info!("   ├─ Rows imported: {}", rows_imported);
        log::info!("   ├─ Chunks: {}", run.chunks);
        log::info!("   ├─ Total volume: ${:.2}", stats.metrics.total_volume);
        log::info!("   └─ Throughput: {:.0} rows/sec", run.throughput.rows_per_sec);

        Ok(SyncResult::imported(
            protocol,
            rows_imported,
            run.throughput.rows_per_sec,
        ))
    }

    /// Sync every partition as its own task; results follow `handles` order
    ///
    /// One partition failing (or panicking) never affects the others.
    pub async fn sync_all(self: &Arc<Self>, handles: &[ExternalQueryHandle]) -> Vec<SyncResult> {
        let mut tasks = JoinSet::new();
        for (slot, handle) in handles.iter().cloned().enumerate() {
            let service = Arc::clone(self);
            tasks.spawn(async move { (slot, service.sync_partition(&handle).await) });
        }

        let mut results: Vec<Option<SyncResult>> = vec![None; handles.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => log::error!("❌ Partition sync task failed: {}", e),
            }
        }

        let results: Vec<SyncResult> = results
            .into_iter()
            .zip(handles)
            .map(|(result, handle)| {
                result.unwrap_or_else(|| {
                    SyncResult::failed(handle.partition_key(), "sync task aborted")
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        log::info!("🏁 Sync finished: {}/{} partitions succeeded", succeeded, results.len());

        results
    }

    /// Recompute and store rank statistics from the rows already in the store
    pub async fn rerank_partition(&self, partition_key: &str) -> Result<RankStatistics, SyncError> {
        let records = self.loader.partition_records(partition_key).await?;
        let stats = self.ranking.compute(&records);

        self.loader.store_rank_statistics(partition_key, &stats).await?;
        self.cache.invalidate(partition_key).await;

        log::info!(
            "📈 {} re-ranked: {} traders, ${:.2} total volume",
            partition_key,
            stats.metrics.total_traders,
            stats.metrics.total_volume
        );

        Ok(stats)
    }
}
