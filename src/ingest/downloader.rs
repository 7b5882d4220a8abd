//! Chunk download into scoped temp files
//!
//! Each chunk is streamed straight from the HTTP body into a freshly created
//! file named `{protocol}_chunk{index}_{millis}_{nonce}.csv`, so concurrent
//! partitions and retries never collide on a path.
//!
//! ## Ownership
//!
//! The returned `TempChunkFile` is the only handle to the path. The parser takes
//! it by value and deletes it. If a handle is dropped without being consumed
//! (a sibling chunk failed and the batch was aborted), `Drop` deletes the file.

use super::api::QueryResultsSource;
use super::retry::ExponentialBackoff;
use crate::error::SyncError;
use crate::types::{ChunkDescriptor, ExternalQueryHandle};
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};

/// A downloaded chunk on disk, deleted exactly once
#[derive(Debug)]
pub struct TempChunkFile {
    path: PathBuf,
    chunk_index: usize,
    bytes: u64,
    removed: bool,
}

impl TempChunkFile {
    pub(crate) fn new(path: PathBuf, chunk_index: usize) -> Self {
        Self {
            path,
            chunk_index,
            bytes: 0,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Size of the downloaded CSV body
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Delete the file, consuming the handle
    pub fn remove(mut self) {
        self.remove_now();
    }

    fn remove_now(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("🧹 Removed chunk file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("⚠️  Chunk file already removed: {}", self.path.display());
            }
            Err(e) => {
                log::warn!("⚠️  Failed to remove chunk file {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for TempChunkFile {
    fn drop(&mut self) {
        if !self.removed {
            log::debug!("Discarding unconsumed chunk file {}", self.path.display());
            self.remove_now();
        }
    }
}

/// Fetches single chunks into `temp_dir`
#[derive(Clone)]
pub struct ChunkDownloader {
    source: Arc<dyn QueryResultsSource>,
    temp_dir: PathBuf,
    retry: ExponentialBackoff,
}

impl ChunkDownloader {
    /// Downloader without retries: one request per chunk
    pub fn new(source: Arc<dyn QueryResultsSource>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            temp_dir: temp_dir.into(),
            retry: ExponentialBackoff::disabled(),
        }
    }

    /// Retry transport failures, 429 and 5xx with the given backoff
    ///
    /// A retry re-requests the identical offset/limit into a new file.
    pub fn with_retry(mut self, retry: ExponentialBackoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn download(
        &self,
        handle: &ExternalQueryHandle,
        chunk: &ChunkDescriptor,
    ) -> Result<TempChunkFile, SyncError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let mut backoff = self.retry.clone();
        backoff.reset();

        loop {
            match self.attempt(handle, chunk).await {
                Ok(file) => return Ok(file),
                Err(e) if is_retryable(&e) && backoff.next_delay().is_some() => {
                    log::warn!(
                        "⚠️  {} chunk {} (offset {}, limit {}) failed: {}",
                        handle.partition_key(),
                        chunk.index,
                        chunk.offset,
                        chunk.limit,
                        e
                    );
                    if backoff.sleep().await.is_err() {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        handle: &ExternalQueryHandle,
        chunk: &ChunkDescriptor,
    ) -> Result<TempChunkFile, SyncError> {
        let path = self
            .temp_dir
            .join(chunk_file_name(handle.partition_key(), chunk.index));

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        // From here on an early return drops `temp` and deletes the partial file
        let mut temp = TempChunkFile::new(path, chunk.index);

        let mut writer = BufWriter::new(file);
        let bytes = self.source.fetch_csv_chunk(handle, chunk, &mut writer).await?;
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        temp.bytes = bytes;
        log::debug!(
            "⬇️  {} chunk {} downloaded ({} bytes) → {}",
            handle.partition_key(),
            chunk.index,
            bytes,
            temp.path.display()
        );

        Ok(temp)
    }
}

fn is_retryable(err: &SyncError) -> bool {
    match err {
        SyncError::Download(_) => true,
        SyncError::Status { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// Unique file name for one chunk of one partition
fn chunk_file_name(partition_key: &str, chunk_index: usize) -> String {
    let safe_key: String = partition_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let nonce: u32 = rand::thread_rng().gen();

    format!(
        "{}_chunk{:05}_{}_{:08x}.csv",
        safe_key,
        chunk_index,
        chrono::Utc::now().timestamp_millis(),
        nonce
    )
}
