//! In-memory `QueryResultsSource` for network-free tests

use super::api::QueryResultsSource;
use crate::error::SyncError;
use crate::types::{ChunkDescriptor, ExternalQueryHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub(crate) struct FakeSource {
    header: String,
    rows: Vec<String>,
    probe_fails: bool,
    /// chunk index -> failures left before it succeeds
    failing_chunks: Mutex<HashMap<usize, u32>>,
    delay: Duration,
    /// extra latency for single chunks
    chunk_delays: HashMap<usize, Duration>,
    watched_dir: Option<PathBuf>,
    pub listings: Mutex<Vec<DirListing>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(header: &str, rows: Vec<String>) -> Self {
        Self {
            header: header.to_string(),
            rows,
            probe_fails: false,
            failing_chunks: Mutex::new(HashMap::new()),
            delay: Duration::from_millis(0),
            chunk_delays: HashMap::new(),
            watched_dir: None,
            listings: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// `count` traders named `trader_{i}` with volume `i + 1`
    pub fn traders(count: usize) -> Self {
        let rows = (0..count).map(|i| format!("trader_{},{}", i, i + 1)).collect();
        Self::new("user,volume_usd", rows)
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn fail_chunk(self, index: usize, times: u32) -> Self {
        self.failing_chunks
            .lock()
            .unwrap()
            .insert(index, times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_chunk(mut self, index: usize, delay: Duration) -> Self {
        self.chunk_delays.insert(index, delay);
        self
    }

    /// List `dir` when each fetch starts and again when it finishes
    pub fn watch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watched_dir = Some(dir.into());
        self
    }

    fn record_listing(&self, chunk: usize, finished: bool) {
        let Some(dir) = &self.watched_dir else {
            return;
        };
        let mut files: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        self.listings.lock().unwrap().push(DirListing {
            chunk,
            finished,
            files,
        });
    }
}

/// Temp-dir contents seen by one fetch
#[derive(Debug, Clone)]
pub(crate) struct DirListing {
    pub chunk: usize,
    /// taken after the fetch's delay, just before the body is written
    pub finished: bool,
    pub files: Vec<String>,
}

impl DirListing {
    pub fn has_chunk_file(&self, index: usize) -> bool {
        let tag = format!("_chunk{:05}_", index);
        self.files.iter().any(|f| f.contains(&tag))
    }
}

#[async_trait]
impl QueryResultsSource for FakeSource {
    async fn total_row_count(&self, _handle: &ExternalQueryHandle) -> Result<u64, SyncError> {
        if self.probe_fails {
            return Err(SyncError::Download("connection refused".to_string()));
        }
        Ok(self.rows.len() as u64)
    }

    async fn fetch_csv_chunk(
        &self,
        _handle: &ExternalQueryHandle,
        chunk: &ChunkDescriptor,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.record_listing(chunk.index, false);
        let extra = self.chunk_delays.get(&chunk.index).copied().unwrap_or_default();
        tokio::time::sleep(self.delay + extra).await;
        self.record_listing(chunk.index, true);

        let should_fail = {
            let mut failing = self.failing_chunks.lock().unwrap();
            match failing.get_mut(&chunk.index) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };

        let result = if should_fail {
            // half-written body before the failure
            let _ = sink.write_all(self.header.as_bytes()).await;
            Err(SyncError::Status {
                status: 500,
                body: format!("chunk {} failed", chunk.index),
            })
        } else {
            let start = chunk.offset as usize;
            let end = (chunk.end() as usize).min(self.rows.len());
            let mut body = format!("{}\n", self.header);
            for row in &self.rows[start.min(end)..end] {
                body.push_str(row);
                body.push('\n');
            }
            match sink.write_all(body.as_bytes()).await {
                Ok(()) => Ok(body.len() as u64),
                Err(e) => Err(SyncError::Io(e)),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
