//! Streaming CSV → `TraderVolumeRecord` parsing
//!
//! Column names differ between upstream queries, so both canonical fields are
//! resolved through ordered alias lists (case-insensitive). For every row the
//! first alias column holding a non-empty value wins.
//!
//! | field        | aliases (priority order)                              |
//! |--------------|-------------------------------------------------------|
//! | `address`    | user, trader, address, wallet, trader_address         |
//! | `volume_usd` | volume_usd, volume, total_volume_usd, usd_volume      |
//!
//! Rows without an address are dropped. Volumes that are missing, `<nil>`,
//! `null`, non-numeric, non-finite or negative become `0.0`; scientific
//! notation (`1.5e+06`) parses as a number.

use super::downloader::TempChunkFile;
use crate::error::SyncError;
use crate::types::TraderVolumeRecord;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::Path;

pub const ADDRESS_ALIASES: &[&str] = &["user", "trader", "address", "wallet", "trader_address"];
pub const VOLUME_ALIASES: &[&str] = &["volume_usd", "volume", "total_volume_usd", "usd_volume"];

/// Header positions for each canonical field, in alias priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnResolver {
    address: Vec<usize>,
    volume: Vec<usize>,
}

impl ColumnResolver {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let lookup = |aliases: &[&str]| -> Vec<usize> {
            aliases
                .iter()
                .flat_map(|alias| {
                    headers
                        .iter()
                        .enumerate()
                        .filter(move |(_, h)| h.trim().eq_ignore_ascii_case(alias))
                        .map(|(i, _)| i)
                })
                .collect()
        };

        Self {
            address: lookup(ADDRESS_ALIASES),
            volume: lookup(VOLUME_ALIASES),
        }
    }

    pub fn has_address(&self) -> bool {
        !self.address.is_empty()
    }

    /// Map one CSV row to a record, `None` if it has no address
    pub fn resolve(&self, record: &StringRecord) -> Option<TraderVolumeRecord> {
        let first_non_empty = |columns: &[usize]| {
            columns
                .iter()
                .filter_map(|&i| record.get(i))
                .map(str::trim)
                .find(|v| !v.is_empty())
        };

        let address = first_non_empty(self.address.as_slice())?;
        let volume_usd = first_non_empty(self.volume.as_slice()).map(parse_volume).unwrap_or(0.0);

        Some(TraderVolumeRecord::new(address, volume_usd))
    }
}

/// Lenient USD volume parsing, never NaN or negative
pub fn parse_volume(raw: &str) -> f64 {
    let value = raw.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("<nil>") || value.eq_ignore_ascii_case("null") {
        return 0.0;
    }

    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

/// Parses downloaded chunk files and deletes them afterwards
#[derive(Debug, Clone)]
pub struct StreamingRecordParser {
    progress_every: u64,
}

impl Default for StreamingRecordParser {
    fn default() -> Self {
        Self::new(50_000)
    }
}

impl StreamingRecordParser {
    pub fn new(progress_every: u64) -> Self {
        Self {
            progress_every: progress_every.max(1),
        }
    }

    /// Parse on the blocking pool; the file is gone when this returns
    pub async fn parse(&self, file: TempChunkFile) -> Result<Vec<TraderVolumeRecord>, SyncError> {
        let parser = self.clone();
        tokio::task::spawn_blocking(move || parser.parse_blocking(file)).await?
    }

    /// Synchronous variant of `parse`
    pub fn parse_blocking(&self, file: TempChunkFile) -> Result<Vec<TraderVolumeRecord>, SyncError> {
        let result = self.parse_path(file.path(), file.chunk_index());
        file.remove();
        result
    }

    fn parse_path(&self, path: &Path, chunk_index: usize) -> Result<Vec<TraderVolumeRecord>, SyncError> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_path(path)?;

        let resolver = ColumnResolver::from_headers(reader.headers()?);
        if !resolver.has_address() {
            log::warn!(
                "⚠️  Chunk {}: no address column in header {:?}, every row will be dropped",
                chunk_index,
                reader.headers()?
            );
        }

        let mut records = Vec::new();
        let mut row = StringRecord::new();
        let mut rows_read = 0u64;
        let mut dropped = 0u64;

        while reader.read_record(&mut row)? {
            rows_read += 1;

            match resolver.resolve(&row) {
                Some(record) => records.push(record),
                None => dropped += 1,
            }

            if rows_read % self.progress_every == 0 {
                log::debug!("   ├─ chunk {}: {} rows parsed", chunk_index, rows_read);
            }
        }

        log::debug!(
            "📄 Chunk {} parsed: {} records ({} rows dropped)",
            chunk_index,
            records.len(),
            dropped
        );

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk_file(dir: &TempDir, name: &str, contents: &[u8]) -> TempChunkFile {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        TempChunkFile::new(path, 0)
    }

    #[tokio::test]
    async fn test_alias_headers_parse_equivalently() {
        let dir = TempDir::new().unwrap();
        let parser = StreamingRecordParser::default();

        let a = parser
            .parse(chunk_file(&dir, "a.csv", b"User,Volume_USD\nwallet1,100.5\nwallet2,3\n"))
            .await
            .unwrap();
        let b = parser
            .parse(chunk_file(&dir, "b.csv", b"address,volume\nwallet1,100.5\nwallet2,3\n"))
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a[0], TraderVolumeRecord::new("wallet1", 100.5));
    }

    #[tokio::test]
    async fn test_file_deleted_after_parse() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir, "c.csv", b"trader,volume\nx,1\n");
        let path = file.path().to_path_buf();

        StreamingRecordParser::default().parse(file).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_deleted_after_error() {
        let dir = TempDir::new().unwrap();
        // invalid UTF-8 in a data row
        let file = chunk_file(&dir, "bad.csv", b"user,volume\n\xff\xfe,1\n");
        let path = file.path().to_path_buf();

        let result = StreamingRecordParser::default().parse(file).await;
        assert!(matches!(result, Err(SyncError::Parse(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_rows_without_address_dropped() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir, "d.csv", b"user,volume_usd\n,50\n  ,10\nkept,7\n");

        let records = StreamingRecordParser::default().parse_blocking(file).unwrap();
        assert_eq!(records, vec![TraderVolumeRecord::new("kept", 7.0)]);
    }

    #[test]
    fn test_alias_priority_and_fallback() {
        let dir = TempDir::new().unwrap();
        // `user` outranks `address`; empty `user` falls through to `address`
        let file = chunk_file(
            &dir,
            "e.csv",
            b"address,user,volume,volume_usd\naddr1,user1,1,2\naddr2,,3,\n",
        );

        let records = StreamingRecordParser::default().parse_blocking(file).unwrap();
        assert_eq!(
            records,
            vec![
                TraderVolumeRecord::new("user1", 2.0),
                TraderVolumeRecord::new("addr2", 3.0),
            ]
        );
    }

    #[test]
    fn test_missing_volume_column_defaults_to_zero() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir, "f.csv", b"trader,rank\nw1,1\nw2\n");

        let records = StreamingRecordParser::default().parse_blocking(file).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.volume_usd == 0.0));
    }

    #[test]
    fn test_no_address_column_drops_everything() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir, "g.csv", b"mint,volume\nm1,5\n");

        let records = StreamingRecordParser::default().parse_blocking(file).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_header_only_file() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir, "h.csv", b"user,volume_usd\n");

        assert!(StreamingRecordParser::default().parse_blocking(file).unwrap().is_empty());
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("1234.5"), 1234.5);
        assert_eq!(parse_volume(" 1.5e+06 "), 1_500_000.0);
        assert_eq!(parse_volume("<nil>"), 0.0);
        assert_eq!(parse_volume("NULL"), 0.0);
        assert_eq!(parse_volume(""), 0.0);
        assert_eq!(parse_volume("abc"), 0.0);
        assert_eq!(parse_volume("NaN"), 0.0);
        assert_eq!(parse_volume("inf"), 0.0);
        assert_eq!(parse_volume("-25"), 0.0);
    }
}
