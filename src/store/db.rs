//! Partition store backed by SQLite
//!
//! Tables written (see `/sql/` directory):
//! - `trader_volumes` - DELETE + batched INSERT per protocol (replace semantics)
//! - `rank_snapshots` - UPSERT on protocol
//! - `sync_runs` - INSERT (append-only ledger)

use crate::config::MAX_INSERT_BATCH;
use crate::error::SyncError;
use crate::ranking::{PercentileBracket, RankMetrics, RankStatistics};
use crate::types::{SyncResult, TraderVolumeRecord};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, ToSql};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// One row of the `sync_runs` ledger
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRunEntry {
    pub result: SyncResult,
    pub started_at: i64,
    pub finished_at: i64,
}

/// Trait for replacing and reading protocol partitions
///
/// `load` and `partition_records` move whole partitions; the SQLite
/// implementation runs them on the blocking thread pool.
///
/// Callers must not sync the same partition concurrently; two overlapping
/// loads of one key are serialized by the connection but the last one wins.
#[async_trait]
pub trait PartitionLoader: Send + Sync {
    /// Replace every stored row of `partition_key` with `records`
    ///
    /// Operation: DELETE WHERE protocol = ? then INSERT in fixed-size batches,
    /// all inside one transaction. Returns the number of rows inserted.
    async fn load(
        &self,
        partition_key: &str,
        records: Vec<TraderVolumeRecord>,
    ) -> Result<usize, SyncError>;

    async fn row_count(&self, partition_key: &str) -> Result<usize, SyncError>;

    /// Stored snapshot, highest volume first
    async fn partition_records(
        &self,
        partition_key: &str,
    ) -> Result<Vec<TraderVolumeRecord>, SyncError>;

    /// UPSERT into `rank_snapshots`
    async fn store_rank_statistics(
        &self,
        partition_key: &str,
        stats: &RankStatistics,
    ) -> Result<(), SyncError>;

    async fn rank_statistics(
        &self,
        partition_key: &str,
    ) -> Result<Option<RankStatistics>, SyncError>;

    /// Append to `sync_runs`
    async fn record_sync_run(&self, entry: &SyncRunEntry) -> Result<(), SyncError>;
}

/// Run schema migrations from SQL files
///
/// Enables WAL, then executes every `.sql` file of `schema_dir` in file name
/// order. All files use `IF NOT EXISTS`, so re-running is a no-op.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), SyncError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.is_dir() {
        return Err(SyncError::Load(format!(
            "Schema directory not found: {}",
            schema_dir
        )));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort();

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for path in sql_files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        log::info!("   ├─ Executing: {}", filename);
        conn.execute_batch(&fs::read_to_string(&path)?)?;
    }

    log::info!("   └─ ✅ All schema migrations completed");

    Ok(())
}

/// SQLite implementation of PartitionLoader
pub struct SqlitePartitionLoader {
    conn: Arc<Mutex<Connection>>,
    insert_batch_size: usize,
}

const INSERT_COLUMNS: usize = 4;

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, SyncError> {
    conn.lock()
        .map_err(|_| SyncError::Load("database connection mutex poisoned".to_string()))
}

impl SqlitePartitionLoader {
    /// Open `db_path`; the schema must already be migrated
    pub fn open(db_path: &str, insert_batch_size: usize) -> Result<Self, SyncError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        Ok(Self::new(conn, insert_batch_size))
    }

    pub fn new(conn: Connection, insert_batch_size: usize) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            insert_batch_size: insert_batch_size.clamp(1, MAX_INSERT_BATCH),
        }
    }

    pub fn insert_batch_size(&self) -> usize {
        self.insert_batch_size
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        lock_conn(&self.conn)
    }

    /// Run `work` against the connection on the blocking thread pool
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, SyncError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = lock_conn(&conn)?;
            work(&mut conn)
        })
        .await?
    }

    fn insert_sql(rows: usize) -> String {
        let placeholders = vec!["(?, ?, ?, ?)"; rows].join(", ");
        format!(
            "INSERT INTO trader_volumes (protocol, address, volume_usd, loaded_at) VALUES {}",
            placeholders
        )
    }
}

#[async_trait]
impl PartitionLoader for SqlitePartitionLoader {
    async fn load(
        &self,
        partition_key: &str,
        records: Vec<TraderVolumeRecord>,
    ) -> Result<usize, SyncError> {
        let loaded_at = chrono::Utc::now().timestamp();
        let batch_size = self.insert_batch_size;
        let protocol = partition_key.to_string();

        let (deleted, inserted) = self
            .run_blocking(move |conn| {
                let tx = conn.transaction()?;

                // Phase 1: drop the previous snapshot
                let deleted = tx.execute(
                    "DELETE FROM trader_volumes WHERE protocol = ?1",
                    [&protocol],
                )?;

                // Phase 2: multi-row inserts
                let mut inserted = 0usize;
                for batch in records.chunks(batch_size) {
                    let mut params: Vec<&dyn ToSql> =
                        Vec::with_capacity(batch.len() * INSERT_COLUMNS);
                    for record in batch {
                        params.push(&protocol);
                        params.push(&record.address);
                        params.push(&record.volume_usd);
                        params.push(&loaded_at);
                    }

                    let mut stmt = tx.prepare_cached(&Self::insert_sql(batch.len()))?;
                    inserted += stmt.execute(params.as_slice())?;
                }

                tx.commit()?;
                Ok((deleted, inserted))
            })
            .await?;

        log::info!("💾 {}: partition replaced", partition_key);
        log::info!("   ├─ Deleted: {}", deleted);
        log::info!("   └─ Inserted: {} (batch size {})", inserted, batch_size);

        Ok(inserted)
    }

    async fn row_count(&self, partition_key: &str) -> Result<usize, SyncError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trader_volumes WHERE protocol = ?1",
            [partition_key],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    async fn partition_records(
        &self,
        partition_key: &str,
    ) -> Result<Vec<TraderVolumeRecord>, SyncError> {
        let protocol = partition_key.to_string();

        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT address, volume_usd FROM trader_volumes
                 WHERE protocol = ?1
                 ORDER BY volume_usd DESC, id ASC",
            )?;

            let rows = stmt.query_map([&protocol], |row| {
                Ok(TraderVolumeRecord::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                ))
            })?;

            let records = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn store_rank_statistics(
        &self,
        partition_key: &str,
        stats: &RankStatistics,
    ) -> Result<(), SyncError> {
        let brackets_json = serde_json::to_string(&stats.brackets)?;
        let m = &stats.metrics;
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO rank_snapshots (
                protocol, total_traders, total_volume_usd, avg_volume_per_trader,
                top1_percent_volume, top5_percent_volume,
                percentile99_volume, percentile95_volume,
                brackets_json, computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(protocol) DO UPDATE SET
                total_traders = excluded.total_traders,
                total_volume_usd = excluded.total_volume_usd,
                avg_volume_per_trader = excluded.avg_volume_per_trader,
                top1_percent_volume = excluded.top1_percent_volume,
                top5_percent_volume = excluded.top5_percent_volume,
                percentile99_volume = excluded.percentile99_volume,
                percentile95_volume = excluded.percentile95_volume,
                brackets_json = excluded.brackets_json,
                computed_at = excluded.computed_at
            "#,
            rusqlite::params![
                partition_key,
                m.total_traders as i64,
                m.total_volume,
                m.avg_volume_per_trader,
                m.top1_percent_volume,
                m.top5_percent_volume,
                m.percentile99_volume,
                m.percentile95_volume,
                brackets_json,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        Ok(())
    }

    async fn rank_statistics(
        &self,
        partition_key: &str,
    ) -> Result<Option<RankStatistics>, SyncError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                r#"
                SELECT total_traders, total_volume_usd, avg_volume_per_trader,
                       top1_percent_volume, top5_percent_volume,
                       percentile99_volume, percentile95_volume, brackets_json
                FROM rank_snapshots WHERE protocol = ?1
                "#,
                [partition_key],
                |row| {
                    let metrics = RankMetrics {
                        total_traders: row.get::<_, i64>(0)?.max(0) as usize,
                        total_volume: row.get(1)?,
                        avg_volume_per_trader: row.get(2)?,
                        top1_percent_volume: row.get(3)?,
                        top5_percent_volume: row.get(4)?,
                        percentile99_volume: row.get(5)?,
                        percentile95_volume: row.get(6)?,
                    };
                    Ok((metrics, row.get::<_, String>(7)?))
                },
            )
            .optional()?
        };

        match row {
            Some((metrics, brackets_json)) => {
                let brackets: Vec<PercentileBracket> = serde_json::from_str(&brackets_json)?;
                Ok(Some(RankStatistics { metrics, brackets }))
            }
            None => Ok(None),
        }
    }

    async fn record_sync_run(&self, entry: &SyncRunEntry) -> Result<(), SyncError> {
        let conn = self.lock()?;
        let result = &entry.result;

        conn.execute(
            r#"
            INSERT INTO sync_runs (
                protocol, success, no_data, rows_imported, error, rows_per_sec,
                started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                result.protocol,
                result.success,
                result.no_data,
                result.rows_imported as i64,
                result.error,
                result.rows_per_sec,
                entry.started_at,
                entry.finished_at,
            ],
        )?;

        Ok(())
    }
}
