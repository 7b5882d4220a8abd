//! Sync Runtime - bulk trader-volume ingestion
//!
//! This binary:
//! - Initializes the SQLite database with schema
//! - Syncs every configured protocol partition (one task per partition)
//! - Prints one JSON `SyncResult` per partition to stdout
//!
//! Usage:
//!   cargo run --release --bin sync_runtime
//!   cargo run --release --bin sync_runtime -- --only pumpswap
//!   cargo run --release --bin sync_runtime -- --rank-only
//!
//! Flags:
//!   --only <protocol>  Restrict the run to one configured partition
//!   --rank-only        Recompute rank statistics from stored rows, no download
//!
//! Environment variables: see `SyncConfig::from_env`. Logs go to stderr
//! (`RUST_LOG`, default `info`).

use dotenv::dotenv;
use log::{error, info};
use rusqlite::Connection;
use solrank::config::SyncConfig;
use solrank::service::SyncService;
use solrank::store::{run_schema_migrations, PartitionLoader, SqlitePartitionLoader};
use solrank::ExternalQueryHandle;
use std::sync::Arc;

#[derive(Debug, Default)]
struct CliArgs {
    only: Option<String>,
    rank_only: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rank-only" => parsed.rank_only = true,
            "--only" => {
                let protocol = args
                    .next()
                    .ok_or_else(|| "--only requires a protocol name".to_string())?;
                parsed.only = Some(protocol);
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    Ok(parsed)
}

fn select_handles(
    queries: &[ExternalQueryHandle],
    only: Option<&str>,
) -> Result<Vec<ExternalQueryHandle>, String> {
    match only {
        None => Ok(queries.to_vec()),
        Some(protocol) => {
            let selected: Vec<_> = queries
                .iter()
                .filter(|h| h.partition_key() == protocol)
                .cloned()
                .collect();
            if selected.is_empty() {
                return Err(format!("Protocol '{}' is not configured in SYNC_QUERIES", protocol));
            }
            Ok(selected)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = SyncConfig::from_env()?;
    let handles = select_handles(&config.queries, args.only.as_deref())?;

    info!("🚀 Sync Runtime");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Partitions: {}", handles.len());
    info!("   ├─ Chunk size: {} rows", config.chunk_size);
    info!("   ├─ Max parallel chunks: {}", config.max_parallel);
    info!("   ├─ Download retries: {}", config.download_retries);
    info!("   └─ Mode: {}", if args.rank_only { "rank only" } else { "full sync" });

    // Initialize database
    info!("🔧 Initializing database...");
    let mut conn = Connection::open(&config.db_path)?;
    run_schema_migrations(&mut conn, &config.schema_dir)?;
    drop(conn);

    let loader: Arc<dyn PartitionLoader> = Arc::new(SqlitePartitionLoader::open(
        &config.db_path,
        config.insert_batch_size,
    )?);
    info!("✅ Database initialized");

    let service = Arc::new(SyncService::from_config(&config, loader)?);

    if args.rank_only {
        let mut failed = 0;
        for handle in &handles {
            match service.rerank_partition(handle.partition_key()).await {
                Ok(stats) => println!(
                    "{}",
                    serde_json::json!({
                        "protocol": handle.partition_key(),
                        "metrics": stats.metrics,
                        "brackets": stats.brackets,
                    })
                ),
                Err(e) => {
                    error!("❌ Re-rank of {} failed: {}", handle.partition_key(), e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(format!("{} partition(s) failed to re-rank", failed).into());
        }
        return Ok(());
    }

    let results = service.sync_all(&handles).await;
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        error!("❌ {} of {} partition(s) failed", failed, results.len());
        return Err(format!("{} partition(s) failed to sync", failed).into());
    }

    info!("✅ Sync Runtime finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(args(&["--only", "pumpswap", "--rank-only"])).unwrap();
        assert_eq!(parsed.only.as_deref(), Some("pumpswap"));
        assert!(parsed.rank_only);

        assert!(parse_args(args(&["--only"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
    }

    #[test]
    fn test_select_handles() {
        let queries = vec![
            ExternalQueryHandle::new("1", "pumpswap"),
            ExternalQueryHandle::new("2", "bonkswap"),
        ];

        assert_eq!(select_handles(&queries, None).unwrap().len(), 2);
        let only = select_handles(&queries, Some("bonkswap")).unwrap();
        assert_eq!(only, vec![ExternalQueryHandle::new("2", "bonkswap")]);
        assert!(select_handles(&queries, Some("moonshot")).is_err());
    }
}
