//! # Partition store
//!
//! SQLite persistence for per-protocol trader snapshots, their derived rank
//! statistics and the sync run ledger. Schema lives in `/sql/*.sql` and is
//! applied by `run_schema_migrations`.

pub mod db;

pub use db::{run_schema_migrations, PartitionLoader, SqlitePartitionLoader, SyncRunEntry};
