mod config;
pub mod backfill;
pub mod database;
pub mod ledger;
pub mod migrations;

pub use config::{Config, LooperConfig, PatternsConfig, TimePointSettings};
pub use database::Database;
pub use ledger::{
    spawn_writer, ActiveTimePointRepository, LedgerStore, LedgerWriter, Work, WorkEventRecord,
    WorkEventRepository, WorkRepository,
};

use std::path::PathBuf;

/// Returns `~/.config/pomoloop[-dev]/` based on POMOLOOP_ENV.
///
/// Set POMOLOOP_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("POMOLOOP_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("pomoloop-dev")
    } else {
        base_dir.join("pomoloop")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
