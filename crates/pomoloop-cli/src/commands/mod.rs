pub mod config;
pub mod events;
pub mod migrate;
pub mod run;
pub mod stats;
pub mod time_points;
pub mod work;

use pomoloop_core::storage::data_dir;
use pomoloop_core::{Config, Database, TimePointSettings};

/// Open the ledger, backfilling legacy rows against the configured cycle.
pub fn open_database(config: &Config) -> Result<Database, Box<dyn std::error::Error>> {
    let path = data_dir()?.join("pomoloop.db");
    let catalog = config.time_points()?;
    Ok(Database::open_at(&path, &catalog)?)
}
