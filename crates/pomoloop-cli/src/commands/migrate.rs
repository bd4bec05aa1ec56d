use pomoloop_core::Config;

/// Open the ledger so pending migrations and the legacy backfill run.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = super::open_database(&config)?;
    println!("{}", serde_json::json!({ "schema_version": db.schema_version() }));
    Ok(())
}
