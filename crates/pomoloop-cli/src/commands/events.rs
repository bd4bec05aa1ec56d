use chrono::{DateTime, Utc};
use clap::Subcommand;
use pomoloop_core::stats::Replay;
use pomoloop_core::storage::{ActiveTimePointRepository, WorkEventRepository};
use pomoloop_core::Config;

#[derive(Subcommand)]
pub enum EventsAction {
    /// List a work's ledger rows as JSON
    List {
        /// Work ID
        work_id: i64,
        /// Only rows at or after this RFC 3339 instant
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Only rows before this RFC 3339 instant
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Replay a work's ledger into intervals
    Replay {
        /// Work ID
        work_id: i64,
    },
    /// List the recorded active time points
    ActiveTimePoints,
}

pub fn run(action: EventsAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = super::open_database(&config)?;

    match action {
        EventsAction::List { work_id, from, to } => {
            let records = match (from, to) {
                (None, None) => db.events_for_work(work_id)?,
                (from, to) => db.events_for_work_in_period(
                    work_id,
                    from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    to.unwrap_or(DateTime::<Utc>::MAX_UTC),
                )?,
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        EventsAction::Replay { work_id } => {
            let catalog = db.active_time_points()?;
            let events = db.events_for_work(work_id)?;
            let mut replay = Replay::new().with_catalog(&catalog);
            replay.apply_all(events.iter().map(|r| &r.event));
            let report = replay.finish(Some(Utc::now()));
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        EventsAction::ActiveTimePoints => {
            let atps = db.active_time_points()?;
            println!("{}", serde_json::to_string_pretty(&atps)?);
        }
    }
    Ok(())
}
