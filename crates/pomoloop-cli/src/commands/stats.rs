use chrono::{DateTime, Duration, Local, Utc};
use clap::Subcommand;
use pomoloop_core::stats::period_statistics;
use pomoloop_core::storage::WorkRepository;
use pomoloop_core::Config;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's stats (local midnight until now)
    Today,
    /// The last seven days
    Week,
    /// Stats for an explicit period
    Period {
        /// Start, RFC 3339
        #[arg(long)]
        from: DateTime<Utc>,
        /// End (exclusive), RFC 3339; defaults to now
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        /// Limit to these work IDs
        #[arg(long = "work")]
        works: Vec<i64>,
    },
}

fn local_midnight() -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    let midnight = Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .ok_or("cannot determine local midnight")?;
    Ok(midnight.with_timezone(&Utc))
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = super::open_database(&config)?;
    let now = Utc::now();

    let (from, to, works) = match action {
        StatsAction::Today => (local_midnight()?, now, Vec::new()),
        StatsAction::Week => (local_midnight()? - Duration::days(6), now, Vec::new()),
        StatsAction::Period { from, to, works } => (from, to.unwrap_or(now), works),
    };
    if from >= to {
        return Err(format!("empty period: {from} .. {to}").into());
    }

    let work_ids = if works.is_empty() {
        db.works()?.into_iter().map(|w| w.id).collect()
    } else {
        works
    };
    let stats = period_statistics(&db, work_ids, from, to)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
