use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pomoloop", version, about = "Pomoloop interval timer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the looper in the foreground
    Run(commands::run::RunArgs),
    /// Work item management
    Work {
        #[command(subcommand)]
        action: commands::work::WorkAction,
    },
    /// Ledger inspection
    Events {
        #[command(subcommand)]
        action: commands::events::EventsAction,
    },
    /// Elapsed time statistics
    Stats {
        #[command(subcommand)]
        action: commands::stats::StatsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Time point cycle management
    TimePoints {
        #[command(subcommand)]
        action: commands::time_points::TimePointsAction,
    },
    /// Open the ledger, upgrading it if needed
    Migrate,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pomoloop=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Work { action } => commands::work::run(action),
        Commands::Events { action } => commands::events::run(action),
        Commands::Stats { action } => commands::stats::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::TimePoints { action } => commands::time_points::run(action),
        Commands::Migrate => commands::migrate::run(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
