use clap::Subcommand;
use pomoloop_core::timer::pattern;
use pomoloop_core::{Config, TimePointSettings};

#[derive(Subcommand)]
pub enum TimePointsAction {
    /// Print the configured cycle
    List,
    /// Print the saved patterns
    Patterns,
    /// Expand a pattern without saving it
    Preview {
        /// Pattern, e.g. "(w-b)3-w-lb"
        pattern: String,
    },
    /// Build the cycle from a pattern and save it
    Apply {
        /// Pattern, e.g. "(w-b)3-w-lb"
        pattern: String,
    },
    /// Forget the explicit cycle and fall back to the active pattern
    Clear,
}

pub fn run(action: TimePointsAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;

    match action {
        TimePointsAction::List => {
            let time_points = config.time_points()?;
            println!("{}", serde_json::to_string_pretty(&time_points)?);
        }
        TimePointsAction::Patterns => {
            println!("{}", serde_json::to_string_pretty(&config.patterns)?);
        }
        TimePointsAction::Preview { pattern } => {
            let time_points = pattern::expand(&pattern, &config.prototypes)?;
            println!("{}", serde_json::to_string_pretty(&time_points)?);
        }
        TimePointsAction::Apply { pattern } => {
            let time_points = config.apply_pattern(&pattern)?;
            config.save()?;
            println!("{}", serde_json::to_string_pretty(&time_points)?);
        }
        TimePointsAction::Clear => {
            config.time_points = None;
            config.save()?;
            println!("ok");
        }
    }
    Ok(())
}
