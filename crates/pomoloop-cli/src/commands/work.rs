use clap::Subcommand;
use pomoloop_core::storage::WorkRepository;
use pomoloop_core::{Config, StorageError};

#[derive(Subcommand)]
pub enum WorkAction {
    /// Create a work item
    Create {
        /// Title
        title: String,
        /// External number (ticket, issue)
        #[arg(long)]
        number: Option<String>,
        /// Also make it the current work
        #[arg(long)]
        select: bool,
    },
    /// List work items as JSON
    List,
    /// Show one work item
    Show {
        /// Work ID
        id: i64,
    },
    /// Update title and number
    Update {
        /// Work ID
        id: i64,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New number
        #[arg(long)]
        number: Option<String>,
    },
    /// Make a work item current ("none" clears it)
    Select {
        /// Work ID or "none"
        id: String,
    },
    /// Print the current work item
    Current,
}

pub fn run(action: WorkAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    let db = super::open_database(&config)?;

    match action {
        WorkAction::Create { title, number, select } => {
            let work = db.create_work(number.as_deref(), &title)?;
            if select {
                config.current_work_id = Some(work.id);
                config.save()?;
            }
            println!("{}", serde_json::to_string_pretty(&work)?);
        }
        WorkAction::List => {
            let works = db.works()?;
            println!("{}", serde_json::to_string_pretty(&works)?);
        }
        WorkAction::Show { id } => {
            let work = db.work(id)?.ok_or_else(|| not_found(id))?;
            println!("{}", serde_json::to_string_pretty(&work)?);
        }
        WorkAction::Update { id, title, number } => {
            let current = db.work(id)?.ok_or_else(|| not_found(id))?;
            let title = title.unwrap_or(current.title);
            let number = number.or(current.number);
            let work = db.update_work(id, number.as_deref(), &title)?;
            println!("{}", serde_json::to_string_pretty(&work)?);
        }
        WorkAction::Select { id } => {
            let selected = if id == "none" {
                None
            } else {
                let id: i64 = id.parse()?;
                db.work(id)?.ok_or_else(|| not_found(id))?;
                Some(id)
            };
            config.current_work_id = selected;
            config.save()?;
            println!("ok");
        }
        WorkAction::Current => match config.current_work_id {
            Some(id) => {
                let work = db.work(id)?.ok_or_else(|| not_found(id))?;
                println!("{}", serde_json::to_string_pretty(&work)?);
            }
            None => println!("null"),
        },
    }
    Ok(())
}

fn not_found(id: i64) -> StorageError {
    StorageError::NotFound {
        entity: "work",
        id: id.to_string(),
    }
}
