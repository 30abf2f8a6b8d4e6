//! jumpdeck: journal watcher and route planner for the flight-sim companion.
//!
//! ## Subcommands
//!
//! - `watch`: Tail the game journal, drive the active route, print bus messages
//! - `plan`: Run one planner request and print the normalized route as JSON
//! - `jump-range`: Compute jump range from a Loadout event
//! - `config`: Read or write a settings key

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use jumpdeck_core::{NavEngine, StorageConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jumpdeck")]
#[command(about = "Journal watcher and route planner")]
#[command(version)]
struct Cli {
    /// Application data directory (settings, cache, logs)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail the journal and print every UI message as a JSON line
    Watch {
        /// Journal directory (defaults to the `log_dir` setting)
        #[arg(long, value_name = "DIR")]
        journal_dir: Option<PathBuf>,
    },

    /// Compute a route once and print it
    Plan(commands::PlanArgs),

    /// Compute jump range from a Loadout line (file, or the latest journal)
    JumpRange {
        /// File holding a Loadout journal line
        #[arg(long, value_name = "FILE")]
        loadout: Option<PathBuf>,
    },

    /// Read or write settings
    Config {
        #[command(subcommand)]
        action: commands::ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let storage = match cli.data_dir {
        Some(dir) => Some(StorageConfig::with_root(dir)),
        None => StorageConfig::resolve(),
    };
    let _logging_guard = logging::init(storage.as_ref().map(|s| s.logs_dir()).as_deref());

    let Some(storage) = storage else {
        tracing::error!("Could not resolve a settings location; pass --data-dir");
        std::process::exit(2);
    };
    let engine = match NavEngine::with_storage(storage) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "jumpdeck failed to start");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Watch { journal_dir } => commands::watch(&engine, journal_dir),
        Commands::Plan(args) => commands::plan(&engine, args),
        Commands::JumpRange { loadout } => commands::jump_range(&engine, loadout),
        Commands::Config { action } => commands::config(&engine, action),
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "jumpdeck command failed");
        std::process::exit(1);
    }
}
