use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::{Backend, CliConfig};

/// vstore: schema and upgrade tooling for versioned object stores.
///
/// Validate schema files, preview the upgrade steps they produce, and
/// inspect or clear checkpoints left by failed upgrades.
#[derive(Parser)]
#[command(name = "vstore", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to ./vstore.toml when it exists.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with schema files.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Inspect or clear checkpoints of incomplete upgrades.
    Checkpoints {
        /// Checkpoint backend (overrides the config file).
        #[arg(long, value_enum)]
        backend: Option<Backend>,

        /// Checkpoint file (overrides the config file).
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Validate a schema file and print the stores it defines.
    Check {
        /// Path to the schema TOML file.
        file: PathBuf,

        /// Print the stores as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run the upgrade against a scratch in-memory database and show the
    /// layout after each version.
    Plan {
        /// Path to the schema TOML file.
        file: PathBuf,

        /// Stop at this version instead of the latest.
        #[arg(short, long)]
        target: Option<u32>,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List all incomplete upgrades.
    List,

    /// Show the checkpoint of one database.
    Show {
        /// Database name.
        database: String,
    },

    /// Forget the checkpoint of one database, skipping its remaining
    /// callbacks.
    Flush {
        /// Database name.
        database: String,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Schema { action } => match action {
            SchemaAction::Check { file, json } => commands::schema_check(&file, json),
            SchemaAction::Plan { file, target } => commands::schema_plan(&file, target).await,
        },
        Commands::Checkpoints {
            backend,
            path,
            action,
        } => {
            let config = CliConfig::load(cli.config.as_deref())?
                .checkpoints
                .with_overrides(backend, path);
            let store = config.open()?;
            match action {
                CheckpointAction::List => commands::checkpoints_list(store.as_ref()),
                CheckpointAction::Show { database } => {
                    commands::checkpoints_show(store.as_ref(), &database)
                }
                CheckpointAction::Flush { database } => {
                    commands::checkpoints_flush(store.as_ref(), &database)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
