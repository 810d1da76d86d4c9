//! # fieldlens CLI (`lens`)
//!
//! ```bash
//! lens --config ./config/lens.toml init
//! lens verticals
//! lens identify ./monstera.jpg --vertical plant --save
//! lens collection list plant --sort confidence
//! lens collection remove plant <id>
//! lens serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fieldlens::fieldlens_core::collection::SortOrder;
use fieldlens::identify::IdentifyOptions;
use fieldlens::{collection_cmd, config, identify, logging, migrate, server, verticals};

/// Identify photographed objects and keep collections of them.
///
/// All commands accept `--config`; see `config/lens.example.toml`.
#[derive(Parser)]
#[command(name = "lens", version, about = "Identify photographed objects and keep collections of them")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and collections table. Safe to re-run.
    Init,

    /// List configured verticals.
    Verticals,

    /// Identify one image or audio file.
    Identify {
        /// File to submit.
        file: PathBuf,

        /// Vertical to identify against (e.g. `plant`, `bird`).
        #[arg(long, short)]
        vertical: String,

        /// Save the result to the vertical's collection.
        #[arg(long)]
        save: bool,

        /// MIME type; inferred from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,

        /// Retry a failed submission up to N times.
        #[arg(long, default_value = "0")]
        retry: u32,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or edit a vertical's collection.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// List saved entries.
    List {
        vertical: String,

        /// `newest` (default), `oldest`, or `confidence`.
        #[arg(long, default_value = "newest")]
        sort: SortOrder,

        /// Case-insensitive match on the vertical's display fields.
        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Remove an entry by id.
    Remove { vertical: String, id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Verticals => verticals::run_verticals(&cfg),
        Commands::Identify {
            file,
            vertical,
            save,
            mime,
            retry,
            json,
        } => {
            let options = IdentifyOptions {
                mime,
                save,
                retries: retry,
                json,
            };
            identify::run_identify(&cfg, &vertical, &file, &options).await?;
        }
        Commands::Collection { action } => match action {
            CollectionAction::List {
                vertical,
                sort,
                filter,
                json,
            } => collection_cmd::run_list(&cfg, &vertical, sort, filter, json).await?,
            CollectionAction::Remove { vertical, id } => {
                collection_cmd::run_remove(&cfg, &vertical, &id).await?
            }
        },
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
