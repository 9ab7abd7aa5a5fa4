use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::storage::{self, SessionStore};

pub mod commands;

use self::commands::{
    AddArgs, CommandContext, ExportArgs, FilterArgs, ImportArgs, ListArgs, RandomArgs,
    SessionArgs,
};

const LOG_FILE_NAME: &str = "quotetui.log";

#[derive(Parser, Debug)]
#[command(
    name = "quotetui",
    version,
    about = "Terminal quote collection with categories and server sync"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over QUOTETUI_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over QUOTETUI_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Print a random quote and remember it for this session
    Random(RandomArgs),
    /// Add a quote from the command line
    Add(AddArgs),
    /// List stored quotes
    List(ListArgs),
    /// List known categories, marking the selected filter
    Categories,
    /// Select the category filter used by the TUI
    Filter(FilterArgs),
    /// Write every quote to a JSON file
    Export(ExportArgs),
    /// Append quotes from a JSON file
    Import(ImportArgs),
    /// Fetch quotes from the sync endpoint and merge them
    Pull,
    /// Send every stored quote to the sync endpoint
    Push,
    /// Manage the current shell session
    Session(SessionArgs),
    /// Print paths, storage health and sync settings
    Doctor,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("QUOTETUI_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("QUOTETUI_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);
    let log_file = matches!(command, Commands::Tui).then(|| paths.log_dir.join(LOG_FILE_NAME));
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&config.storage)?;

    let retention = config.session.retention();
    match SessionStore::purge_stale(&paths.session_dir, retention) {
        Ok(0) => {}
        Ok(purged) => tracing::info!(purged, "removed stale session files"),
        Err(err) => tracing::warn!(?err, "failed to purge stale sessions"),
    }
    let session = SessionStore::open_current(&paths.session_dir, retention)?;
    tracing::debug!(session_id = session.session_id(), "session opened");

    let ctx = CommandContext {
        config: Arc::new(config),
        paths,
        storage,
        session: Arc::new(session),
    };
    match command {
        Commands::Tui => commands::run_tui(&ctx),
        Commands::Random(args) => commands::random_quote(&ctx, args),
        Commands::Add(args) => commands::add_quote(&ctx, args),
        Commands::List(args) => commands::list_quotes(&ctx, args),
        Commands::Categories => commands::list_categories(&ctx),
        Commands::Filter(args) => commands::set_filter(&ctx, args),
        Commands::Export(args) => commands::export_quotes(&ctx, args),
        Commands::Import(args) => commands::import_quotes(&ctx, args),
        Commands::Pull => commands::pull_from_server(&ctx),
        Commands::Push => commands::push_to_server(&ctx),
        Commands::Session(args) => commands::handle_session_command(&ctx, args),
        Commands::Doctor => commands::doctor(&ctx),
    }
}

/// Logs go to stderr, or to `log_file` while the TUI owns the terminal.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating log dir {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_tui() {
        let cli = Cli::parse_from(["quotetui", "--log-level", "debug"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn add_takes_text_then_category() {
        let cli = Cli::parse_from(["quotetui", "add", "Stay curious", "Life", "--no-sync"]);
        match cli.command {
            Some(Commands::Add(args)) => {
                assert_eq!(args.text, "Stay curious");
                assert_eq!(args.category, "Life");
                assert!(args.no_sync);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
