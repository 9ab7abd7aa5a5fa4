use std::fmt::Write as _;
use std::future::Future;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use crate::app::{App, QuoteController};
use crate::config::{AppConfig, ConfigPaths};
use crate::quotes::{
    AddError, CategoryFilter, CategoryIndex, DefaultReason, LoadOutcome, Quote, QuoteError,
};
use crate::storage::{KeyValueStore, SessionStore, StorageHandle};
use crate::sync::worker::WorkerSettings;
use crate::sync::{pull_quotes, push_quotes, HttpEndpoint, SyncWorker};

/// Everything a command needs, wired once by [`super::run`].
pub struct CommandContext {
    pub config: Arc<AppConfig>,
    pub paths: ConfigPaths,
    pub storage: StorageHandle,
    pub session: Arc<SessionStore>,
}

impl CommandContext {
    pub fn durable(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(self.storage.clone())
    }

    pub fn controller(&self) -> QuoteController {
        let session: Arc<dyn KeyValueStore> = self.session.clone();
        QuoteController::start(self.durable(), session)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RandomArgs {
    /// Only pick from this category
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Quote text, or `-` to read it from stdin
    pub text: String,
    /// Category for the new quote
    pub category: String,
    /// Skip the push to the sync endpoint after saving
    #[arg(long)]
    pub no_sync: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only list quotes in this category
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Category to select, or `all`
    pub category: String,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Destination file (defaults to display.export_file_name)
    pub path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// JSON file holding an array of {text, category} objects
    pub path: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// Forget everything stored for the current shell session
    End,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

pub fn run_tui(ctx: &CommandContext) -> Result<()> {
    let controller = ctx.controller();
    let worker = spawn_sync_worker(ctx)?;
    let mut app = App::new(ctx.config.clone(), controller, worker);
    app.run()
}

pub fn random_quote(ctx: &CommandContext, args: RandomArgs) -> Result<()> {
    let mut controller = ctx.controller();
    let filter = parse_filter(args.category.as_deref());
    let mut rng = rand::thread_rng();
    match controller.show_random_matching(&filter, &mut rng) {
        Some(quote) => println!("{}", format_quote(&quote)),
        None => bail!("no quotes in {}", filter.label()),
    }
    Ok(())
}

pub fn add_quote(ctx: &CommandContext, args: AddArgs) -> Result<()> {
    let text = if args.text == "-" {
        read_stdin()?.unwrap_or_default()
    } else {
        args.text
    };
    let mut controller = ctx.controller();
    let quote = match controller.add_quote(&text, &args.category) {
        Ok(quote) => quote,
        Err(AddError::Rejected(_)) => bail!("{}", QuoteError::PROMPT),
        Err(err @ AddError::Storage(_)) => return Err(err.into()),
    };
    println!("Added {}", format_quote(&quote));

    let sync = &ctx.config.sync;
    if args.no_sync || !sync.enabled || !sync.push_after_add {
        return Ok(());
    }
    let endpoint = HttpEndpoint::from_options(sync).context("creating sync client")?;
    let store = ctx.durable();
    match block_on(async { push_quotes(&endpoint, store.as_ref()).await })? {
        Ok(report) => println!("Quotes synced with server! ({} sent)", report.sent),
        Err(err) => tracing::error!(%err, "error syncing quotes with server"),
    }
    Ok(())
}

pub fn list_quotes(ctx: &CommandContext, args: ListArgs) -> Result<()> {
    let controller = ctx.controller();
    let filter = parse_filter(args.category.as_deref());
    let quotes = controller.repository().filtered(&filter);
    print!("{}", format_quote_list(&quotes));
    Ok(())
}

pub fn list_categories(ctx: &CommandContext) -> Result<()> {
    let controller = ctx.controller();
    print!(
        "{}",
        format_categories(controller.categories(), controller.filter())
    );
    Ok(())
}

pub fn set_filter(ctx: &CommandContext, args: FilterArgs) -> Result<()> {
    let mut controller = ctx.controller();
    let filter = parse_filter(Some(&args.category));
    controller
        .set_filter(filter)
        .with_context(|| format!("selecting category {}", args.category))?;
    println!(
        "Showing {} ({} quotes)",
        controller.filter().label(),
        controller.visible_quotes().len()
    );
    Ok(())
}

pub fn export_quotes(ctx: &CommandContext, args: ExportArgs) -> Result<()> {
    let path = args
        .path
        .unwrap_or_else(|| PathBuf::from(&ctx.config.display.export_file_name));
    let count = ctx.controller().export_to(&path)?;
    println!("Exported {count} quotes to {}", path.display());
    Ok(())
}

pub fn import_quotes(ctx: &CommandContext, args: ImportArgs) -> Result<()> {
    let count = ctx.controller().import_from(&args.path)?;
    println!("Quotes imported successfully! ({count} added)");
    Ok(())
}

pub fn pull_from_server(ctx: &CommandContext) -> Result<()> {
    let sync = &ctx.config.sync;
    let endpoint = HttpEndpoint::from_options(sync).context("creating sync client")?;
    let remote = block_on(pull_quotes(&endpoint, &sync.server_category))?
        .with_context(|| format!("fetching quotes from {}", endpoint.url()))?;
    let mut controller = ctx.controller();
    let count = controller.apply_pull(remote)?;
    println!(
        "Merged {count} quotes from server ({} total)",
        controller.quotes().len()
    );
    Ok(())
}

pub fn push_to_server(ctx: &CommandContext) -> Result<()> {
    let endpoint =
        HttpEndpoint::from_options(&ctx.config.sync).context("creating sync client")?;
    let store = ctx.durable();
    let report = block_on(async { push_quotes(&endpoint, store.as_ref()).await })?
        .with_context(|| format!("pushing quotes to {}", endpoint.url()))?;
    println!("Quotes synced with server! ({} sent)", report.sent);
    Ok(())
}

pub fn handle_session_command(ctx: &CommandContext, args: SessionArgs) -> Result<()> {
    match args.command {
        SessionCommand::End => {
            ctx.session.end().context("ending session")?;
            println!("Ended session {}", ctx.session.session_id());
        }
    }
    Ok(())
}

pub fn doctor(ctx: &CommandContext) -> Result<()> {
    print!("{}", run_doctor(ctx)?);
    Ok(())
}

fn run_doctor(ctx: &CommandContext) -> Result<String> {
    let controller = ctx.controller();
    let wal = ctx
        .storage
        .run_wal_health_check()
        .context("running WAL checkpoint")?;
    let keys = ctx.storage.list_keys().context("listing stored keys")?;
    let sync = &ctx.config.sync;

    let mut out = String::new();
    let _ = writeln!(&mut out, "config    {}", ctx.paths.config_file.display());
    let _ = writeln!(&mut out, "database  {}", ctx.storage.database_path().display());
    let _ = writeln!(
        &mut out,
        "session   {} ({})",
        ctx.session.session_id(),
        ctx.session.path().display()
    );
    let _ = writeln!(&mut out, "logs      {}", ctx.paths.log_dir.display());
    let _ = writeln!(&mut out, "keys      {}", keys.join(", "));
    let _ = writeln!(
        &mut out,
        "quotes    {}",
        describe_load(controller.load_outcome(), controller.quotes().len())
    );
    let _ = writeln!(
        &mut out,
        "wal       {} frames, {} checkpointed, {} busy",
        wal.wal_frames, wal.checkpointed_frames, wal.busy_frames
    );
    if sync.enabled {
        let _ = writeln!(
            &mut out,
            "sync      {} every {}s",
            sync.endpoint, sync.push_interval_secs
        );
    } else {
        let _ = writeln!(&mut out, "sync      disabled");
    }
    Ok(out)
}

fn spawn_sync_worker(ctx: &CommandContext) -> Result<Option<SyncWorker>> {
    let sync = &ctx.config.sync;
    if !sync.enabled {
        tracing::info!("sync disabled in config");
        return Ok(None);
    }
    let endpoint = HttpEndpoint::from_options(sync).context("creating sync client")?;
    let settings = WorkerSettings {
        server_category: sync.server_category.clone(),
        push_interval: Some(sync.push_interval()),
    };
    SyncWorker::spawn(Arc::new(endpoint), ctx.durable(), settings).map(Some)
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    Ok(runtime.block_on(future))
}

fn parse_filter(raw: Option<&str>) -> CategoryFilter {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading quote text from stdin")?;
    Ok(Some(buf))
}

fn format_quote(quote: &Quote) -> String {
    format!("\u{201c}{}\u{201d} ({})", quote.text, quote.category)
}

fn format_quote_list(quotes: &[&Quote]) -> String {
    if quotes.is_empty() {
        return "No quotes found.\n".to_string();
    }
    let width = quotes.len().to_string().len();
    let mut out = String::new();
    for (idx, quote) in quotes.iter().enumerate() {
        let _ = writeln!(
            &mut out,
            "{:>width$}. {} ({})",
            idx + 1,
            quote.text,
            quote.category
        );
    }
    out
}

fn format_categories(index: &CategoryIndex, current: &CategoryFilter) -> String {
    let mut out = String::new();
    for option in index.options() {
        let marker = if &option == current { '*' } else { ' ' };
        let _ = writeln!(&mut out, "{marker} {}", option.label());
    }
    out
}

fn describe_load(outcome: LoadOutcome, count: usize) -> String {
    match outcome {
        LoadOutcome::Loaded { .. } => format!("{count} stored"),
        LoadOutcome::Defaulted(reason) => {
            let reason = match reason {
                DefaultReason::Missing => "nothing stored yet",
                DefaultReason::Malformed => "stored list unreadable",
                DefaultReason::Unavailable => "storage unavailable",
            };
            format!("{count} defaults ({reason})")
        }
    }
}
