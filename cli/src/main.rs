use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ocrbatch::config::loader::DB_PATH;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, EnvFilter};

mod commands;

/// Coordinate bulk OCR over a large PDF corpus.
#[derive(Debug, Parser)]
#[clap(
    name = "ocrbatch",
    version,
    after_help = r#"
Environment Variables:
  - OCRBATCH_DB_PATH: Catalog database file.
  - OCRBATCH_ROOT: Document root, when --root is not given.
  - OCR_LANG, OCR_SOFT_TIMEOUT, OCR_HARD_TIMEOUT, OCR_EXTRACT_TIMEOUT:
    OCR language and time limits (seconds).
  - OCRBATCH_WORKERS, OCRBATCH_QUEUE_CAPACITY: Worker pool sizing.
  - TASK_MAX_RETRIES, TASK_RETRY_DELAY: Task retry budget.
  - OPENSEARCH_URL, OPENSEARCH_INDEX (optional): Index extracted text.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Catalog database file (overrides OCRBATCH_DB_PATH).
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Walk the document root and register new or changed PDFs.
    Scan(ScanOpts),
    /// Recompute the path-ordered tree index of every node.
    Reindex,
    /// Attach file nodes that lost their parent directory link.
    RepairParents,
    /// Queue pending documents and process them with a local worker pool.
    DispatchRun(DispatchOpts),
    /// Move every failed document back to pending.
    RetryFailed,
    /// Move documents stuck in processing back to pending.
    FreeStuck(FreeStuckOpts),
    /// Print counts per status, stuck documents and recent failures.
    Status(StatusOpts),
    /// Poll progress until nothing is pending or processing.
    Monitor(MonitorOpts),
}

#[derive(Debug, Args)]
struct ScanOpts {
    /// Document root.
    #[clap(long)]
    root: Option<PathBuf>,
    /// Stop after this many files (for trial runs).
    #[clap(long)]
    limit: Option<usize>,
    /// Skip the tree index refresh after scanning.
    #[clap(long)]
    no_reindex: bool,
}

#[derive(Debug, Args)]
struct DispatchOpts {
    /// Document root.
    #[clap(long)]
    root: Option<PathBuf>,
    /// Dispatch at most this many documents.
    #[clap(long)]
    limit: Option<usize>,
    /// Worker threads. `1` processes documents one at a time.
    #[clap(long)]
    workers: Option<usize>,
}

#[derive(Debug, Args)]
struct FreeStuckOpts {
    /// Minutes in processing after which a document counts as stuck.
    #[clap(long)]
    minutes: Option<u64>,
}

#[derive(Debug, Args)]
struct StatusOpts {
    /// Print the report as JSON.
    #[clap(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct MonitorOpts {
    /// Seconds between polls.
    #[clap(long, default_value_t = 10)]
    interval: u64,
}

fn main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    init_logging()?;

    let opts = Opts::parse();
    log::debug!("Parsed options: {:?}", opts);

    let db_override = opts.db.as_ref().map(|p| p.to_string_lossy().into_owned());
    let settings = ocrbatch::load_settings_from(|key| match key {
        DB_PATH if db_override.is_some() => db_override.clone(),
        _ => std::env::var(key).ok(),
    })?;

    match opts.cmd {
        Cmd::Scan(o) => commands::scan(settings, o.root, o.limit, !o.no_reindex),
        Cmd::Reindex => commands::reindex(&settings),
        Cmd::RepairParents => commands::repair_parents(&settings),
        Cmd::DispatchRun(o) => commands::dispatch_run(settings, o.root, o.limit, o.workers),
        Cmd::RetryFailed => commands::retry_failed(&settings),
        Cmd::FreeStuck(o) => commands::free_stuck(settings, o.minutes),
        Cmd::Status(o) => commands::status(&settings, o.json),
        Cmd::Monitor(o) => commands::monitor(&settings, o.interval),
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default `info` level.
/// Records from the `log` facade are forwarded into tracing.
fn init_logging() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
