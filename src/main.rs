//! taskdeck command-line client.
//!
//! Drives the live sync layer and the import pipeline against a local
//! SQLite document store.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;
use taskdeck::cli::import::ImportArgs;
use taskdeck::cli::{AddArgs, Cli, Command};
use taskdeck::config::{Config, ConfigLoader, ConfigPaths};
use taskdeck::error::AppError;
use taskdeck::format::{
    self, OutputFormat, format_commit_report, format_file_status, format_summary_text,
};
use taskdeck::import::ImportPipeline;
use taskdeck::logging::{LevelFilter, Logger, Notice, Severity};
use taskdeck::session::Session;
use taskdeck::store::SqliteStore;
use taskdeck::sync::{LiveSync, MirrorState};
use taskdeck::types::{NewTask, Task, TaskId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

/// How long to wait for the first snapshot and its descriptions.
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for queued notices on exit.
const NOTICE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn init_tracing(cli: &Cli) -> Result<()> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    match cli.log.as_str() {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)
                .with_context(|| format!("Failed to open log file {}", filename))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut paths = ConfigPaths::discover();
    if let Some(path) = &cli.config {
        paths = paths.with_explicit_file(path);
    }
    let mut loader = ConfigLoader::load_with(paths, |key| std::env::var(key).ok())?;
    for (tier, path) in loader.sources() {
        debug!(tier = %tier, path = %path.display(), "Config source");
    }

    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.store.db_path = db_path.into();
    }
    if let Some(user) = &cli.user {
        config.session.default_user = Some(user.clone());
    }
    Ok(loader.into_config())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let path = &config.store.db_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

/// Print user-visible notices as they arrive. The task ends once every
/// sender is gone.
fn spawn_notice_printer(mut rx: mpsc::UnboundedReceiver<Notice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            let label = match notice.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Info => "info",
                Severity::Debug => "debug",
            };
            eprintln!("{}: {}", label, notice.message);
        }
    })
}

/// Wait for the first snapshot and every description fetch it started.
async fn loaded(sync: &LiveSync) -> Result<MirrorState> {
    let state = tokio::time::timeout(
        LOAD_TIMEOUT,
        sync.wait_for(|s| s.error.is_some() || (s.generation > 0 && s.is_settled())),
    )
    .await
    .context("Timed out waiting for tasks")?;
    if let Some(err) = &state.error {
        return Err(err.clone().into());
    }
    Ok(state)
}

async fn find_task(sync: &LiveSync, id: &str) -> Result<Task> {
    let state = loaded(sync).await?;
    let id = TaskId::new(id);
    match state.task(&id) {
        Some(task) => Ok(task.clone()),
        None => Err(AppError::task_not_found(id.as_str()).into()),
    }
}

async fn run_add(sync: &LiveSync, args: AddArgs) -> Result<()> {
    let mut new_task = NewTask::new(args.text);
    new_task.description = args.description;
    new_task.due_date = args.due;
    let id = sync.create_task(new_task).await?;
    println!("{}", id);
    Ok(())
}

async fn run_import(
    session: &Session,
    sync: &LiveSync,
    config: &Config,
    args: ImportArgs,
) -> Result<()> {
    info!(mode = args.import_mode(), files = args.files.len(), "Importing");
    let (payloads, unreadable) = args.payloads();
    for (path, e) in &unreadable {
        eprintln!("{}: {}", path.display(), e);
    }

    let pipeline = ImportPipeline::new(session, config.import.clone());
    // Rejections are reported through the notice channel.
    pipeline.submit_files(payloads);
    let state = pipeline.wait_idle().await;
    for file in &state.files {
        println!("{}", format_file_status(file));
    }
    print!("{}", format_summary_text(&pipeline.summary()));

    if args.dry_run {
        return Ok(());
    }
    let report = pipeline.commit_to(sync).await?;
    println!("{}", format_commit_report(&report));
    match report.error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn run_watch(store: &SqliteStore, sync: &LiveSync, config: &Config) -> Result<()> {
    let poller =
        store.watch_external_changes(Duration::from_millis(config.store.poll_interval_ms));
    let mut rx = sync.watch();
    let initial = loaded(sync).await?;
    println!("{}", format::format_tasks(&initial, OutputFormat::Text));
    let mut printed = initial.generation;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if let Some(err) = &state.error {
                    eprintln!("{}", err);
                }
                if state.generation > printed && state.is_settled() {
                    printed = state.generation;
                    println!("{}", format::format_tasks(&state, OutputFormat::Text));
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    poller.abort();
    Ok(())
}

async fn run(
    command: Command,
    store: &SqliteStore,
    session: &Session,
    config: &Config,
) -> Result<()> {
    let sync = LiveSync::connect(session).await?;
    match command {
        Command::List(args) => {
            let state = loaded(&sync).await?;
            println!("{}", format::format_tasks(&state, args.format.into()));
        }
        Command::Add(args) => run_add(&sync, args).await?,
        Command::Toggle { id } => {
            let task = find_task(&sync, &id).await?;
            sync.toggle_completion(&task).await?;
            println!("{} -> {}", task.id, if task.completed { "open" } else { "done" });
        }
        Command::Delete { id } => {
            sync.delete_task(&TaskId::new(id)).await?;
        }
        Command::Describe { id, text } => {
            let task = find_task(&sync, &id).await?;
            let version = sync.add_description_revision(&task.id, &text).await?;
            println!("{} description v{}", task.id, version);
        }
        Command::Import(args) => run_import(session, &sync, config, args).await?,
        Command::Watch => run_watch(store, &sync, config).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = load_config(&cli)?;
    let Some(user) = config.session.default_user.clone() else {
        bail!("No user given: pass --user or set TASKDECK_USER");
    };

    let store = open_store(&config)?;
    let level = Arc::new(LevelFilter::new(config.logging.severity()));
    if cli.verbose {
        level.set(Severity::Debug);
    }
    debug!(level = ?level.get(), "Notice level");
    let (logger, notices) = Logger::with_channel();
    let printer = spawn_notice_printer(notices);

    let session = Session::new(Arc::new(store.clone()))
        .with_logger(logger.with_level_filter(level))
        .with_user(user);
    let result = run(cli.command, &store, &session, &config).await;

    // Dropping the last logger closes the channel; wait for the backlog.
    drop(session);
    if tokio::time::timeout(NOTICE_DRAIN_TIMEOUT, printer).await.is_err() {
        debug!("Notice printer did not finish");
    }
    result
}
