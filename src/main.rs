//! Grindstone daemon entry point: load configuration, open the store,
//! assemble the graph/recognizer/scheduler stack, and run the per-account
//! loops until interrupted. Configuration or store failure at startup is
//! fatal; the scheduler never runs against a partially loaded catalog.

mod stub;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use grindstone_cache::{CaptureCache, ResultCache};
use grindstone_core::clock;
use grindstone_core::config::{GrindConfig, Settings, SettingsSnapshot};
use grindstone_core::traits::{ActivitySink, DeviceController, FeatureExtractor};
use grindstone_scheduler::{BehaviorRegistry, GraphNavigator, HandlerRegistry, SchedulerEngine};
use grindstone_states::{StateGraph, StateRecognizer};
use grindstone_store::{Db, TaskStore};

#[derive(Parser)]
#[command(name = "grindstone", version, about = "Multi-account in-game task automation daemon")]
struct Cli {
    /// Config file path (default: ~/.grindstone/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduling daemon (default).
    Run,
    /// Show applications, account budgets, and recent activity.
    Status,
    /// Force an epoch reset for one application.
    Reset { app_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GrindConfig::load_from(path),
        None => GrindConfig::load(),
    }
    .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let db = Arc::new(
        Db::open(Path::new(&config.db_path)).context("Failed to open store, aborting")?,
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, db).await,
        Command::Status => status(&db),
        Command::Reset { app_id } => reset(&db, &app_id),
    }
}

async fn run(config: &GrindConfig, db: Arc<Db>) -> anyhow::Result<()> {
    let settings = Arc::new(Settings::new(SettingsSnapshot::from_rows(
        &db.load_settings().context("Failed to load settings")?,
    )));
    let snap = settings.get();

    // The graph is all-or-nothing: any inconsistent state or action row
    // aborts startup.
    let mut graph = StateGraph::new();
    for state in db.load_states().context("Failed to load recognition states")? {
        graph.add_state(state).context("Inconsistent state catalog")?;
    }
    for action in db.load_actions().context("Failed to load actions")? {
        graph.add_action(action).context("Inconsistent action catalog")?;
    }
    let graph = Arc::new(graph);
    tracing::info!(
        "State graph loaded: {} states, {} actions",
        graph.state_count(),
        graph.action_count()
    );

    let store = Arc::new(TaskStore::load(db.clone()).context("Failed to load task catalog")?);
    let sink: Arc<dyn ActivitySink> = db.clone();

    let device: Arc<dyn DeviceController> = match config.device.as_str() {
        "stub" => Arc::new(stub::StubDevice::new()),
        other => anyhow::bail!("Unknown device backend: {other}"),
    };
    let extractor: Arc<dyn FeatureExtractor> = Arc::new(stub::StubExtractor);

    let captures = Arc::new(CaptureCache::new(
        snap.capture_cache_size,
        Duration::from_millis(snap.capture_max_age_ms),
    ));
    let results = Arc::new(ResultCache::new(snap.result_cache_size));
    let recognizer = Arc::new(StateRecognizer::new(
        graph.clone(),
        captures,
        results,
        device.clone(),
        extractor,
        sink.clone(),
        Duration::from_secs(snap.recognition_ttl_secs),
        Duration::from_secs(snap.capture_timeout_secs),
    ));

    let behaviors = Arc::new(BehaviorRegistry::with_defaults());
    let handlers = Arc::new(HandlerRegistry::with_defaults());
    let navigator = Arc::new(GraphNavigator::new(
        graph,
        recognizer,
        device.clone(),
        behaviors,
        sink.clone(),
        snap.navigation_attempts,
        Duration::from_secs(2),
    ));

    // Settings and catalog changes take effect only through an explicit
    // reload; SIGHUP swaps in a fresh snapshot atomically.
    #[cfg(unix)]
    {
        let settings = settings.clone();
        let store = store.clone();
        let db = db.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut hup = match signal(SignalKind::hangup()) {
                Ok(hup) => hup,
                Err(e) => {
                    tracing::warn!("SIGHUP handler unavailable: {e}");
                    return;
                }
            };
            while hup.recv().await.is_some() {
                match db.load_settings() {
                    Ok(rows) => settings.reload(SettingsSnapshot::from_rows(&rows)),
                    Err(e) => tracing::warn!("Settings reload failed: {e}"),
                }
                if let Err(e) = store.reload() {
                    tracing::warn!("Task catalog reload failed: {e}");
                }
            }
        });
    }

    let engine = Arc::new(SchedulerEngine::new(
        store, handlers, navigator, device, sink, settings,
    ));
    let handles = engine.spawn().context("Failed to spawn scheduling loops")?;
    if handles.is_empty() {
        tracing::warn!("No active (application, account) pairs; nothing to schedule");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down {} scheduling loops", handles.len());
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

fn status(db: &Arc<Db>) -> anyhow::Result<()> {
    let store = TaskStore::load(db.clone())?;
    for app in store.apps() {
        println!(
            "{} [{}] priority={} daily_limit={}s",
            app.app_id,
            app.status.as_str(),
            app.priority,
            app.daily_limit
        );
        for account in store.accounts_for(&app.app_id)? {
            let budget = store.remaining_budget(&account.account_id)?;
            println!(
                "  {} [{}] runtime={}s remaining={}s",
                account.account_id,
                account.status.as_str(),
                account.daily_runtime,
                budget.as_secs()
            );
        }
    }
    println!("\nRecent activity:");
    for entry in db.recent_activity(10)? {
        println!(
            "  {} {} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            entry.status,
            entry.details.unwrap_or_default()
        );
    }
    Ok(())
}

fn reset(db: &Arc<Db>, app_id: &str) -> anyhow::Result<()> {
    let store = TaskStore::load(db.clone())?;
    let app = store
        .app(app_id)
        .with_context(|| format!("Unknown app: {app_id}"))?;
    let boundary = clock::last_boundary(chrono::Utc::now(), app.reset_time);
    db.reset_epoch(app_id, clock::is_week_start(boundary))?;
    db.set_setting(&format!("last_reset_{app_id}"), &boundary.to_rfc3339())?;
    println!("Epoch reset for {app_id}");
    Ok(())
}
