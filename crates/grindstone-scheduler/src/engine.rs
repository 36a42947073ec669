//! Scheduler engine: spawns one control loop per (application, account)
//! pair and drives each attempt through the
//! `Idle → Selecting → Executing → {Succeeded, Failed, TimedOut} → Idle`
//! state machine.
//!
//! Loops for distinct accounts run concurrently as independent tokio
//! tasks. An account's TaskStatus rows and runtime counters are written
//! only by its own loop, so the only genuinely shared state is the cache
//! layer and the device mutex, held for one capture-and-act cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use grindstone_core::config::Settings;
use grindstone_core::error::Result;
use grindstone_core::traits::{ActivitySink, DeviceController, Navigator, TaskContext};
use grindstone_core::types::{ActivityEntry, AppStatus, Application, TaskSpec};
use grindstone_store::TaskStore;

use crate::registry::HandlerRegistry;

/// Terminal result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
    /// The deadline elapsed. The handler future is dropped at its next
    /// suspension point; the outcome is recorded as a failure with a
    /// timeout marker regardless of whether the device-side effect ever
    /// finished, and a late completion can no longer be reported against
    /// this pair.
    TimedOut,
}

pub struct SchedulerEngine {
    store: Arc<TaskStore>,
    handlers: Arc<HandlerRegistry>,
    navigator: Arc<dyn Navigator>,
    device: Arc<dyn DeviceController>,
    /// Serializes capture-and-act cycles on the shared physical device.
    device_lock: Arc<Mutex<()>>,
    sink: Arc<dyn ActivitySink>,
    settings: Arc<Settings>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<TaskStore>,
        handlers: Arc<HandlerRegistry>,
        navigator: Arc<dyn Navigator>,
        device: Arc<dyn DeviceController>,
        sink: Arc<dyn ActivitySink>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            handlers,
            navigator,
            device,
            device_lock: Arc::new(Mutex::new(())),
            sink,
            settings,
        }
    }

    /// Spawn one loop per active (application, account) pair.
    pub fn spawn(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        for app in self.store.apps() {
            if app.status != AppStatus::Active {
                tracing::debug!(app = %app.app_id, "Skipping non-active app");
                continue;
            }
            for account in self.store.accounts_for(&app.app_id)? {
                let engine = self.clone();
                let app = app.clone();
                let account_id = account.account_id.clone();
                tracing::info!("⏰ Scheduling loop started: {}/{}", app.app_id, account_id);
                handles.push(tokio::spawn(async move {
                    engine.run_account_loop(app, account_id).await;
                }));
            }
        }
        Ok(handles)
    }

    /// The per-account control loop. Never returns; the binary aborts the
    /// tasks on shutdown.
    async fn run_account_loop(self: Arc<Self>, app: Application, account_id: String) {
        // Start of the current contiguous run, None while parked.
        let mut slice_started: Option<Instant> = None;

        loop {
            let settings = self.settings.get();

            if let Some(started) = slice_started
                && started.elapsed() >= Duration::from_secs(app.time_slice)
            {
                // Time slice spent: force an idle gap before resuming.
                tracing::info!(
                    "⏸️ {}/{} time slice exhausted, idling {}s",
                    app.app_id,
                    account_id,
                    settings.idle_gap_secs
                );
                slice_started = None;
                if let Err(e) = self.store.set_app_status(&app.app_id, AppStatus::Suspended) {
                    tracing::warn!("Failed to suspend {}: {e}", app.app_id);
                }
                tokio::time::sleep(Duration::from_secs(settings.idle_gap_secs)).await;
                if let Err(e) = self.store.set_app_status(&app.app_id, AppStatus::Active) {
                    tracing::warn!("Failed to reactivate {}: {e}", app.app_id);
                }
                continue;
            }

            if slice_started.is_none() {
                // Fresh contiguous session: bring the app to the
                // foreground and stamp the login before the first attempt.
                match self.store.eligible_tasks(&account_id) {
                    Ok(eligible) if !eligible.is_empty() => {
                        self.begin_session(&app, &account_id).await;
                    }
                    _ => {}
                }
            }

            match self.attempt_once(&app, &account_id).await {
                Ok(Some(outcome)) => {
                    if slice_started.is_none() {
                        slice_started = Some(Instant::now());
                    }
                    tracing::debug!(
                        app = %app.app_id,
                        account = %account_id,
                        ?outcome,
                        "Attempt finished, re-selecting"
                    );
                    // Same account re-selects immediately: high-priority
                    // work never starves behind cross-account fairness.
                }
                Ok(None) => {
                    // Nothing eligible: park until the next poll.
                    slice_started = None;
                    tokio::time::sleep(Duration::from_secs(settings.poll_interval_secs)).await;
                }
                Err(e) => {
                    tracing::warn!("⚠️ {}/{} loop error: {e}", app.app_id, account_id);
                    tokio::time::sleep(Duration::from_secs(settings.poll_interval_secs)).await;
                }
            }
        }
    }

    /// Bring the account's application to the foreground and record the
    /// account switch, under the device mutex.
    async fn begin_session(&self, app: &Application, account_id: &str) {
        let _device = self.device_lock.lock().await;
        if let Some(package) = &app.package_name
            && let Err(e) = self.device.start_app(package).await
        {
            tracing::warn!("Failed to start {package}: {e}");
        }
        if let Err(e) = self.store.touch_login(account_id) {
            tracing::warn!("Failed to stamp login for {account_id}: {e}");
        }
        self.sink.record(
            ActivityEntry::new("switch_account", "success")
                .app(&app.app_id)
                .account(account_id),
        );
    }

    /// One full pass of the attempt state machine for an account:
    /// Selecting, Executing, outcome recording. Returns `None` when no
    /// task is eligible (the account parks).
    pub async fn attempt_once(
        &self,
        app: &Application,
        account_id: &str,
    ) -> Result<Option<AttemptOutcome>> {
        // Selecting.
        let eligible = self.store.eligible_tasks(account_id)?;
        let Some(task) = eligible.into_iter().next() else {
            return Ok(None);
        };
        tracing::info!(
            "🔔 {}/{} selected '{}' (priority {})",
            app.app_id,
            account_id,
            task.name,
            task.priority
        );

        // Executing, under the device mutex for the capture-and-act cycle.
        let started = Instant::now();
        let outcome = {
            let _device = self.device_lock.lock().await;
            self.execute(app, account_id, &task).await
        };
        let elapsed = started.elapsed();

        self.finish(app, account_id, &task, &outcome, elapsed)?;
        Ok(Some(outcome))
    }

    async fn execute(&self, app: &Application, account_id: &str, task: &TaskSpec) -> AttemptOutcome {
        let Some(handler) = self.handlers.get(&task.handler) else {
            return AttemptOutcome::Failed(format!("Unknown handler: {}", task.handler));
        };
        let account = match self.store.account(account_id) {
            Ok(account) => account,
            Err(e) => return AttemptOutcome::Failed(e.to_string()),
        };
        let ctx = TaskContext {
            app: app.clone(),
            account,
            task: task.clone(),
            device: self.device.clone(),
            navigator: self.navigator.clone(),
        };

        match tokio::time::timeout(task.timeout, handler.execute(&ctx)).await {
            Ok(Ok(snapshot)) => AttemptOutcome::Succeeded(snapshot),
            Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
            Err(_) => AttemptOutcome::TimedOut,
        }
    }

    /// Record the outcome: TaskStatus row, runtime accounting, activity
    /// log. Within one account these writes happen strictly in attempt
    /// completion order.
    fn finish(
        &self,
        app: &Application,
        account_id: &str,
        task: &TaskSpec,
        outcome: &AttemptOutcome,
        elapsed: Duration,
    ) -> Result<()> {
        self.store.add_runtime(account_id, elapsed.as_secs())?;

        let (success, error, snapshot, status) = match outcome {
            AttemptOutcome::Succeeded(snapshot) => {
                (true, None, snapshot.clone(), "success")
            }
            AttemptOutcome::Failed(e) => (false, Some(e.clone()), serde_json::Value::Null, "failure"),
            AttemptOutcome::TimedOut => (
                false,
                Some(format!("timeout after {}s", task.timeout.as_secs())),
                serde_json::Value::Null,
                "timeout",
            ),
        };
        let row = self
            .store
            .record_outcome(account_id, &task.task_id, success, error.as_deref(), snapshot)?;

        self.sink.record(
            ActivityEntry::new("task_execution", status)
                .app(&app.app_id)
                .account(account_id)
                .task(&task.task_id)
                .details(match &error {
                    Some(e) => format!("{} ({}s): {e}", task.name, elapsed.as_secs()),
                    None => format!("{} ({}s)", task.name, elapsed.as_secs()),
                }),
        );

        match outcome {
            AttemptOutcome::Succeeded(_) => {
                tracing::info!("✅ {}/{} '{}' completed", app.app_id, account_id, task.name);
            }
            _ => {
                tracing::warn!(
                    "⚠️ {}/{} '{}' failed (retry {}/{}): {}",
                    app.app_id,
                    account_id,
                    task.name,
                    row.retry_count,
                    task.max_retries,
                    error.as_deref().unwrap_or("unknown")
                );
            }
        }
        Ok(())
    }
}
