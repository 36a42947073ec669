//! Task Store / Budget Tracker: answers eligibility queries and records
//! outcomes for (account, task) pairs.
//!
//! Eligibility filter, applied in order: enabled, parent completed for the
//! account, not already completed this epoch, retry allowance left, owning
//! account has budget. Ordering: priority descending, ties by task id.
//!
//! Epoch resets are lazy: every read first checks whether the owning
//! application's reset anchor was crossed since the last stamped reset and
//! zeroes counters exactly once if so. No background timer exists.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use grindstone_core::clock;
use grindstone_core::error::{GrindError, Result};
use grindstone_core::types::{Account, AccountStatus, AppStatus, Application, TaskSpec, TaskStatus};

use crate::db::Db;

struct Catalog {
    apps: HashMap<String, Application>,
    /// Tasks per app, pre-sorted priority descending then task id.
    tasks_by_app: HashMap<String, Vec<TaskSpec>>,
    tasks: HashMap<String, TaskSpec>,
}

impl Catalog {
    fn build(apps: Vec<Application>, mut tasks: Vec<TaskSpec>) -> Self {
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        let mut tasks_by_app: HashMap<String, Vec<TaskSpec>> = HashMap::new();
        let mut by_id = HashMap::new();
        for task in tasks {
            by_id.insert(task.task_id.clone(), task.clone());
            tasks_by_app.entry(task.app_id.clone()).or_default().push(task);
        }
        Self {
            apps: apps.into_iter().map(|a| (a.app_id.clone(), a)).collect(),
            tasks_by_app,
            tasks: by_id,
        }
    }
}

pub struct TaskStore {
    db: Arc<Db>,
    catalog: RwLock<Catalog>,
}

impl TaskStore {
    /// Load the full task catalog. Called once at startup; a failure here
    /// is fatal upstream.
    pub fn load(db: Arc<Db>) -> Result<Self> {
        let apps = db.load_apps()?;
        let tasks = db.load_tasks()?;
        tracing::info!("Loaded {} apps, {} tasks", apps.len(), tasks.len());
        Ok(Self {
            db,
            catalog: RwLock::new(Catalog::build(apps, tasks)),
        })
    }

    /// Re-read applications and tasks after a configuration edit
    /// (enabled flags, priorities). Swaps the whole catalog at once.
    pub fn reload(&self) -> Result<()> {
        let apps = self.db.load_apps()?;
        let tasks = self.db.load_tasks()?;
        let mut catalog = self.catalog.write().expect("catalog lock poisoned");
        *catalog = Catalog::build(apps, tasks);
        tracing::info!("Task catalog reloaded");
        Ok(())
    }

    pub fn apps(&self) -> Vec<Application> {
        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let mut apps: Vec<_> = catalog.apps.values().cloned().collect();
        apps.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.app_id.cmp(&b.app_id)));
        apps
    }

    pub fn app(&self, app_id: &str) -> Option<Application> {
        self.catalog
            .read()
            .expect("catalog lock poisoned")
            .apps
            .get(app_id)
            .cloned()
    }

    pub fn task(&self, task_id: &str) -> Option<TaskSpec> {
        self.catalog
            .read()
            .expect("catalog lock poisoned")
            .tasks
            .get(task_id)
            .cloned()
    }

    pub fn accounts_for(&self, app_id: &str) -> Result<Vec<Account>> {
        self.db.load_accounts(app_id)
    }

    pub fn account(&self, account_id: &str) -> Result<Account> {
        self.db
            .get_account(account_id)?
            .ok_or_else(|| GrindError::Store(format!("Unknown account: {account_id}")))
    }

    /// Eligible tasks for an account, ready to schedule, highest priority
    /// first. An empty result is the normal "nothing to do" answer.
    pub fn eligible_tasks(&self, account_id: &str) -> Result<Vec<TaskSpec>> {
        self.eligible_tasks_at(account_id, Utc::now())
    }

    fn eligible_tasks_at(&self, account_id: &str, now: DateTime<Utc>) -> Result<Vec<TaskSpec>> {
        let account = self.account(account_id)?;
        self.ensure_epoch_at(&account.app_id, now)?;
        // Re-read: the epoch check may have zeroed the runtime counter.
        let account = self.account(account_id)?;
        if account.status != AccountStatus::Active {
            return Ok(Vec::new());
        }

        let budget = self.budget_of(&account)?;
        if budget.is_zero() {
            // Exhausted budget is a scheduling exclusion, not an error.
            return Ok(Vec::new());
        }

        let statuses: HashMap<String, TaskStatus> = self
            .db
            .statuses_for_account(account_id)?
            .into_iter()
            .map(|s| (s.task_id.clone(), s))
            .collect();
        let completed =
            |task_id: &str| statuses.get(task_id).map(|s| s.completed).unwrap_or(false);

        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let tasks = match catalog.tasks_by_app.get(&account.app_id) {
            Some(tasks) => tasks,
            None => return Ok(Vec::new()),
        };

        let eligible = tasks
            .iter()
            .filter(|t| t.enabled)
            .filter(|t| t.parent_id.as_deref().map(&completed).unwrap_or(true))
            .filter(|t| !completed(&t.task_id))
            .filter(|t| {
                !statuses
                    .get(&t.task_id)
                    .map(|s| s.failed_epoch)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(eligible)
    }

    /// Seconds left of the owning application's daily limit for this
    /// account, after the lazy epoch check.
    pub fn remaining_budget(&self, account_id: &str) -> Result<Duration> {
        self.remaining_budget_at(account_id, Utc::now())
    }

    fn remaining_budget_at(&self, account_id: &str, now: DateTime<Utc>) -> Result<Duration> {
        let account = self.account(account_id)?;
        self.ensure_epoch_at(&account.app_id, now)?;
        let account = self.account(account_id)?;
        self.budget_of(&account)
    }

    fn budget_of(&self, account: &Account) -> Result<Duration> {
        let app = self.app(&account.app_id).ok_or_else(|| {
            GrindError::Store(format!("Account {} references unknown app", account.account_id))
        })?;
        Ok(Duration::from_secs(
            app.daily_limit.saturating_sub(account.daily_runtime),
        ))
    }

    /// Record one attempt's outcome.
    ///
    /// Success marks the pair completed for the epoch and leaves
    /// `retry_count` alone (it is a per-epoch failure counter). A failure
    /// increments `retry_count` up to the task's `max_retries`; a failure
    /// landing when the allowance is already spent parks the pair as
    /// failed-for-epoch instead of retrying again.
    pub fn record_outcome(
        &self,
        account_id: &str,
        task_id: &str,
        success: bool,
        error: Option<&str>,
        snapshot: serde_json::Value,
    ) -> Result<TaskStatus> {
        let task = self
            .task(task_id)
            .ok_or_else(|| GrindError::Store(format!("Unknown task: {task_id}")))?;
        let mut row = self
            .db
            .get_status(account_id, task_id)?
            .unwrap_or_else(|| TaskStatus::new(account_id, task_id));
        row.last_run_time = Some(Utc::now());

        if success {
            row.completed = true;
            row.completion_time = row.last_run_time;
            row.execution_data = snapshot;
        } else {
            row.last_error = error.map(|e| e.to_string());
            if row.retry_count < task.max_retries {
                row.retry_count += 1;
            } else {
                row.failed_epoch = true;
                tracing::warn!(
                    account = account_id,
                    task = task_id,
                    "Retry limit reached, parked for this epoch"
                );
            }
        }

        self.db.upsert_status(&row)?;
        Ok(row)
    }

    /// Charge executed seconds against the account's counters.
    pub fn add_runtime(&self, account_id: &str, seconds: u64) -> Result<()> {
        self.db.add_runtime(account_id, seconds)
    }

    pub fn touch_login(&self, account_id: &str) -> Result<()> {
        self.db.touch_login(account_id)
    }

    /// Toggle an application's lifecycle status (scheduler-owned).
    pub fn set_app_status(&self, app_id: &str, status: AppStatus) -> Result<()> {
        self.db.set_app_status(app_id, status)?;
        let mut catalog = self.catalog.write().expect("catalog lock poisoned");
        if let Some(app) = catalog.apps.get_mut(app_id) {
            app.status = status;
        }
        Ok(())
    }

    /// Lazy epoch maintenance. Idempotent: crossing the anchor several
    /// times before any read still produces a single reset.
    pub fn ensure_epoch(&self, app_id: &str) -> Result<()> {
        self.ensure_epoch_at(app_id, Utc::now())
    }

    fn ensure_epoch_at(&self, app_id: &str, now: DateTime<Utc>) -> Result<()> {
        let app = self
            .app(app_id)
            .ok_or_else(|| GrindError::Store(format!("Unknown app: {app_id}")))?;
        let key = format!("last_reset_{app_id}");
        let last = self
            .db
            .get_setting(&key)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc));

        if clock::crossed_since(last, now, app.reset_time) {
            let boundary = clock::last_boundary(now, app.reset_time);
            let include_weekly = clock::is_week_start(boundary);
            self.db.reset_epoch(app_id, include_weekly)?;
            self.db.set_setting(&key, &boundary.to_rfc3339())?;
            tracing::info!(app = app_id, weekly = include_weekly, "Epoch reset at {boundary}");
        }
        Ok(())
    }
}
