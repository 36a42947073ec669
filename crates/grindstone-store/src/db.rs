//! SQLite record store. One connection behind a mutex; every row type in
//! the data model gets a save/load pair with explicit column mapping.
//! Timestamps are stored as RFC 3339 text.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use grindstone_core::clock;
use grindstone_core::error::{GrindError, Result};
use grindstone_core::traits::ActivitySink;
use grindstone_core::types::{
    Account, AccountStatus, ActionEdge, ActivityEntry, AppStatus, Application, RecognitionState,
    Setting, TaskKind, TaskSpec, TaskStatus,
};

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open or create the database. Failure here aborts startup.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS apps (
                app_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                package_name TEXT,
                priority INTEGER NOT NULL DEFAULT 5,
                time_slice INTEGER NOT NULL DEFAULT 3600,
                daily_limit INTEGER NOT NULL DEFAULT 7200,
                reset_time TEXT NOT NULL DEFAULT '04:00',
                status TEXT NOT NULL DEFAULT 'inactive',
                config TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS accounts (
                account_id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                username TEXT NOT NULL DEFAULT '',
                credential TEXT NOT NULL DEFAULT '',
                login_type TEXT NOT NULL DEFAULT 'default',
                last_login_time TEXT,
                total_runtime INTEGER NOT NULL DEFAULT 0,
                daily_runtime INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                extra TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (app_id) REFERENCES apps(app_id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                name TEXT NOT NULL,
                parent_id TEXT,
                kind TEXT NOT NULL DEFAULT 'daily',
                priority INTEGER NOT NULL DEFAULT 5,
                max_retries INTEGER NOT NULL DEFAULT 3,
                timeout INTEGER NOT NULL DEFAULT 300,
                enabled INTEGER NOT NULL DEFAULT 1,
                config TEXT NOT NULL DEFAULT '{}',
                handler TEXT NOT NULL,
                FOREIGN KEY (app_id) REFERENCES apps(app_id),
                FOREIGN KEY (parent_id) REFERENCES tasks(task_id)
            );

            -- One row per (account, task) pair. Never deleted: the rows are
            -- the audit trail and the idempotence guard against re-running
            -- completed work inside an epoch.
            CREATE TABLE IF NOT EXISTS task_status (
                account_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                completion_time TEXT,
                last_run_time TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                failed_epoch INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                execution_data TEXT NOT NULL DEFAULT 'null',
                PRIMARY KEY (account_id, task_id),
                FOREIGN KEY (account_id) REFERENCES accounts(account_id),
                FOREIGN KEY (task_id) REFERENCES tasks(task_id)
            );

            CREATE TABLE IF NOT EXISTS recognition_states (
                state_id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                name TEXT NOT NULL,
                features TEXT NOT NULL DEFAULT '[]',
                rois TEXT NOT NULL DEFAULT '[]',
                threshold REAL NOT NULL DEFAULT 0.8,
                parent_state TEXT,
                FOREIGN KEY (app_id) REFERENCES apps(app_id)
            );

            CREATE TABLE IF NOT EXISTS actions (
                action_id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_state TEXT NOT NULL,
                to_state TEXT NOT NULL,
                name TEXT NOT NULL,
                behavior TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (from_state) REFERENCES recognition_states(state_id),
                FOREIGN KEY (to_state) REFERENCES recognition_states(state_id)
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                app_id TEXT,
                account_id TEXT,
                task_id TEXT,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_app ON accounts(app_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_app ON tasks(app_id);
            CREATE INDEX IF NOT EXISTS idx_task_status_account ON task_status(account_id);
            CREATE INDEX IF NOT EXISTS idx_activity_log_timestamp ON activity_log(timestamp);
         ",
            )
            .map_err(store_err)
    }

    // ─── Applications ──────────────────────────────────────

    pub fn save_app(&self, app: &Application) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO apps
                 (app_id, name, package_name, priority, time_slice, daily_limit, reset_time, status, config)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    app.app_id,
                    app.name,
                    app.package_name,
                    app.priority,
                    app.time_slice,
                    app.daily_limit,
                    app.reset_time.format("%H:%M").to_string(),
                    app.status.as_str(),
                    app.config.to_string(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn load_apps(&self) -> Result<Vec<Application>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT app_id, name, package_name, priority, time_slice, daily_limit,
                        reset_time, status, config
                 FROM apps ORDER BY priority DESC, app_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                let reset_raw: String = row.get(6)?;
                Ok(Application {
                    app_id: row.get(0)?,
                    name: row.get(1)?,
                    package_name: row.get(2)?,
                    priority: row.get(3)?,
                    time_slice: row.get(4)?,
                    daily_limit: row.get(5)?,
                    reset_time: clock::parse_reset_time(&reset_raw)
                        .unwrap_or_else(|| clock::parse_reset_time("04:00").unwrap()),
                    status: AppStatus::parse(&row.get::<_, String>(7)?),
                    config: parse_json(row.get::<_, String>(8)?),
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn set_app_status(&self, app_id: &str, status: AppStatus) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE apps SET status = ?1 WHERE app_id = ?2",
                rusqlite::params![status.as_str(), app_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ─── Accounts ──────────────────────────────────────────

    pub fn save_account(&self, account: &Account) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO accounts
                 (account_id, app_id, username, credential, login_type, last_login_time,
                  total_runtime, daily_runtime, status, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    account.account_id,
                    account.app_id,
                    account.username,
                    account.credential,
                    account.login_type,
                    account.last_login_time.map(|t| t.to_rfc3339()),
                    account.total_runtime,
                    account.daily_runtime,
                    account.status.as_str(),
                    account.extra.to_string(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT account_id, app_id, username, credential, login_type, last_login_time,
                        total_runtime, daily_runtime, status, extra
                 FROM accounts WHERE account_id = ?1",
            )
            .map_err(store_err)?;
        let account = stmt
            .query_row([account_id], map_account)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(store_err)?;
        Ok(account)
    }

    pub fn load_accounts(&self, app_id: &str) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT account_id, app_id, username, credential, login_type, last_login_time,
                        total_runtime, daily_runtime, status, extra
                 FROM accounts WHERE app_id = ?1 ORDER BY account_id",
            )
            .map_err(store_err)?;
        let rows = stmt.query_map([app_id], map_account).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Add runtime seconds to both the epoch and lifetime counters.
    pub fn add_runtime(&self, account_id: &str, seconds: u64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE accounts
                 SET daily_runtime = daily_runtime + ?1, total_runtime = total_runtime + ?1
                 WHERE account_id = ?2",
                rusqlite::params![seconds, account_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn touch_login(&self, account_id: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE accounts SET last_login_time = ?1 WHERE account_id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), account_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ─── Tasks ─────────────────────────────────────────────

    pub fn save_task(&self, task: &TaskSpec) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO tasks
                 (task_id, app_id, name, parent_id, kind, priority, max_retries, timeout,
                  enabled, config, handler)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    task.task_id,
                    task.app_id,
                    task.name,
                    task.parent_id,
                    task.kind.as_str(),
                    task.priority,
                    task.max_retries,
                    task.timeout.as_secs(),
                    task.enabled as i32,
                    task.config.to_string(),
                    task.handler,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn load_tasks(&self) -> Result<Vec<TaskSpec>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT task_id, app_id, name, parent_id, kind, priority, max_retries, timeout,
                        enabled, config, handler
                 FROM tasks ORDER BY task_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TaskSpec {
                    task_id: row.get(0)?,
                    app_id: row.get(1)?,
                    name: row.get(2)?,
                    parent_id: row.get(3)?,
                    kind: TaskKind::parse(&row.get::<_, String>(4)?),
                    priority: row.get(5)?,
                    max_retries: row.get(6)?,
                    timeout: Duration::from_secs(row.get(7)?),
                    enabled: row.get::<_, i32>(8)? != 0,
                    config: parse_json(row.get::<_, String>(9)?),
                    handler: row.get(10)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    // ─── Recognition states & actions ──────────────────────

    pub fn save_state(&self, state: &RecognitionState) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO recognition_states
                 (state_id, app_id, name, features, rois, threshold, parent_state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    state.state_id,
                    state.app_id,
                    state.name,
                    serde_json::to_string(&state.features).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&state.rois).unwrap_or_else(|_| "[]".into()),
                    state.threshold,
                    state.parent_state,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn load_states(&self) -> Result<Vec<RecognitionState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT state_id, app_id, name, features, rois, threshold, parent_state
                 FROM recognition_states ORDER BY state_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RecognitionState {
                    state_id: row.get(0)?,
                    app_id: row.get(1)?,
                    name: row.get(2)?,
                    features: serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                    rois: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    threshold: row.get(5)?,
                    parent_state: row.get(6)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn save_action(&self, action: &ActionEdge) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO actions (from_state, to_state, name, behavior, params)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    action.from_state,
                    action.to_state,
                    action.name,
                    action.behavior,
                    action.params.to_string(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Actions in insertion order; the graph's tie-breaking depends on it.
    pub fn load_actions(&self) -> Result<Vec<ActionEdge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT from_state, to_state, name, behavior, params
                 FROM actions ORDER BY action_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActionEdge {
                    from_state: row.get(0)?,
                    to_state: row.get(1)?,
                    name: row.get(2)?,
                    behavior: row.get(3)?,
                    params: parse_json(row.get::<_, String>(4)?),
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    // ─── Settings ──────────────────────────────────────────

    pub fn load_settings(&self) -> Result<Vec<Setting>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT key, value, description FROM settings ORDER BY key")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    description: row.get(2)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(store_err)?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ─── Task status ───────────────────────────────────────

    pub fn get_status(&self, account_id: &str, task_id: &str) -> Result<Option<TaskStatus>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT account_id, task_id, completed, completion_time, last_run_time,
                        retry_count, failed_epoch, last_error, execution_data
                 FROM task_status WHERE account_id = ?1 AND task_id = ?2",
            )
            .map_err(store_err)?;
        let status = stmt
            .query_row([account_id, task_id], map_status)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(store_err)?;
        Ok(status)
    }

    pub fn statuses_for_account(&self, account_id: &str) -> Result<Vec<TaskStatus>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT account_id, task_id, completed, completion_time, last_run_time,
                        retry_count, failed_epoch, last_error, execution_data
                 FROM task_status WHERE account_id = ?1",
            )
            .map_err(store_err)?;
        let rows = stmt.query_map([account_id], map_status).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn upsert_status(&self, status: &TaskStatus) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO task_status
                 (account_id, task_id, completed, completion_time, last_run_time,
                  retry_count, failed_epoch, last_error, execution_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    status.account_id,
                    status.task_id,
                    status.completed as i32,
                    status.completion_time.map(|t| t.to_rfc3339()),
                    status.last_run_time.map(|t| t.to_rfc3339()),
                    status.retry_count,
                    status.failed_epoch as i32,
                    status.last_error,
                    status.execution_data.to_string(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ─── Epoch reset ───────────────────────────────────────

    /// Zero the epoch for one application: daily runtime back to 0,
    /// Daily-task completions and retry allowances cleared. Weekly
    /// completions clear only when the boundary opens a new week.
    pub fn reset_epoch(&self, app_id: &str, include_weekly: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET daily_runtime = 0 WHERE app_id = ?1",
            [app_id],
        )
        .map_err(store_err)?;

        let kinds: &str = if include_weekly {
            "('daily', 'weekly')"
        } else {
            "('daily')"
        };
        conn.execute(
            &format!(
                "UPDATE task_status
                 SET completed = 0, completion_time = NULL, retry_count = 0,
                     failed_epoch = 0, last_error = NULL
                 WHERE task_id IN (SELECT task_id FROM tasks WHERE app_id = ?1 AND kind IN {kinds})"
            ),
            [app_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ─── Activity log ──────────────────────────────────────

    pub fn log_activity(&self, entry: &ActivityEntry) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO activity_log (timestamp, app_id, account_id, task_id, action, status, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    entry.timestamp.to_rfc3339(),
                    entry.app_id,
                    entry.account_id,
                    entry.task_id,
                    entry.action,
                    entry.status,
                    entry.details,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, app_id, account_id, task_id, action, status, details
                 FROM activity_log ORDER BY log_id DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(ActivityEntry {
                    timestamp: parse_time(row.get::<_, String>(0)?).unwrap_or_else(Utc::now),
                    app_id: row.get(1)?,
                    account_id: row.get(2)?,
                    task_id: row.get(3)?,
                    action: row.get(4)?,
                    status: row.get(5)?,
                    details: row.get(6)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

/// The activity log is append-only and best-effort: a failed write is
/// logged, never propagated into the scheduling path.
impl ActivitySink for Db {
    fn record(&self, entry: ActivityEntry) {
        if let Err(e) = self.log_activity(&entry) {
            tracing::warn!("Failed to write activity log: {e}");
        }
    }
}

fn store_err(e: impl std::fmt::Display) -> GrindError {
    GrindError::Store(e.to_string())
}

fn parse_json(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)
}

fn parse_time(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_id: row.get(0)?,
        app_id: row.get(1)?,
        username: row.get(2)?,
        credential: row.get(3)?,
        login_type: row.get(4)?,
        last_login_time: row.get::<_, Option<String>>(5)?.and_then(parse_time),
        total_runtime: row.get(6)?,
        daily_runtime: row.get(7)?,
        status: AccountStatus::parse(&row.get::<_, String>(8)?),
        extra: parse_json(row.get::<_, String>(9)?),
    })
}

fn map_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskStatus> {
    Ok(TaskStatus {
        account_id: row.get(0)?,
        task_id: row.get(1)?,
        completed: row.get::<_, i32>(2)? != 0,
        completion_time: row.get::<_, Option<String>>(3)?.and_then(parse_time),
        last_run_time: row.get::<_, Option<String>>(4)?.and_then(parse_time),
        retry_count: row.get(5)?,
        failed_epoch: row.get::<_, i32>(6)? != 0,
        last_error: row.get(7)?,
        execution_data: parse_json(row.get::<_, String>(8)?),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use grindstone_core::clock::parse_reset_time;

    pub(crate) fn temp_db(name: &str) -> (Db, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("grindstone-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        (Db::open(&path).unwrap(), dir)
    }

    pub(crate) fn sample_app(app_id: &str) -> Application {
        Application {
            app_id: app_id.to_string(),
            name: "Sample Game".to_string(),
            package_name: Some("com.sample.game".to_string()),
            priority: 5,
            time_slice: 3600,
            daily_limit: 7200,
            reset_time: parse_reset_time("04:00").unwrap(),
            status: AppStatus::Active,
            config: serde_json::json!({}),
        }
    }

    pub(crate) fn sample_account(account_id: &str, app_id: &str) -> Account {
        Account {
            account_id: account_id.to_string(),
            app_id: app_id.to_string(),
            username: "player".to_string(),
            credential: "opaque".to_string(),
            login_type: "default".to_string(),
            last_login_time: None,
            total_runtime: 0,
            daily_runtime: 0,
            status: AccountStatus::Active,
            extra: serde_json::json!({}),
        }
    }

    pub(crate) fn sample_task(task_id: &str, app_id: &str, priority: i32) -> TaskSpec {
        TaskSpec {
            task_id: task_id.to_string(),
            app_id: app_id.to_string(),
            name: task_id.to_string(),
            parent_id: None,
            kind: TaskKind::Daily,
            priority,
            max_retries: 3,
            timeout: Duration::from_secs(300),
            enabled: true,
            config: serde_json::json!({}),
            handler: "signin".to_string(),
        }
    }

    #[test]
    fn test_open_and_migrate() {
        let (db, dir) = temp_db("migrate");
        assert!(db.load_apps().unwrap().is_empty());
        assert!(db.load_tasks().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_app_roundtrip() {
        let (db, dir) = temp_db("app-roundtrip");
        db.save_app(&sample_app("game-a")).unwrap();
        let apps = db.load_apps().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].app_id, "game-a");
        assert_eq!(apps[0].reset_time, parse_reset_time("04:00").unwrap());
        assert_eq!(apps[0].status, AppStatus::Active);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_runtime_accounting() {
        let (db, dir) = temp_db("runtime");
        db.save_app(&sample_app("game-a")).unwrap();
        db.save_account(&sample_account("acct-1", "game-a")).unwrap();

        db.add_runtime("acct-1", 120).unwrap();
        db.add_runtime("acct-1", 60).unwrap();
        let account = db.get_account("acct-1").unwrap().unwrap();
        assert_eq!(account.daily_runtime, 180);
        assert_eq!(account.total_runtime, 180);

        db.reset_epoch("game-a", false).unwrap();
        let account = db.get_account("acct-1").unwrap().unwrap();
        assert_eq!(account.daily_runtime, 0);
        // Lifetime counter survives the epoch.
        assert_eq!(account.total_runtime, 180);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_status_upsert_keeps_one_row_per_pair() {
        let (db, dir) = temp_db("status-unique");
        db.save_app(&sample_app("game-a")).unwrap();
        db.save_account(&sample_account("acct-1", "game-a")).unwrap();
        db.save_task(&sample_task("task-1", "game-a", 5)).unwrap();

        let mut status = TaskStatus::new("acct-1", "task-1");
        db.upsert_status(&status).unwrap();
        status.retry_count = 2;
        db.upsert_status(&status).unwrap();

        let rows = db.statuses_for_account("acct-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].retry_count, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_epoch_reset_scopes_weekly() {
        let (db, dir) = temp_db("epoch-weekly");
        db.save_app(&sample_app("game-a")).unwrap();
        db.save_account(&sample_account("acct-1", "game-a")).unwrap();
        let mut weekly = sample_task("task-weekly", "game-a", 5);
        weekly.kind = TaskKind::Weekly;
        db.save_task(&weekly).unwrap();
        db.save_task(&sample_task("task-daily", "game-a", 5)).unwrap();

        for task_id in ["task-weekly", "task-daily"] {
            let mut status = TaskStatus::new("acct-1", task_id);
            status.completed = true;
            status.completion_time = Some(Utc::now());
            db.upsert_status(&status).unwrap();
        }

        db.reset_epoch("game-a", false).unwrap();
        let rows = db.statuses_for_account("acct-1").unwrap();
        let daily = rows.iter().find(|s| s.task_id == "task-daily").unwrap();
        let weekly = rows.iter().find(|s| s.task_id == "task-weekly").unwrap();
        assert!(!daily.completed);
        assert!(weekly.completed, "weekly completion survives a daily reset");

        db.reset_epoch("game-a", true).unwrap();
        let rows = db.statuses_for_account("acct-1").unwrap();
        assert!(rows.iter().all(|s| !s.completed));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_activity_log_append() {
        let (db, dir) = temp_db("activity");
        db.record(ActivityEntry::new("task_execution", "success").app("game-a"));
        db.record(ActivityEntry::new("state_recognition", "miss").app("game-a"));
        let entries = db.recent_activity(10).unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first.
        assert_eq!(entries[0].action, "state_recognition");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_actions_preserve_insertion_order() {
        let (db, dir) = temp_db("action-order");
        db.save_app(&sample_app("game-a")).unwrap();
        for id in ["a", "b"] {
            db.save_state(&RecognitionState {
                state_id: id.to_string(),
                app_id: "game-a".to_string(),
                name: id.to_string(),
                features: vec![1.0],
                rois: Vec::new(),
                threshold: 0.8,
                parent_state: None,
            })
            .unwrap();
        }
        for name in ["first", "second", "third"] {
            db.save_action(&ActionEdge {
                from_state: "a".to_string(),
                to_state: "b".to_string(),
                name: name.to_string(),
                behavior: "tap".to_string(),
                params: serde_json::json!({}),
            })
            .unwrap();
        }
        let actions = db.load_actions().unwrap();
        let names: Vec<_> = actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
