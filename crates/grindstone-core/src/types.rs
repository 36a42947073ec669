//! Data model: the records the scheduler, store, and recognizer share.
//!
//! Everything here is plain data. Rows are loaded once from the store at
//! startup; the only records mutated afterwards are [`Account`] runtime
//! counters and [`TaskStatus`] rows, and only ever by the account's own
//! scheduling loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// State id returned when no registered state clears its threshold.
/// One sentinel exists per application; it is never matched by feature
/// comparison, only produced as the fallback.
pub const UNKNOWN_STATE: &str = "unknown";

/// Application lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStatus {
    Inactive,
    Active,
    Suspended,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Inactive => "inactive",
            AppStatus::Active => "active",
            AppStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => AppStatus::Active,
            "suspended" => AppStatus::Suspended,
            _ => AppStatus::Inactive,
        }
    }
}

/// An automated target: one game with its own states, tasks, and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub app_id: String,
    pub name: String,
    /// OS-level package identifier, used by start/stop actuation.
    pub package_name: Option<String>,
    /// Higher runs first when several applications have pending work.
    pub priority: i32,
    /// Maximum contiguous run length in seconds before a forced idle gap.
    pub time_slice: u64,
    /// Maximum cumulative seconds per epoch across the app's accounts.
    pub daily_limit: u64,
    /// Daily anchor at which epoch counters zero.
    pub reset_time: NaiveTime,
    pub status: AppStatus,
    /// Opaque app-specific configuration.
    pub config: serde_json::Value,
}

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "disabled" => AccountStatus::Disabled,
            _ => AccountStatus::Active,
        }
    }
}

/// One login inside an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub app_id: String,
    pub username: String,
    /// Opaque to the core; the device collaborator consumes it at login.
    pub credential: String,
    pub login_type: String,
    pub last_login_time: Option<DateTime<Utc>>,
    /// Lifetime runtime in seconds.
    pub total_runtime: u64,
    /// Runtime in seconds within the current epoch.
    pub daily_runtime: u64,
    pub status: AccountStatus,
    pub extra: serde_json::Value,
}

/// Reset scope of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Completion clears at every epoch boundary.
    Daily,
    /// Completion clears only when the boundary lands on the week start.
    Weekly,
    /// Completion never clears.
    Once,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Daily => "daily",
            TaskKind::Weekly => "weekly",
            TaskKind::Once => "once",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "weekly" => TaskKind::Weekly,
            "once" => TaskKind::Once,
            _ => TaskKind::Daily,
        }
    }
}

/// A registered unit of automated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub app_id: String,
    pub name: String,
    /// A child is eligible only once its parent completed for the account.
    pub parent_id: Option<String>,
    pub kind: TaskKind,
    /// Higher is scheduled first.
    pub priority: i32,
    pub max_retries: u32,
    /// Per-attempt execution deadline.
    pub timeout: Duration,
    pub enabled: bool,
    /// Opaque handler configuration.
    pub config: serde_json::Value,
    /// Registry key resolving to the executing [`crate::TaskHandler`].
    pub handler: String,
}

/// Per-(account, task) completion record. One row per pair, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub account_id: String,
    pub task_id: String,
    pub completed: bool,
    pub completion_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    /// Failures this epoch, capped at the task's `max_retries`; success
    /// does not reset it.
    pub retry_count: u32,
    /// Terminal sub-state: a failure landing when `retry_count` already
    /// equals `max_retries` parks the pair until the next epoch.
    pub failed_epoch: bool,
    pub last_error: Option<String>,
    pub execution_data: serde_json::Value,
}

impl TaskStatus {
    /// Fresh row for a pair being scheduled for the first time.
    pub fn new(account_id: &str, task_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            task_id: task_id.to_string(),
            completed: false,
            completion_time: None,
            last_run_time: None,
            retry_count: 0,
            failed_epoch: false,
            last_error: None,
            execution_data: serde_json::Value::Null,
        }
    }
}

/// Named sub-region of the screen used during feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,
    /// x1, y1, x2, y2 in capture pixels.
    pub bounds: [u32; 4],
}

/// A matchable screen configuration of an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionState {
    pub state_id: String,
    pub app_id: String,
    pub name: String,
    /// Stored feature descriptor the recognizer compares captures against.
    pub features: Vec<f32>,
    pub rois: Vec<Roi>,
    /// Minimum similarity for this state to become a candidate.
    pub threshold: f32,
    /// Hierarchical grouping: a sub-dialog nests under its main screen.
    pub parent_state: Option<String>,
}

impl RecognitionState {
    /// The per-application fallback sentinel. Its threshold is infinite so
    /// no feature comparison can ever produce it; the recognizer returns it
    /// only when nothing else clears threshold.
    pub fn unknown(app_id: &str) -> Self {
        Self {
            state_id: UNKNOWN_STATE.to_string(),
            app_id: app_id.to_string(),
            name: "Unknown".to_string(),
            features: Vec::new(),
            rois: Vec::new(),
            threshold: f32::INFINITY,
            parent_state: None,
        }
    }
}

/// Directed transition edge between two recognition states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEdge {
    pub from_state: String,
    pub to_state: String,
    pub name: String,
    /// Registry key resolving to the executing [`crate::ActionBehavior`].
    pub behavior: String,
    pub params: serde_json::Value,
}

/// Identity of a single screen snapshot (capture timestamp in millis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureId(pub u64);

impl std::fmt::Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One screen snapshot. Pixel data is opaque to the core; only the
/// feature-extraction collaborator interprets it.
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: CaptureId,
    pub taken_at: Instant,
    pub width: u32,
    pub height: u32,
    pub data: Arc<Vec<u8>>,
}

impl Capture {
    pub fn new(id: CaptureId, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            id,
            taken_at: Instant::now(),
            width,
            height,
            data: Arc::new(data),
        }
    }
}

/// Outcome of one recognizer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub state_id: String,
    pub confidence: f32,
    pub elapsed_ms: u64,
    pub capture: CaptureId,
}

impl Recognition {
    pub fn is_unknown(&self) -> bool {
        self.state_id == UNKNOWN_STATE
    }
}

/// Global key/value configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Append-only audit record written on every state transition attempt and
/// task outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub app_id: Option<String>,
    pub account_id: Option<String>,
    pub task_id: Option<String>,
    pub action: String,
    pub status: String,
    pub details: Option<String>,
}

impl ActivityEntry {
    pub fn new(action: &str, status: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            app_id: None,
            account_id: None,
            task_id: None,
            action: action.to_string(),
            status: status.to_string(),
            details: None,
        }
    }

    pub fn app(mut self, app_id: &str) -> Self {
        self.app_id = Some(app_id.to_string());
        self
    }

    pub fn account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(AppStatus::parse("active"), AppStatus::Active);
        assert_eq!(AppStatus::parse("garbage"), AppStatus::Inactive);
        assert_eq!(AppStatus::Suspended.as_str(), "suspended");
        assert_eq!(TaskKind::parse("weekly"), TaskKind::Weekly);
        assert_eq!(TaskKind::parse(""), TaskKind::Daily);
    }

    #[test]
    fn test_unknown_sentinel_never_matchable() {
        let unknown = RecognitionState::unknown("game-a");
        assert_eq!(unknown.state_id, UNKNOWN_STATE);
        // No finite similarity can clear an infinite threshold.
        assert!(1.0_f32 < unknown.threshold);
        assert!(unknown.features.is_empty());
    }

    #[test]
    fn test_activity_entry_builder() {
        let entry = ActivityEntry::new("task_execution", "success")
            .app("game-a")
            .account("acct-1")
            .task("task-1")
            .details("done");
        assert_eq!(entry.app_id.as_deref(), Some("game-a"));
        assert_eq!(entry.status, "success");
        assert_eq!(entry.details.as_deref(), Some("done"));
    }
}
