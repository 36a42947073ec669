//! Collaborator contracts.
//!
//! The core never touches pixels, models, or input devices itself. It
//! drives these traits; the binary decides which implementations to wire
//! in. Task handlers and action behaviors follow the registry pattern:
//! one implementation per kind, registered under a name at startup and
//! resolved from task/action records by that name.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, ActivityEntry, Application, Capture, Recognition, Roi, TaskSpec};

/// Device actuation: screenshots and input. A single physical device may
/// back several accounts; the scheduler serializes access with a device
/// mutex held for one capture-and-act cycle.
#[async_trait]
pub trait DeviceController: Send + Sync {
    fn name(&self) -> &str;

    /// Take a screenshot. May block up to the configured capture timeout;
    /// the caller enforces the bound.
    async fn capture_screen(&self) -> Result<Capture>;

    async fn tap(&self, x: u32, y: u32) -> Result<()>;

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u64) -> Result<()>;

    async fn start_app(&self, package: &str) -> Result<()>;

    async fn stop_app(&self, package: &str) -> Result<()>;
}

/// Vision collaborator: turns a capture into a comparable feature vector.
/// Model format and inference are entirely its concern.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, capture: &Capture, rois: &[Roi]) -> Result<Vec<f32>>;
}

/// State-graph navigation surface exposed to task handlers.
///
/// Implemented by the scheduler crate; defined here so handlers can depend
/// on it without depending on the scheduler.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Recognize the current screen of an application.
    async fn current_state(&self, app_id: &str) -> Result<Recognition>;

    /// Walk the state graph until `target` is recognized. Returns `false`
    /// when the target is unreachable or attempts are exhausted, an
    /// expected outcome the handler decides how to recover from.
    async fn ensure_state(&self, app_id: &str, target: &str) -> Result<bool>;
}

/// Everything a task handler gets to work with for one attempt.
#[derive(Clone)]
pub struct TaskContext {
    pub app: Application,
    pub account: Account,
    pub task: TaskSpec,
    pub device: Arc<dyn DeviceController>,
    pub navigator: Arc<dyn Navigator>,
}

/// One task kind's executable behavior. `execute` returns an opaque
/// execution snapshot on success; an `Err` is a collaborator-reported
/// failure that counts against the pair's retry allowance.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &TaskContext) -> Result<serde_json::Value>;
}

/// One action kind's executable behavior, resolved from an action edge's
/// `behavior` key during navigation.
#[async_trait]
pub trait ActionBehavior: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, device: &dyn DeviceController, params: &serde_json::Value) -> Result<()>;
}

/// Append-only audit log sink. Implemented by the store.
pub trait ActivitySink: Send + Sync {
    fn record(&self, entry: ActivityEntry);
}
