//! Handler and behavior registries. Task records reference their executor
//! by name; the lookup tables are filled once at startup, so adding a task
//! kind means implementing the trait and registering it, no reflection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use grindstone_core::error::{GrindError, Result};
use grindstone_core::traits::{ActionBehavior, DeviceController, TaskContext, TaskHandler};

/// Registry of task handlers, keyed by handler name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in handlers.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(NavigateHandler));
        reg
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        tracing::info!("🔧 Registered task handler: {}", handler.name());
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(|k| k.as_str()).collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

/// Registry of action behaviors, keyed by behavior name.
#[derive(Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn ActionBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in behaviors.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(TapBehavior));
        reg.register(Arc::new(SwipeBehavior));
        reg.register(Arc::new(WaitBehavior));
        reg.register(Arc::new(StartAppBehavior));
        reg.register(Arc::new(StopAppBehavior));
        reg
    }

    pub fn register(&mut self, behavior: Arc<dyn ActionBehavior>) {
        tracing::info!("🔧 Registered action behavior: {}", behavior.name());
        self.behaviors.insert(behavior.name().to_string(), behavior);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionBehavior>> {
        self.behaviors.get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.behaviors.len()
    }
}

// ─── Built-in behaviors ────────────────────────────────────

fn param_u64(params: &serde_json::Value, key: &str) -> Result<u64> {
    params[key]
        .as_u64()
        .ok_or_else(|| GrindError::Config(format!("Behavior params missing '{key}'")))
}

fn param_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    params[key]
        .as_str()
        .ok_or_else(|| GrindError::Config(format!("Behavior params missing '{key}'")))
}

fn param_point(params: &serde_json::Value, key: &str) -> Result<(u32, u32)> {
    let pair = params[key]
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| GrindError::Config(format!("Behavior params missing '{key}' pair")))?;
    let x = pair[0]
        .as_u64()
        .ok_or_else(|| GrindError::Config(format!("Bad '{key}' coordinate")))?;
    let y = pair[1]
        .as_u64()
        .ok_or_else(|| GrindError::Config(format!("Bad '{key}' coordinate")))?;
    Ok((x as u32, y as u32))
}

/// Tap a fixed point: `{"x": 640, "y": 360}`.
pub struct TapBehavior;

#[async_trait]
impl ActionBehavior for TapBehavior {
    fn name(&self) -> &str {
        "tap"
    }

    async fn run(&self, device: &dyn DeviceController, params: &serde_json::Value) -> Result<()> {
        let x = param_u64(params, "x")? as u32;
        let y = param_u64(params, "y")? as u32;
        device.tap(x, y).await
    }
}

/// Swipe between two points: `{"from": [x, y], "to": [x, y], "duration_ms": 300}`.
pub struct SwipeBehavior;

#[async_trait]
impl ActionBehavior for SwipeBehavior {
    fn name(&self) -> &str {
        "swipe"
    }

    async fn run(&self, device: &dyn DeviceController, params: &serde_json::Value) -> Result<()> {
        let from = param_point(params, "from")?;
        let to = param_point(params, "to")?;
        let duration_ms = params["duration_ms"].as_u64().unwrap_or(300);
        device.swipe(from, to, duration_ms).await
    }
}

/// Let the screen settle: `{"secs": 2}`.
pub struct WaitBehavior;

#[async_trait]
impl ActionBehavior for WaitBehavior {
    fn name(&self) -> &str {
        "wait"
    }

    async fn run(&self, _device: &dyn DeviceController, params: &serde_json::Value) -> Result<()> {
        let secs = param_u64(params, "secs")?;
        tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
        Ok(())
    }
}

/// Launch a package: `{"package": "com.example.game"}`.
pub struct StartAppBehavior;

#[async_trait]
impl ActionBehavior for StartAppBehavior {
    fn name(&self) -> &str {
        "start_app"
    }

    async fn run(&self, device: &dyn DeviceController, params: &serde_json::Value) -> Result<()> {
        device.start_app(param_str(params, "package")?).await
    }
}

/// Kill a package: `{"package": "com.example.game"}`.
pub struct StopAppBehavior;

#[async_trait]
impl ActionBehavior for StopAppBehavior {
    fn name(&self) -> &str {
        "stop_app"
    }

    async fn run(&self, device: &dyn DeviceController, params: &serde_json::Value) -> Result<()> {
        device.stop_app(param_str(params, "package")?).await
    }
}

// ─── Built-in handlers ─────────────────────────────────────

/// Generic navigation task: walk the state graph to a target state and
/// succeed when it is reached. Config: `{"target_state": "main_menu"}`.
/// Many daily chores (sign-in screens, collect buttons) are exactly this.
pub struct NavigateHandler;

#[async_trait]
impl TaskHandler for NavigateHandler {
    fn name(&self) -> &str {
        "navigate"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<serde_json::Value> {
        let target = param_str(&ctx.task.config, "target_state")?;
        let reached = ctx.navigator.ensure_state(&ctx.app.app_id, target).await?;
        if reached {
            Ok(serde_json::json!({ "reached": target }))
        } else {
            Err(GrindError::Execution(format!(
                "Could not reach state '{target}'"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registries() {
        let behaviors = BehaviorRegistry::with_defaults();
        assert_eq!(behaviors.count(), 5);
        assert!(behaviors.get("tap").is_some());
        assert!(behaviors.get("swipe").is_some());
        assert!(behaviors.get("missing").is_none());

        let handlers = HandlerRegistry::with_defaults();
        assert!(handlers.get("navigate").is_some());
        assert_eq!(handlers.names(), ["navigate"]);
    }

    #[test]
    fn test_param_helpers() {
        let params = serde_json::json!({"x": 10, "from": [1, 2], "package": "com.x"});
        assert_eq!(param_u64(&params, "x").unwrap(), 10);
        assert_eq!(param_point(&params, "from").unwrap(), (1, 2));
        assert_eq!(param_str(&params, "package").unwrap(), "com.x");
        assert!(param_u64(&params, "y").is_err());
        assert!(param_point(&params, "to").is_err());
    }
}
