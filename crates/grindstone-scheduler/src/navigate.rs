//! State-graph navigation. Recognize where the application is, ask the
//! graph for the shortest action route to the target, execute it hop by
//! hop, and re-recognize after every hop. `Unreachable` and exhausted
//! attempts both come back as `false`: the caller owns the recovery flow
//! (usually an app restart), navigation never escalates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use grindstone_core::error::{GrindError, Result};
use grindstone_core::traits::{ActivitySink, DeviceController, Navigator};
use grindstone_core::types::{ActionEdge, ActivityEntry, Recognition};
use grindstone_states::graph::{PathResult, StateGraph};
use grindstone_states::recognizer::StateRecognizer;

use crate::registry::BehaviorRegistry;

pub struct GraphNavigator {
    graph: Arc<StateGraph>,
    recognizer: Arc<StateRecognizer>,
    device: Arc<dyn DeviceController>,
    behaviors: Arc<BehaviorRegistry>,
    sink: Arc<dyn ActivitySink>,
    /// Full route attempts before giving up.
    max_attempts: u32,
    /// Screen settle time after each action.
    settle: Duration,
}

impl GraphNavigator {
    pub fn new(
        graph: Arc<StateGraph>,
        recognizer: Arc<StateRecognizer>,
        device: Arc<dyn DeviceController>,
        behaviors: Arc<BehaviorRegistry>,
        sink: Arc<dyn ActivitySink>,
        max_attempts: u32,
        settle: Duration,
    ) -> Self {
        Self {
            graph,
            recognizer,
            device,
            behaviors,
            sink,
            max_attempts: max_attempts.max(1),
            settle,
        }
    }

    /// Execute one hop and verify it landed. Returns the state seen after
    /// the action.
    async fn hop(&self, app_id: &str, edge: &ActionEdge) -> Result<Recognition> {
        let behavior = self.behaviors.get(&edge.behavior).ok_or_else(|| {
            GrindError::Config(format!("Unknown behavior '{}' on action '{}'", edge.behavior, edge.name))
        })?;
        behavior.run(&*self.device, &edge.params).await?;
        tokio::time::sleep(self.settle).await;

        let seen = self.recognizer.recognize_fresh(app_id).await?;
        let landed = seen.state_id == edge.to_state;
        self.sink.record(
            ActivityEntry::new("state_transition", if landed { "success" } else { "strayed" })
                .app(app_id)
                .details(format!(
                    "{} {} -> {} (saw {})",
                    edge.name, edge.from_state, edge.to_state, seen.state_id
                )),
        );
        Ok(seen)
    }
}

#[async_trait]
impl Navigator for GraphNavigator {
    async fn current_state(&self, app_id: &str) -> Result<Recognition> {
        self.recognizer.recognize(app_id, None).await
    }

    async fn ensure_state(&self, app_id: &str, target: &str) -> Result<bool> {
        for attempt in 1..=self.max_attempts {
            let mut current = self.recognizer.recognize_fresh(app_id).await?;
            if current.is_unknown() {
                tracing::debug!(app = app_id, attempt, "Screen not recognized, letting it settle");
                tokio::time::sleep(self.settle).await;
                continue;
            }
            if current.state_id == target {
                return Ok(true);
            }

            let route = match self.graph.path(&current.state_id, target) {
                PathResult::Path(route) => route,
                PathResult::Unreachable => {
                    tracing::warn!(
                        app = app_id,
                        from = %current.state_id,
                        to = target,
                        "No action path, external recovery required"
                    );
                    self.sink.record(
                        ActivityEntry::new("navigation", "unreachable")
                            .app(app_id)
                            .details(format!("{} -> {target}", current.state_id)),
                    );
                    return Ok(false);
                }
            };

            tracing::debug!(
                app = app_id,
                from = %current.state_id,
                to = target,
                hops = route.len(),
                attempt,
                "Navigating"
            );
            for edge in &route {
                current = self.hop(app_id, edge).await?;
                if current.state_id != edge.to_state {
                    // Landed somewhere else; restart from wherever we are.
                    break;
                }
            }
            if current.state_id == target {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use grindstone_cache::{CaptureCache, ResultCache};
    use grindstone_core::traits::FeatureExtractor;
    use grindstone_core::types::{ActionEdge, Capture, CaptureId, RecognitionState, Roi};

    /// Device whose "screen" advances through a scripted sequence of
    /// feature vectors every time an action runs.
    struct ScriptedDevice {
        screens: Vec<Vec<f32>>,
        cursor: AtomicUsize,
        next_id: AtomicU64,
        taps: AtomicUsize,
    }

    impl ScriptedDevice {
        fn new(screens: Vec<Vec<f32>>) -> Self {
            Self {
                screens,
                cursor: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                taps: AtomicUsize::new(0),
            }
        }

        fn current(&self) -> Vec<f32> {
            let i = self.cursor.load(Ordering::SeqCst).min(self.screens.len() - 1);
            self.screens[i].clone()
        }
    }

    #[async_trait]
    impl DeviceController for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn capture_screen(&self) -> Result<Capture> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Capture::new(CaptureId(id), 1, 1, vec![]))
        }
        async fn tap(&self, _x: u32, _y: u32) -> Result<()> {
            self.taps.fetch_add(1, Ordering::SeqCst);
            self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn swipe(&self, _f: (u32, u32), _t: (u32, u32), _d: u64) -> Result<()> {
            self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn start_app(&self, _p: &str) -> Result<()> {
            Ok(())
        }
        async fn stop_app(&self, _p: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Extractor that reads the scripted device's current screen.
    struct ScreenExtractor {
        device: Arc<ScriptedDevice>,
    }

    #[async_trait]
    impl FeatureExtractor for ScreenExtractor {
        async fn extract(&self, _capture: &Capture, _rois: &[Roi]) -> Result<Vec<f32>> {
            Ok(self.device.current())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        entries: Mutex<Vec<ActivityEntry>>,
    }

    impl ActivitySink for MemorySink {
        fn record(&self, entry: ActivityEntry) {
            self.entries.lock().unwrap().push(entry);
        }
    }

    fn state(id: &str, features: Vec<f32>) -> RecognitionState {
        RecognitionState {
            state_id: id.to_string(),
            app_id: "game".to_string(),
            name: id.to_string(),
            features,
            rois: Vec::new(),
            threshold: 0.9,
            parent_state: None,
        }
    }

    fn tap_action(from: &str, to: &str) -> ActionEdge {
        ActionEdge {
            from_state: from.to_string(),
            to_state: to.to_string(),
            name: format!("{from}_to_{to}"),
            behavior: "tap".to_string(),
            params: serde_json::json!({"x": 1, "y": 1}),
        }
    }

    fn navigator(screens: Vec<Vec<f32>>, edges: Vec<ActionEdge>) -> (GraphNavigator, Arc<ScriptedDevice>, Arc<MemorySink>) {
        let device = Arc::new(ScriptedDevice::new(screens));
        let mut graph = StateGraph::new();
        graph.add_state(state("menu", vec![1.0])).unwrap();
        graph.add_state(state("shop", vec![2.0])).unwrap();
        graph.add_state(state("battle", vec![3.0])).unwrap();
        for edge in edges {
            graph.add_action(edge).unwrap();
        }
        let graph = Arc::new(graph);
        let sink = Arc::new(MemorySink::default());
        let recognizer = Arc::new(StateRecognizer::new(
            graph.clone(),
            Arc::new(CaptureCache::new(5, Duration::from_secs(60))),
            Arc::new(ResultCache::new(50)),
            device.clone(),
            Arc::new(ScreenExtractor {
                device: device.clone(),
            }),
            sink.clone(),
            Duration::from_secs(10),
            Duration::from_secs(5),
        ));
        let nav = GraphNavigator::new(
            graph,
            recognizer,
            device.clone(),
            Arc::new(BehaviorRegistry::with_defaults()),
            sink.clone(),
            3,
            Duration::from_millis(1),
        );
        (nav, device, sink)
    }

    #[tokio::test]
    async fn test_walks_path_hop_by_hop() {
        // Screen advances menu → shop → battle as taps land.
        let (nav, device, _sink) = navigator(
            vec![vec![1.0], vec![2.0], vec![3.0]],
            vec![tap_action("menu", "shop"), tap_action("shop", "battle")],
        );
        assert!(nav.ensure_state("game", "battle").await.unwrap());
        assert_eq!(device.taps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_already_there_needs_no_actions() {
        let (nav, device, _sink) = navigator(vec![vec![2.0]], vec![tap_action("menu", "shop")]);
        assert!(nav.ensure_state("game", "shop").await.unwrap());
        assert_eq!(device.taps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_reports_false() {
        // battle has no outgoing edges.
        let (nav, device, sink) = navigator(vec![vec![3.0]], vec![tap_action("menu", "shop")]);
        assert!(!nav.ensure_state("game", "menu").await.unwrap());
        assert_eq!(device.taps.load(Ordering::SeqCst), 0);
        let entries = sink.entries.lock().unwrap();
        assert!(entries.iter().any(|e| e.status == "unreachable"));
    }

    #[tokio::test]
    async fn test_stray_hop_retries() {
        // First tap lands on battle instead of shop; from battle an edge
        // leads to shop, so the second attempt recovers.
        let mut edges = vec![tap_action("menu", "shop"), tap_action("battle", "shop")];
        edges[0].params = serde_json::json!({"x": 5, "y": 5});
        let (nav, device, _sink) = navigator(
            vec![vec![1.0], vec![3.0], vec![2.0]],
            edges,
        );
        assert!(nav.ensure_state("game", "shop").await.unwrap());
        assert_eq!(device.taps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_behavior_is_config_error() {
        let mut edge = tap_action("menu", "shop");
        edge.behavior = "teleport".to_string();
        let (nav, _device, _sink) = navigator(vec![vec![1.0]], vec![edge]);
        assert!(nav.ensure_state("game", "shop").await.is_err());
    }
}
