//! Screen-state recognizer. Resolves a capture through the cache layer,
//! asks the vision collaborator for features, scores every registered
//! state of the application, and returns the best candidate or the
//! `unknown` sentinel. Results are cached by capture identity so repeated
//! queries inside the TTL cost nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use grindstone_cache::{CacheLookup, CaptureCache, ResultCache};
use grindstone_core::error::{GrindError, Result};
use grindstone_core::traits::{ActivitySink, DeviceController, FeatureExtractor};
use grindstone_core::types::{ActivityEntry, Capture, CaptureId, Recognition, Roi};

use crate::graph::StateGraph;

/// Recognition kind key under which state matches are cached.
pub const STATE_KIND: &str = "state";

pub struct StateRecognizer {
    graph: Arc<StateGraph>,
    captures: Arc<CaptureCache>,
    results: Arc<ResultCache<Recognition>>,
    device: Arc<dyn DeviceController>,
    extractor: Arc<dyn FeatureExtractor>,
    sink: Arc<dyn ActivitySink>,
    result_ttl: Duration,
    capture_timeout: Duration,
}

impl StateRecognizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<StateGraph>,
        captures: Arc<CaptureCache>,
        results: Arc<ResultCache<Recognition>>,
        device: Arc<dyn DeviceController>,
        extractor: Arc<dyn FeatureExtractor>,
        sink: Arc<dyn ActivitySink>,
        result_ttl: Duration,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            captures,
            results,
            device,
            extractor,
            sink,
            result_ttl,
            capture_timeout,
        }
    }

    /// Identify the application's current screen.
    ///
    /// `capture_id = None` means "latest": the newest cached capture, or a
    /// fresh one from the device when the cache has nothing usable. The
    /// `unknown` sentinel with confidence 0 is an expected result, not an
    /// error. Exactly one activity entry is written per call.
    pub async fn recognize(&self, app_id: &str, capture_id: Option<CaptureId>) -> Result<Recognition> {
        let started = Instant::now();
        let capture = self.resolve_capture(capture_id).await?;

        if let CacheLookup::Hit(cached) = self.results.get(capture.id, STATE_KIND) {
            self.log(app_id, &cached, true);
            return Ok(cached);
        }

        let rois = self.collect_rois(app_id);
        let features = self.extractor.extract(&capture, &rois).await?;

        let recognition = match self.best_candidate(app_id, &features) {
            Some((state_id, confidence)) => Recognition {
                state_id,
                confidence,
                elapsed_ms: started.elapsed().as_millis() as u64,
                capture: capture.id,
            },
            None => Recognition {
                state_id: self.graph.unknown_state(app_id).state_id,
                confidence: 0.0,
                elapsed_ms: started.elapsed().as_millis() as u64,
                capture: capture.id,
            },
        };

        self.results
            .put(capture.id, STATE_KIND, recognition.clone(), self.result_ttl);
        self.log(app_id, &recognition, false);
        Ok(recognition)
    }

    /// Recognize against a capture taken right now, bypassing any cached
    /// screen. Used after an action was performed: the device's screen has
    /// moved on, so whatever the cache holds no longer describes it.
    pub async fn recognize_fresh(&self, app_id: &str) -> Result<Recognition> {
        let fresh = tokio::time::timeout(self.capture_timeout, self.device.capture_screen())
            .await
            .map_err(|_| GrindError::Timeout(self.capture_timeout.as_secs()))??;
        let id = fresh.id;
        self.captures.put(fresh);
        self.recognize(app_id, Some(id)).await
    }

    async fn resolve_capture(&self, capture_id: Option<CaptureId>) -> Result<Capture> {
        let cached = match capture_id {
            Some(id) => self.captures.get(id),
            None => self.captures.latest(),
        };
        if let Some(capture) = cached {
            return Ok(capture);
        }
        if let Some(id) = capture_id {
            // An explicit id that fell out of the cache cannot be recreated.
            return Err(GrindError::Recognition(format!(
                "Capture {id} is no longer cached"
            )));
        }
        let fresh = tokio::time::timeout(self.capture_timeout, self.device.capture_screen())
            .await
            .map_err(|_| GrindError::Timeout(self.capture_timeout.as_secs()))??;
        self.captures.put(fresh.clone());
        Ok(fresh)
    }

    /// Union of every state's named regions, first definition wins.
    fn collect_rois(&self, app_id: &str) -> Vec<Roi> {
        let mut seen = std::collections::HashSet::new();
        let mut rois = Vec::new();
        for state in self.graph.states_for(app_id) {
            for roi in &state.rois {
                if seen.insert(roi.name.clone()) {
                    rois.push(roi.clone());
                }
            }
        }
        rois
    }

    /// Best state clearing its own threshold. Ties fall to the deeper
    /// parent chain (a nested dialog beats its coarser ancestor), then the
    /// lowest state id, so the answer is fully deterministic.
    fn best_candidate(&self, app_id: &str, features: &[f32]) -> Option<(String, f32)> {
        let mut best: Option<(f32, usize, String)> = None;
        for state in self.graph.states_for(app_id) {
            if state.features.is_empty() {
                continue;
            }
            let score = similarity(features, &state.features);
            if score < state.threshold {
                continue;
            }
            let depth = self.graph.parent_depth(&state.state_id);
            let candidate = (score, depth, state.state_id.clone());
            best = Some(match best.take() {
                None => candidate,
                Some(current) => {
                    if candidate.0 > current.0
                        || (candidate.0 == current.0 && candidate.1 > current.1)
                        || (candidate.0 == current.0
                            && candidate.1 == current.1
                            && candidate.2 < current.2)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best.map(|(score, _, id)| (id, score))
    }

    fn log(&self, app_id: &str, recognition: &Recognition, cache_hit: bool) {
        let status = if recognition.is_unknown() { "miss" } else { "match" };
        self.sink.record(
            ActivityEntry::new("state_recognition", status)
                .app(app_id)
                .details(format!(
                    "{} confidence={:.3} elapsed={}ms cached={}",
                    recognition.state_id, recognition.confidence, recognition.elapsed_ms, cache_hit
                )),
        );
    }
}

/// Similarity between a live feature vector and a stored descriptor:
/// inverse euclidean distance over the common prefix, mapped into (0, 1].
fn similarity(live: &[f32], stored: &[f32]) -> f32 {
    let n = live.len().min(stored.len());
    if n == 0 {
        return 0.0;
    }
    let dist: f32 = live[..n]
        .iter()
        .zip(&stored[..n])
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt();
    1.0 / (1.0 + dist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use grindstone_core::types::RecognitionState;

    struct FakeDevice {
        next_id: AtomicU64,
    }

    #[async_trait]
    impl DeviceController for FakeDevice {
        fn name(&self) -> &str {
            "fake"
        }
        async fn capture_screen(&self) -> Result<Capture> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Capture::new(CaptureId(id), 1280, 720, vec![0u8; 4]))
        }
        async fn tap(&self, _x: u32, _y: u32) -> Result<()> {
            Ok(())
        }
        async fn swipe(&self, _f: (u32, u32), _t: (u32, u32), _d: u64) -> Result<()> {
            Ok(())
        }
        async fn start_app(&self, _p: &str) -> Result<()> {
            Ok(())
        }
        async fn stop_app(&self, _p: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FixedExtractor {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeatureExtractor for FixedExtractor {
        async fn extract(&self, _capture: &Capture, _rois: &[Roi]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
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

    fn state(id: &str, features: Vec<f32>, threshold: f32) -> RecognitionState {
        RecognitionState {
            state_id: id.to_string(),
            app_id: "game".to_string(),
            name: id.to_string(),
            features,
            rois: Vec::new(),
            threshold,
            parent_state: None,
        }
    }

    struct Fixture {
        recognizer: StateRecognizer,
        extractor_calls: Arc<FixedExtractor>,
        sink: Arc<MemorySink>,
    }

    fn fixture(states: Vec<RecognitionState>, live_features: Vec<f32>) -> Fixture {
        let mut graph = StateGraph::new();
        for s in states {
            graph.add_state(s).unwrap();
        }
        let extractor = Arc::new(FixedExtractor {
            vector: live_features,
            calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(MemorySink::default());
        let recognizer = StateRecognizer::new(
            Arc::new(graph),
            Arc::new(CaptureCache::new(5, Duration::from_secs(60))),
            Arc::new(ResultCache::new(50)),
            Arc::new(FakeDevice {
                next_id: AtomicU64::new(1),
            }),
            extractor.clone(),
            sink.clone(),
            Duration::from_secs(10),
            Duration::from_secs(5),
        );
        Fixture {
            recognizer,
            extractor_calls: extractor,
            sink,
        }
    }

    #[tokio::test]
    async fn test_matches_closest_state() {
        let f = fixture(
            vec![
                state("menu", vec![1.0, 1.0], 0.5),
                state("battle", vec![10.0, 10.0], 0.5),
            ],
            vec![1.0, 1.1],
        );
        let result = f.recognizer.recognize("game", None).await.unwrap();
        assert_eq!(result.state_id, "menu");
        assert!(result.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_unknown_when_nothing_clears_threshold() {
        let f = fixture(
            vec![state("menu", vec![100.0, 100.0], 0.9)],
            vec![0.0, 0.0],
        );
        let result = f.recognizer.recognize("game", None).await.unwrap();
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
        // A miss still logs exactly one entry.
        assert_eq!(f.sink.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_within_ttl_skips_recomputation() {
        let f = fixture(vec![state("menu", vec![1.0], 0.5)], vec![1.0]);
        let first = f.recognizer.recognize("game", None).await.unwrap();
        let second = f
            .recognizer
            .recognize("game", Some(first.capture))
            .await
            .unwrap();

        assert_eq!(first.state_id, second.state_id);
        assert_eq!(first.confidence, second.confidence);
        // One extraction total: the second call was a cache hit.
        assert_eq!(f.extractor_calls.calls.load(Ordering::SeqCst), 1);
        // Both calls logged.
        assert_eq!(f.sink.entries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deterministic_for_fixed_inputs() {
        // "a" is the closer descriptor; rebuilding the whole stack must
        // never change the answer.
        for _ in 0..3 {
            let f = fixture(
                vec![
                    state("a", vec![1.0, 2.0], 0.3),
                    state("b", vec![1.5, 2.5], 0.3),
                ],
                vec![1.2, 2.2],
            );
            let result = f.recognizer.recognize("game", None).await.unwrap();
            assert_eq!(result.state_id, "a");
        }
    }

    #[tokio::test]
    async fn test_exact_tie_prefers_deeper_then_lower_id() {
        // Identical descriptors give identical scores; "dialog" nests under
        // "root" so it wins despite the later id sorting after "root".
        let mut root = state("root", vec![1.0], 0.5);
        root.state_id = "a_root".to_string();
        let mut dialog = state("dialog", vec![1.0], 0.5);
        dialog.state_id = "z_dialog".to_string();
        dialog.parent_state = Some("a_root".to_string());
        let f = fixture(vec![root, dialog], vec![1.0]);
        let result = f.recognizer.recognize("game", None).await.unwrap();
        assert_eq!(result.state_id, "z_dialog");

        // Same depth, same score: the lower id wins.
        let f = fixture(
            vec![state("beta", vec![1.0], 0.5), state("alpha", vec![1.0], 0.5)],
            vec![1.0],
        );
        let result = f.recognizer.recognize("game", None).await.unwrap();
        assert_eq!(result.state_id, "alpha");
    }

    #[tokio::test]
    async fn test_explicit_id_fallen_out_of_cache_is_an_error() {
        let f = fixture(vec![state("menu", vec![1.0], 0.5)], vec![1.0]);
        let result = f.recognizer.recognize("game", Some(CaptureId(999))).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_similarity_shape() {
        assert_eq!(similarity(&[], &[1.0]), 0.0);
        assert_eq!(similarity(&[1.0], &[1.0]), 1.0);
        let near = similarity(&[1.0, 1.0], &[1.0, 1.2]);
        let far = similarity(&[1.0, 1.0], &[5.0, 5.0]);
        assert!(near > far);
    }
}
