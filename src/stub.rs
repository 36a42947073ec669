//! Stand-in collaborators for running without a wired device or vision
//! backend. The stub device logs every actuation and serves blank
//! captures; the stub extractor yields no features, so every screen
//! recognizes as `unknown`. Useful for dry runs and for exercising the
//! scheduling path end to end.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use grindstone_core::error::Result;
use grindstone_core::traits::{DeviceController, FeatureExtractor};
use grindstone_core::types::{Capture, CaptureId, Roi};

pub struct StubDevice {
    counter: AtomicU64,
}

impl StubDevice {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    fn next_capture_id(&self) -> CaptureId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        // Disambiguate captures landing in the same millisecond.
        let n = self.counter.fetch_add(1, Ordering::Relaxed) % 1000;
        CaptureId(millis * 1000 + n)
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceController for StubDevice {
    fn name(&self) -> &str {
        "stub"
    }

    async fn capture_screen(&self) -> Result<Capture> {
        let id = self.next_capture_id();
        tracing::debug!("StubDevice capture {id}");
        Ok(Capture::new(id, 1280, 720, Vec::new()))
    }

    async fn tap(&self, x: u32, y: u32) -> Result<()> {
        tracing::info!("StubDevice tap ({x}, {y})");
        Ok(())
    }

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u64) -> Result<()> {
        tracing::info!("StubDevice swipe {from:?} -> {to:?} over {duration_ms}ms");
        Ok(())
    }

    async fn start_app(&self, package: &str) -> Result<()> {
        tracing::info!("StubDevice start_app {package}");
        Ok(())
    }

    async fn stop_app(&self, package: &str) -> Result<()> {
        tracing::info!("StubDevice stop_app {package}");
        Ok(())
    }
}

pub struct StubExtractor;

#[async_trait]
impl FeatureExtractor for StubExtractor {
    async fn extract(&self, _capture: &Capture, _rois: &[Roi]) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}
