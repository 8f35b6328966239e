//! Vigil capture crate - frame production, fan-out, and supervision.
//!
//! Provides the CaptureSource trait for region screen capture, a
//! MockCaptureSource for testing, a GdiCaptureSource for real capture on
//! Windows, the FrameHub (latest-frame snapshot + multi-subscriber stream),
//! the capture loop, and the watchdog that keeps the loop alive.

pub mod gdi;
pub mod watchdog;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use vigil_core::config::CaptureConfig;
use vigil_core::error::VigilError;
use vigil_core::events::{DomainEvent, EventSender};
use vigil_core::types::{Frame, Rect};

pub use gdi::GdiCaptureSource;
pub use watchdog::{Heartbeat, RestartDecision, RestartPolicy, WatchdogHandle};

/// Source of raw frames for a screen region.
///
/// Implementations provide platform-specific capture. The trait is object
/// safe so the watchdog can respawn capture loops over the same source.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Capture one frame of the given region.
    async fn grab(&self, region: Rect) -> Result<Frame, VigilError>;

    /// Bounds of the physical screen, used to default and validate the
    /// capture region.
    fn screen_bounds(&self) -> Result<Rect, VigilError>;
}

/// One scripted response of the mock source.
#[derive(Debug, Clone)]
enum MockGrab {
    Pixels(Vec<u8>),
    Fail(String),
}

/// Mock capture source for testing.
///
/// Plays back a script of pixel buffers and failures; once the script is
/// exhausted it keeps returning the last successful buffer.
pub struct MockCaptureSource {
    screen: Rect,
    script: Mutex<VecDeque<MockGrab>>,
    last_pixels: Mutex<Vec<u8>>,
    grabs: AtomicU64,
}

impl MockCaptureSource {
    /// Create a mock with a 1920x1080 screen that returns constant frames.
    pub fn new() -> Self {
        Self {
            screen: Rect::new(0, 0, 1920, 1080),
            script: Mutex::new(VecDeque::new()),
            last_pixels: Mutex::new(Vec::new()),
            grabs: AtomicU64::new(0),
        }
    }

    pub fn with_screen(screen: Rect) -> Self {
        Self {
            screen,
            ..Self::new()
        }
    }

    /// Queue a frame whose pixels are filled with `fill`.
    pub fn push_fill(&self, fill: u8) {
        self.script
            .lock()
            .unwrap()
            .push_back(MockGrab::Pixels(vec![fill]));
    }

    /// Queue a capture failure.
    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(MockGrab::Fail(message.to_string()));
    }

    /// Number of grab calls made so far.
    pub fn grab_count(&self) -> u64 {
        self.grabs.load(Ordering::SeqCst)
    }

    fn buffer_for(&self, region: Rect, seed: &[u8]) -> Vec<u8> {
        let len = (region.width * region.height * 4) as usize;
        let fill = seed.first().copied().unwrap_or(0);
        vec![fill; len]
    }
}

impl Default for MockCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureSource for MockCaptureSource {
    async fn grab(&self, region: Rect) -> Result<Frame, VigilError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(MockGrab::Fail(msg)) => Err(VigilError::Capture(msg)),
            Some(MockGrab::Pixels(seed)) => {
                let pixels = self.buffer_for(region, &seed);
                *self.last_pixels.lock().unwrap() = seed;
                Ok(Frame::new(region, region.width, region.height, pixels))
            }
            None => {
                let seed = self.last_pixels.lock().unwrap().clone();
                let pixels = self.buffer_for(region, &seed);
                Ok(Frame::new(region, region.width, region.height, pixels))
            }
        }
    }

    fn screen_bounds(&self) -> Result<Rect, VigilError> {
        Ok(self.screen)
    }
}

/// Fan-out point between the capture loop and its consumers.
///
/// Holds the most recent frame for synchronous snapshots and broadcasts
/// every published frame to stream subscribers. Each subscriber has a
/// bounded buffer; a slow subscriber lags and loses the oldest frames,
/// the producer never blocks.
pub struct FrameHub {
    latest: RwLock<Option<Frame>>,
    tx: broadcast::Sender<Frame>,
}

impl FrameHub {
    /// Create a hub whose subscribers buffer at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            latest: RwLock::new(None),
            tx,
        }
    }

    /// Publish a frame: update the snapshot slot and fan out to
    /// subscribers. Send errors (no subscribers) are ignored.
    pub fn publish(&self, frame: Frame) {
        *self.latest.write().unwrap() = Some(frame.clone());
        let _ = self.tx.send(frame);
    }

    /// The most recent frame, if any has been produced yet.
    pub fn snapshot(&self) -> Option<Frame> {
        self.latest.read().unwrap().clone()
    }

    /// Subscribe to the live frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.tx.subscribe()
    }
}

/// Resolve the configured region against the source's screen bounds.
///
/// Absent region means the full screen; a configured region that is not
/// fully contained in the screen is a configuration error, never clipped.
pub fn resolve_region(
    source: &dyn CaptureSource,
    configured: Option<Rect>,
) -> Result<Rect, VigilError> {
    let screen = source.screen_bounds()?;
    match configured {
        None => Ok(screen),
        Some(region) if screen.contains_rect(&region) => Ok(region),
        Some(region) => Err(VigilError::Config(format!(
            "Region {} exceeds screen bounds {}",
            region, screen
        ))),
    }
}

/// Run the capture loop until shutdown or failure.
///
/// Grabs one frame per tick at the configured rate, publishes it to the
/// hub, and touches the heartbeat. Recoverable grab failures are tolerated
/// up to `failure_budget` consecutive occurrences; past that the loop
/// returns an error and the watchdog takes over.
pub async fn capture_loop(
    source: Arc<dyn CaptureSource>,
    hub: Arc<FrameHub>,
    heartbeat: Arc<Heartbeat>,
    config: CaptureConfig,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), VigilError> {
    let region = resolve_region(source.as_ref(), config.region)?;
    let period = std::time::Duration::from_secs_f64(1.0 / config.fps.max(0.1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(%region, fps = config.fps, "Capture loop started");

    let mut consecutive_failures = 0u32;
    let mut first_frame = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Capture loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                match source.grab(region).await {
                    Ok(frame) => {
                        hub.publish(frame);
                        heartbeat.touch();
                        consecutive_failures = 0;
                        if first_frame {
                            first_frame = false;
                            let _ = events.send(DomainEvent::CaptureStarted {
                                timestamp: Utc::now(),
                            });
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(
                            error = %e,
                            consecutive_failures,
                            "Frame grab failed"
                        );
                        if consecutive_failures > config.failure_budget {
                            return Err(VigilError::ProcessCrash(format!(
                                "{} consecutive capture failures: {}",
                                consecutive_failures, e
                            )));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_core::config::CaptureConfig;
    use vigil_core::events::event_channel;

    fn region() -> Rect {
        Rect::new(0, 0, 4, 4)
    }

    #[tokio::test]
    async fn test_mock_source_plays_script() {
        let source = MockCaptureSource::new();
        source.push_fill(1);
        source.push_failure("display unplugged");
        source.push_fill(2);

        let f1 = source.grab(region()).await.unwrap();
        assert_eq!(f1.pixels[0], 1);

        let err = source.grab(region()).await.unwrap_err();
        assert!(err.to_string().contains("display unplugged"));

        let f2 = source.grab(region()).await.unwrap();
        assert_eq!(f2.pixels[0], 2);

        // Exhausted script repeats the last successful buffer.
        let f3 = source.grab(region()).await.unwrap();
        assert_eq!(f3.pixels[0], 2);
        assert_eq!(source.grab_count(), 4);
    }

    #[tokio::test]
    async fn test_hub_snapshot_tracks_latest() {
        let hub = FrameHub::new(8);
        assert!(hub.snapshot().is_none());

        let f1 = Frame::new(region(), 4, 4, vec![1; 64]);
        let f2 = Frame::new(region(), 4, 4, vec![2; 64]);
        hub.publish(f1);
        hub.publish(f2.clone());

        let snap = hub.snapshot().unwrap();
        assert_eq!(snap.id, f2.id);
    }

    #[tokio::test]
    async fn test_hub_fans_out_to_subscribers() {
        let hub = FrameHub::new(8);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        let frame = Frame::new(region(), 4, 4, vec![9; 64]);
        hub.publish(frame.clone());

        assert_eq!(rx1.recv().await.unwrap().id, frame.id);
        assert_eq!(rx2.recv().await.unwrap().id, frame.id);
    }

    #[tokio::test]
    async fn test_hub_drops_oldest_on_lag() {
        let hub = FrameHub::new(2);
        let mut rx = hub.subscribe();

        for fill in 0..5u8 {
            hub.publish(Frame::new(region(), 4, 4, vec![fill; 64]));
        }

        // The subscriber lagged: the oldest frames are gone, the newest
        // two are still buffered, and the producer was never blocked.
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(
            err,
            tokio::sync::broadcast::error::RecvError::Lagged(_)
        ));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.pixels[0], 3);
    }

    #[tokio::test]
    async fn test_resolve_region_defaults_to_screen() {
        let source = MockCaptureSource::new();
        let resolved = resolve_region(&source, None).unwrap();
        assert_eq!(resolved, Rect::new(0, 0, 1920, 1080));
    }

    #[tokio::test]
    async fn test_resolve_region_rejects_out_of_bounds() {
        let source = MockCaptureSource::new();
        let result = resolve_region(&source, Some(Rect::new(1900, 0, 100, 100)));
        assert!(matches!(result, Err(VigilError::Config(_))));
    }

    #[tokio::test]
    async fn test_resolve_region_accepts_contained() {
        let source = MockCaptureSource::new();
        let region = Rect::new(100, 100, 800, 600);
        assert_eq!(resolve_region(&source, Some(region)).unwrap(), region);
    }

    #[tokio::test]
    async fn test_capture_loop_publishes_and_heartbeats() {
        let source = Arc::new(MockCaptureSource::new());
        source.push_fill(7);
        let hub = Arc::new(FrameHub::new(8));
        let heartbeat = Arc::new(Heartbeat::new());
        let events = event_channel(16);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let config = CaptureConfig {
            fps: 100.0,
            region: Some(Rect::new(0, 0, 64, 48)),
            ..CaptureConfig::default()
        };

        let task = tokio::spawn(capture_loop(
            source,
            Arc::clone(&hub),
            Arc::clone(&heartbeat),
            config,
            events,
            shutdown_rx,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(hub.snapshot().is_some());
        assert!(heartbeat.age() < std::time::Duration::from_secs(1));

        shutdown_tx.send(true).unwrap();
        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_capture_loop_exits_after_failure_budget() {
        let source = Arc::new(MockCaptureSource::new());
        for _ in 0..10 {
            source.push_failure("permission revoked");
        }
        let hub = Arc::new(FrameHub::new(8));
        let heartbeat = Arc::new(Heartbeat::new());
        let events = event_channel(16);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let config = CaptureConfig {
            fps: 200.0,
            failure_budget: 2,
            region: Some(Rect::new(0, 0, 64, 48)),
            ..CaptureConfig::default()
        };

        let result = capture_loop(source, hub, heartbeat, config, events, shutdown_rx).await;
        assert!(matches!(result, Err(VigilError::ProcessCrash(_))));
    }

    #[tokio::test]
    async fn test_capture_loop_recovers_within_budget() {
        let source = Arc::new(MockCaptureSource::new());
        source.push_failure("transient");
        source.push_fill(3);
        let hub = Arc::new(FrameHub::new(8));
        let heartbeat = Arc::new(Heartbeat::new());
        let events = event_channel(16);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let config = CaptureConfig {
            fps: 100.0,
            failure_budget: 3,
            region: Some(Rect::new(0, 0, 64, 48)),
            ..CaptureConfig::default()
        };

        let task = tokio::spawn(capture_loop(
            source,
            Arc::clone(&hub),
            heartbeat,
            config,
            events,
            shutdown_rx,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let snap = hub.snapshot().expect("loop should have recovered");
        assert_eq!(snap.pixels[0], 3);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_capture_loop_rejects_bad_region_immediately() {
        let source = Arc::new(MockCaptureSource::new());
        let hub = Arc::new(FrameHub::new(8));
        let heartbeat = Arc::new(Heartbeat::new());
        let events = event_channel(16);
        let (_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let config = CaptureConfig {
            region: Some(Rect::new(-10, 0, 50, 50)),
            ..CaptureConfig::default()
        };

        let result = capture_loop(source, hub, heartbeat, config, events, shutdown_rx).await;
        assert!(matches!(result, Err(VigilError::Config(_))));
    }
}
