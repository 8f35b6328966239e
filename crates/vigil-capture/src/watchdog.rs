//! Watchdog supervision for the capture loop.
//!
//! The watchdog probes a heartbeat on its own schedule, independent of the
//! capture loop's timing, and restarts a crashed or stalled loop under an
//! exponential-backoff policy with a rolling restart window. Exhausting
//! the window budget is terminal: FAILED never auto-recovers.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};

use vigil_core::config::WatchdogConfig;
use vigil_core::error::VigilError;
use vigil_core::events::{DomainEvent, EventSender};
use vigil_core::types::WatchdogState;

/// Shared liveness signal between the capture loop and the watchdog.
///
/// The loop calls `touch()` on every produced frame; the watchdog reads
/// `age()` on every probe.
pub struct Heartbeat {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record liveness now.
    pub fn touch(&self) {
        self.last_ms
            .store(self.origin.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last touch.
    pub fn age(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a watchdog state transition.
///
/// Valid transitions:
/// - Running -> Restarting (missed heartbeat or loop exit)
/// - Restarting -> Running (restart succeeded)
/// - Restarting -> Failed (restart budget exhausted; terminal)
pub fn validate_transition(from: WatchdogState, to: WatchdogState) -> Result<(), VigilError> {
    let valid = matches!(
        (from, to),
        (WatchdogState::Running, WatchdogState::Restarting)
            | (WatchdogState::Restarting, WatchdogState::Running)
            | (WatchdogState::Restarting, WatchdogState::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(VigilError::ProcessCrash(format!(
            "Invalid watchdog transition: {} -> {}",
            from, to
        )))
    }
}

/// Outcome of a crash under the restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after the given backoff; `attempt` counts restarts within
    /// the current window.
    RestartAfter { delay: Duration, attempt: u32 },
    /// Budget exhausted; move to terminal FAILED.
    GiveUp,
}

/// Pure restart policy: exponential backoff with a ceiling plus a rolling
/// restart counter over a configurable window.
///
/// The counter and backoff reset once the supervised loop has been stable
/// for longer than the window since the last restart.
pub struct RestartPolicy {
    max_restarts: u32,
    window: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
    restarts_in_window: u32,
    last_restart: Option<Instant>,
    backoff: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            window: Duration::from_secs(config.window_secs),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            restarts_in_window: 0,
            last_restart: None,
            backoff: Duration::from_millis(config.backoff_initial_ms),
        }
    }

    /// Decide what to do about a crash observed at `now`.
    pub fn on_crash(&mut self, now: Instant) -> RestartDecision {
        if let Some(last) = self.last_restart {
            if now.duration_since(last) >= self.window {
                self.restarts_in_window = 0;
                self.backoff = self.backoff_initial;
            }
        }

        if self.restarts_in_window >= self.max_restarts {
            return RestartDecision::GiveUp;
        }

        self.restarts_in_window += 1;
        self.last_restart = Some(now);
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(self.backoff_max);

        RestartDecision::RestartAfter {
            delay,
            attempt: self.restarts_in_window,
        }
    }

    pub fn restarts_in_window(&self) -> u32 {
        self.restarts_in_window
    }
}

/// Add up to 25% random jitter so restart storms de-synchronize.
fn jittered(base: Duration) -> Duration {
    let quarter = (base.as_millis() / 4) as u64;
    let extra = rand::rng().random_range(0..=quarter);
    base + Duration::from_millis(extra)
}

/// Shared, observable watchdog state.
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<Mutex<WatchdogState>>,
    restarts: Arc<AtomicU32>,
}

impl WatchdogHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WatchdogState::Running)),
            restarts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn state(&self) -> WatchdogState {
        *self.state.lock().unwrap()
    }

    /// Total restarts over the watchdog's lifetime.
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    fn transition(&self, to: WatchdogState, events: &EventSender) {
        let mut state = self.state.lock().unwrap();
        if let Err(e) = validate_transition(*state, to) {
            warn!(error = %e, "Watchdog transition rejected");
            return;
        }
        *state = to;
        let _ = events.send(DomainEvent::WatchdogStateChanged {
            state: to,
            timestamp: Utc::now(),
        });
    }
}

impl Default for WatchdogHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Supervise a capture loop.
///
/// `spawn` starts one instance of the loop; the returned task is expected
/// to run until shutdown (Ok) or failure (Err). The watchdog probes on
/// `probe_interval_ms`, treats a heartbeat older than `heartbeat_stale_ms`
/// as a stall, and is the only restarter -- at most one restart is ever in
/// flight. A clean loop exit ends supervision.
pub async fn supervise<F>(
    handle: WatchdogHandle,
    heartbeat: Arc<Heartbeat>,
    mut policy: RestartPolicy,
    config: WatchdogConfig,
    events: EventSender,
    mut spawn: F,
) where
    F: FnMut() -> tokio::task::JoinHandle<Result<(), VigilError>> + Send,
{
    let probe = Duration::from_millis(config.probe_interval_ms);
    let stale = Duration::from_millis(config.heartbeat_stale_ms);

    heartbeat.touch();
    let mut task = spawn();

    loop {
        tokio::time::sleep(probe).await;

        let crashed = task.is_finished();
        let stalled = !crashed && heartbeat.age() > stale;

        if !crashed && !stalled {
            continue;
        }

        if crashed {
            match (&mut task).await {
                Ok(Ok(())) => {
                    info!("Capture loop exited cleanly; supervision ends");
                    return;
                }
                Ok(Err(e)) => warn!(error = %e, "Capture loop crashed"),
                Err(e) => warn!(error = %e, "Capture task panicked"),
            }
        } else {
            warn!(age_ms = heartbeat.age().as_millis() as u64, "Capture heartbeat stale");
            let _ = events.send(DomainEvent::CaptureStalled {
                timestamp: Utc::now(),
            });
            task.abort();
            let _ = (&mut task).await;
        }

        handle.transition(WatchdogState::Restarting, &events);

        match policy.on_crash(Instant::now()) {
            RestartDecision::GiveUp => {
                error!(
                    restarts = policy.restarts_in_window(),
                    "Restart budget exhausted; capture service FAILED"
                );
                handle.transition(WatchdogState::Failed, &events);
                return;
            }
            RestartDecision::RestartAfter { delay, attempt } => {
                let delay = jittered(delay);
                info!(
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Restarting capture loop"
                );
                let _ = events.send(DomainEvent::CaptureRestarting {
                    attempt,
                    backoff_ms: delay.as_millis() as u64,
                    timestamp: Utc::now(),
                });
                tokio::time::sleep(delay).await;
                heartbeat.touch();
                task = spawn();
                handle.restarts.fetch_add(1, Ordering::Relaxed);
                handle.transition(WatchdogState::Running, &events);
            }
        }
    }
}
