//! Application state shared across all route handlers.
//!
//! AppState holds references to the running services. All fields are
//! `Arc` for cheap cloning into handler tasks; nothing here owns the
//! background loops, which are spawned by the composition root.

use std::sync::Arc;
use std::time::Instant;

use vigil_capture::{FrameHub, Heartbeat, WatchdogHandle};
use vigil_core::config::VigilConfig;
use vigil_core::events::EventSender;
use vigil_executor::Executor;
use vigil_guard::{GateRegistry, KillSwitch};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (read-only once the server is up).
    pub config: Arc<VigilConfig>,
    /// Latest-frame slot and stream fan-out.
    pub hub: Arc<FrameHub>,
    /// The guarded intent executor.
    pub executor: Arc<Executor>,
    /// Confirmation gates awaiting operator resolution.
    pub gates: Arc<GateRegistry>,
    /// The process-wide kill switch.
    pub kill: Arc<KillSwitch>,
    /// Capture supervision state.
    pub watchdog: WatchdogHandle,
    /// Capture loop liveness signal.
    pub heartbeat: Arc<Heartbeat>,
    /// Broadcast sender for the SSE event feed.
    pub events: EventSender,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<VigilConfig>,
        hub: Arc<FrameHub>,
        executor: Arc<Executor>,
        gates: Arc<GateRegistry>,
        kill: Arc<KillSwitch>,
        watchdog: WatchdogHandle,
        heartbeat: Arc<Heartbeat>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            hub,
            executor,
            gates,
            kill,
            watchdog,
            heartbeat,
            events,
            start_time: Instant::now(),
        }
    }
}
