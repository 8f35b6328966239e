//! Vigil application binary - composition root.
//!
//! Ties the crates together into a single executable:
//! 1. Load configuration from TOML, apply CLI overrides
//! 2. Build the capability implementations (capture, OCR, injection)
//! 3. Start the capture loop under watchdog supervision
//! 4. Register the kill-switch hotkey listener
//! 5. Start the loopback axum control server
//!
//! On shutdown every pending confirmation gate is flushed to Denied so
//! no approval can outlive the operator's session.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil_api::{start_server, AppState};
use vigil_capture::{
    capture_loop, watchdog, CaptureSource, FrameHub, GdiCaptureSource, Heartbeat, RestartPolicy,
    WatchdogHandle,
};
use vigil_core::config::VigilConfig;
use vigil_core::error::VigilError;
use vigil_core::events::event_channel;
use vigil_core::types::Rect;
use vigil_executor::{Executor, InputInjector, IntentRegistry, SendInputInjector};
use vigil_guard::{listen_hotkey, GateRegistry, Guardrails, KillSwitch, KillSwitchHotkey};
use vigil_perception::{OcrEngine, OcrEngineConfig, PerceptionAdapter, WindowsOcrEngine};

use cli::CliArgs;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config_path = args.resolve_config_path();
    let mut config = VigilConfig::load_or_default(&config_path);

    // CLI overrides beat the config file.
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind.clone() {
        config.server.bind = bind;
    }
    if let Some(level) = args.log_level.clone() {
        config.general.log_level = level;
    }
    if let Some(region) = args.resolve_region() {
        config.capture.region = Some(region);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    info!(config = %config_path.display(), "Vigil starting");

    if let Err(e) = run(config).await {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

async fn run(config: VigilConfig) -> Result<(), VigilError> {
    let config = Arc::new(config);
    let events = event_channel(256);

    let hub = Arc::new(FrameHub::new(32));
    let heartbeat = Arc::new(Heartbeat::new());
    let kill = Arc::new(KillSwitch::new(events.clone()));
    let gates = Arc::new(GateRegistry::new(
        Duration::from_secs(config.guard.gate_timeout_secs),
        events.clone(),
    ));

    let source: Arc<dyn CaptureSource> = Arc::new(GdiCaptureSource::new());

    // The locked region: configured rectangle, else the full screen. If
    // no display is reachable the capture loop will report it and the
    // watchdog takes over; the lock still needs a rectangle to enforce.
    let region = config
        .capture
        .region
        .or_else(|| source.screen_bounds().ok())
        .unwrap_or(Rect {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        });
    info!(%region, "Region lock configured");

    let guardrails = Arc::new(Guardrails::new(
        region,
        &config.guard,
        Arc::clone(&gates),
        Arc::clone(&kill),
        events.clone(),
    )?);

    let ocr: Arc<dyn OcrEngine> = Arc::new(WindowsOcrEngine::new(OcrEngineConfig {
        language: config.perception.language.clone(),
    }));
    let perception = Arc::new(PerceptionAdapter::new(ocr, config.perception.clone()));
    let injector: Arc<dyn InputInjector> = Arc::new(SendInputInjector::new());

    let executor = Arc::new(Executor::new(
        perception,
        injector,
        guardrails,
        Arc::clone(&hub),
        IntentRegistry::with_builtins(),
        config.executor.clone(),
        events.clone(),
    ));

    // Capture loop under watchdog supervision.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watchdog_handle = WatchdogHandle::new();
    {
        let handle = watchdog_handle.clone();
        let heartbeat = Arc::clone(&heartbeat);
        let policy = RestartPolicy::from_config(&config.watchdog);
        let watchdog_config = config.watchdog.clone();
        let capture_config = config.capture.clone();
        let source = Arc::clone(&source);
        let hub = Arc::clone(&hub);
        let events_for_loops = events.clone();
        let events_for_watchdog = events.clone();
        let loop_heartbeat = Arc::clone(&heartbeat);

        let spawn = move || {
            tokio::spawn(capture_loop(
                Arc::clone(&source),
                Arc::clone(&hub),
                Arc::clone(&loop_heartbeat),
                capture_config.clone(),
                events_for_loops.clone(),
                shutdown_rx.clone(),
            ))
        };

        tokio::spawn(watchdog::supervise(
            handle,
            heartbeat,
            policy,
            watchdog_config,
            events_for_watchdog,
            spawn,
        ));
    }

    // Kill-switch hotkey; the HTTP trigger stays available either way.
    match KillSwitchHotkey::new(&config.guard.kill_hotkey) {
        Ok(hotkey) => {
            tokio::spawn(listen_hotkey(hotkey, Arc::clone(&kill)));
        }
        Err(e) => warn!(error = %e, "Kill-switch hotkey unavailable"),
    }

    let state = AppState::new(
        Arc::clone(&config),
        hub,
        executor,
        Arc::clone(&gates),
        kill,
        watchdog_handle,
        heartbeat,
        events,
    );

    tokio::select! {
        result = start_server(&config, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            let denied = gates.deny_all();
            if denied > 0 {
                info!(denied, "Flushed pending confirmation gates to denied");
            }
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}
