//! Process-wide kill switch.
//!
//! A sticky flag the executor polls at every step boundary. It is set by
//! the operator (HTTP endpoint) or a global hotkey and stays Triggered
//! until an explicit reset. Reads are lock-free so the flag is pollable
//! even while input injection holds other locks.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{info, warn};

use vigil_core::error::VigilError;
use vigil_core::events::{DomainEvent, EventSender};
use vigil_core::types::KillSwitchState;

/// The sticky abort flag.
pub struct KillSwitch {
    triggered: AtomicBool,
    events: EventSender,
}

impl KillSwitch {
    pub fn new(events: EventSender) -> Self {
        Self {
            triggered: AtomicBool::new(false),
            events,
        }
    }

    /// Trip the switch. Idempotent; only the first call emits an event.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            warn!("Kill switch TRIGGERED; all action execution halted");
            let _ = self.events.send(DomainEvent::KillSwitchTriggered {
                timestamp: Utc::now(),
            });
        }
    }

    /// Explicit operator reset back to Armed.
    pub fn reset(&self) {
        if self.triggered.swap(false, Ordering::SeqCst) {
            info!("Kill switch reset; execution re-armed");
            let _ = self.events.send(DomainEvent::KillSwitchReset {
                timestamp: Utc::now(),
            });
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> KillSwitchState {
        if self.is_triggered() {
            KillSwitchState::Triggered
        } else {
            KillSwitchState::Armed
        }
    }
}

/// Global hotkey that trips the kill switch.
///
/// On Windows, registers the configured combination with the OS via the
/// `global-hotkey` crate. On other platforms the constructor succeeds but
/// `was_pressed` never fires; the HTTP endpoint remains available.
pub struct KillSwitchHotkey {
    key: String,
    #[cfg(target_os = "windows")]
    manager: global_hotkey::GlobalHotKeyManager,
    #[cfg(target_os = "windows")]
    hotkey: Option<global_hotkey::hotkey::HotKey>,
}

impl KillSwitchHotkey {
    #[cfg(target_os = "windows")]
    pub fn new(key: &str) -> Result<Self, VigilError> {
        use global_hotkey::hotkey::HotKey;
        use global_hotkey::GlobalHotKeyManager;
        use std::str::FromStr;

        let manager = GlobalHotKeyManager::new()
            .map_err(|e| VigilError::Config(format!("Failed to create hotkey manager: {}", e)))?;

        let hotkey = HotKey::from_str(key)
            .map_err(|e| VigilError::Config(format!("Failed to parse hotkey '{}': {}", key, e)))?;

        manager
            .register(hotkey)
            .map_err(|e| VigilError::Config(format!("Failed to register hotkey '{}': {}", key, e)))?;

        info!(key = %key, "Kill-switch hotkey registered");

        Ok(Self {
            key: key.to_string(),
            manager,
            hotkey: Some(hotkey),
        })
    }

    #[cfg(not(target_os = "windows"))]
    pub fn new(key: &str) -> Result<Self, VigilError> {
        tracing::warn!("Kill-switch hotkey is only available on Windows");
        Ok(Self {
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the hotkey fired since the last check.
    #[cfg(target_os = "windows")]
    pub fn was_pressed(&self) -> bool {
        use global_hotkey::GlobalHotKeyEvent;

        if let Some(hotkey) = &self.hotkey {
            if let Ok(event) = GlobalHotKeyEvent::receiver().try_recv() {
                return event.id() == hotkey.id();
            }
        }
        false
    }

    #[cfg(not(target_os = "windows"))]
    pub fn was_pressed(&self) -> bool {
        false
    }

    #[cfg(target_os = "windows")]
    pub fn unregister(&mut self) {
        if let Some(hotkey) = self.hotkey.take() {
            let _ = self.manager.unregister(hotkey);
            info!(key = %self.key, "Kill-switch hotkey unregistered");
        }
    }

    #[cfg(not(target_os = "windows"))]
    pub fn unregister(&mut self) {}
}

/// Poll the hotkey and trip the kill switch when it fires.
///
/// Runs until the process exits; polling is cheap and takes no lock
/// shared with input injection.
pub async fn listen_hotkey(hotkey: KillSwitchHotkey, kill: std::sync::Arc<KillSwitch>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(50));
    loop {
        interval.tick().await;
        if hotkey.was_pressed() {
            kill.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::events::event_channel;

    #[test]
    fn test_starts_armed() {
        let kill = KillSwitch::new(event_channel(16));
        assert!(!kill.is_triggered());
        assert_eq!(kill.state(), KillSwitchState::Armed);
    }

    #[test]
    fn test_trigger_is_sticky() {
        let kill = KillSwitch::new(event_channel(16));
        kill.trigger();
        assert!(kill.is_triggered());
        assert_eq!(kill.state(), KillSwitchState::Triggered);

        // Still triggered until explicitly reset.
        kill.trigger();
        assert!(kill.is_triggered());
    }

    #[test]
    fn test_explicit_reset_rearms() {
        let kill = KillSwitch::new(event_channel(16));
        kill.trigger();
        kill.reset();
        assert!(!kill.is_triggered());
        assert_eq!(kill.state(), KillSwitchState::Armed);
    }

    #[test]
    fn test_trigger_emits_event_once() {
        let events = event_channel(16);
        let mut rx = events.subscribe();
        let kill = KillSwitch::new(events);

        kill.trigger();
        kill.trigger();
        kill.trigger();

        assert!(matches!(
            rx.try_recv().unwrap(),
            DomainEvent::KillSwitchTriggered { .. }
        ));
        // Only the first trigger emitted.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reset_emits_event_only_when_triggered() {
        let events = event_channel(16);
        let mut rx = events.subscribe();
        let kill = KillSwitch::new(events);

        kill.reset(); // no-op while armed
        assert!(rx.try_recv().is_err());

        kill.trigger();
        kill.reset();
        assert!(matches!(
            rx.try_recv().unwrap(),
            DomainEvent::KillSwitchTriggered { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            DomainEvent::KillSwitchReset { .. }
        ));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_hotkey_stub_never_fires() {
        let hotkey = KillSwitchHotkey::new("Ctrl+Shift+F12").unwrap();
        assert_eq!(hotkey.key(), "Ctrl+Shift+F12");
        assert!(!hotkey.was_pressed());
    }
}
