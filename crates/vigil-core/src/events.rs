use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChallengeKind, GateState, IntentStatus, WatchdogState};

/// All domain events emitted by the Vigil system.
///
/// Events are published to a broadcast channel and consumed by the SSE
/// feed (`/events`) so an operator can follow gate activity, kill-switch
/// changes, and intent progress in real time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DomainEvent {
    /// The capture loop produced its first frame after (re)start.
    CaptureStarted { timestamp: DateTime<Utc> },

    /// The watchdog observed a stale heartbeat or loop exit.
    CaptureStalled { timestamp: DateTime<Utc> },

    /// The watchdog is restarting the capture loop.
    CaptureRestarting {
        attempt: u32,
        backoff_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The watchdog state changed (including terminal Failed).
    WatchdogStateChanged {
        state: WatchdogState,
        timestamp: DateTime<Utc>,
    },

    /// A confirmation gate was opened for one or more sensitive actions.
    GateOpened {
        gate_id: Uuid,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// A confirmation gate reached a terminal state.
    GateResolved {
        gate_id: Uuid,
        state: GateState,
        timestamp: DateTime<Utc>,
    },

    /// The kill switch was triggered.
    KillSwitchTriggered { timestamp: DateTime<Utc> },

    /// The kill switch was explicitly reset.
    KillSwitchReset { timestamp: DateTime<Utc> },

    /// An authentication challenge was detected on screen.
    ChallengeDetected {
        kind: ChallengeKind,
        timestamp: DateTime<Utc>,
    },

    /// An intent began executing.
    IntentStarted {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// An intent finished (any terminal status).
    IntentFinished {
        name: String,
        status: IntentStatus,
        steps_completed: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Sender half of the process-wide event channel.
pub type EventSender = tokio::sync::broadcast::Sender<DomainEvent>;

/// Create the process-wide event channel.
pub fn event_channel(capacity: usize) -> EventSender {
    let (tx, _) = tokio::sync::broadcast::channel(capacity);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DomainEvent::KillSwitchTriggered {
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"kill_switch_triggered\""));
    }

    #[test]
    fn test_gate_event_round_trip() {
        let event = DomainEvent::GateResolved {
            gate_id: Uuid::new_v4(),
            state: GateState::Expired,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        match back {
            DomainEvent::GateResolved { state, .. } => assert_eq!(state, GateState::Expired),
            other => panic!("Expected GateResolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_channel_fan_out() {
        let tx = event_channel(16);
        let mut rx1 = tx.subscribe();
        let mut rx2 = tx.subscribe();

        tx.send(DomainEvent::CaptureStarted {
            timestamp: Utc::now(),
        })
        .unwrap();

        assert!(matches!(
            rx1.recv().await.unwrap(),
            DomainEvent::CaptureStarted { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            DomainEvent::CaptureStarted { .. }
        ));
    }
}
