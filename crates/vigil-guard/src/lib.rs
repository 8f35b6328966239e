//! Vigil guard crate - the guardrail layer.
//!
//! Region lock, confirmation-gate state machine, kill switch, and
//! challenge detection, combined behind `Guardrails::clear`: the single
//! choke point every action step passes through before injection.

pub mod challenge;
pub mod gate;
pub mod kill_switch;
pub mod region;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use vigil_core::config::GuardConfig;
use vigil_core::error::VigilError;
use vigil_core::events::{DomainEvent, EventSender};
use vigil_core::types::{ActionStep, GateState, OcrToken, Rect, Sensitivity};

pub use challenge::ChallengeDetector;
pub use gate::{ConfirmationGate, GateRegistry, GateView};
pub use kill_switch::{listen_hotkey, KillSwitch, KillSwitchHotkey};
pub use region::RegionLock;

/// The combined guardrail layer.
///
/// Every perception query is already confined to the locked region by
/// construction (frames cover only that region); every action step must
/// additionally pass `clear` before injection.
pub struct Guardrails {
    region: RegionLock,
    gates: Arc<GateRegistry>,
    kill: Arc<KillSwitch>,
    challenges: ChallengeDetector,
    events: EventSender,
    gate_poll: Duration,
}

impl Guardrails {
    pub fn new(
        region: Rect,
        config: &GuardConfig,
        gates: Arc<GateRegistry>,
        kill: Arc<KillSwitch>,
        events: EventSender,
    ) -> Result<Self, VigilError> {
        Ok(Self {
            region: RegionLock::new(region),
            gates,
            kill,
            challenges: ChallengeDetector::new(&config.extra_challenge_patterns)?,
            events,
            gate_poll: Duration::from_millis(50),
        })
    }

    /// Override the gate poll interval (tests).
    pub fn with_gate_poll(mut self, poll: Duration) -> Self {
        self.gate_poll = poll;
        self
    }

    pub fn region(&self) -> Rect {
        self.region.region()
    }

    pub fn gates(&self) -> &Arc<GateRegistry> {
        &self.gates
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill
    }

    /// Fail fast if the kill switch has been triggered. A triggered
    /// switch also implicitly denies every pending gate.
    pub fn ensure_live(&self) -> Result<(), VigilError> {
        if self.kill.is_triggered() {
            let denied = self.gates.deny_all();
            if denied > 0 {
                warn!(denied, "Kill switch denied pending gates");
            }
            return Err(VigilError::Aborted);
        }
        Ok(())
    }

    /// Halt with a human-handoff condition if the tokens show an
    /// authentication challenge.
    pub fn check_challenges(&self, tokens: &[OcrToken]) -> Result<(), VigilError> {
        if let Some(kind) = self.challenges.scan(tokens) {
            warn!(%kind, "Authentication challenge detected; handing off to operator");
            let _ = self.events.send(DomainEvent::ChallengeDetected {
                kind,
                timestamp: Utc::now(),
            });
            return Err(VigilError::HumanHandoff(kind));
        }
        Ok(())
    }

    /// Approve or reject one action step for injection.
    ///
    /// Checks the kill switch, validates the target against the region
    /// lock, and routes sensitive steps through a confirmation gate. The
    /// gate wait is bounded by the gate timeout and polls the kill switch,
    /// so neither an absent operator nor a pending gate can stall the
    /// executor past its abort latency.
    pub async fn clear(&self, action: &ActionStep) -> Result<(), VigilError> {
        self.ensure_live()?;
        self.region.validate_action(action)?;

        if action.sensitivity != Sensitivity::Sensitive {
            return Ok(());
        }

        let gate_id = self.gates.open(vec![action.clone()], action.describe());
        let mut interval = tokio::time::interval(self.gate_poll);

        loop {
            interval.tick().await;

            if self.kill.is_triggered() {
                self.gates.deny_all();
                self.gates.discard(gate_id);
                return Err(VigilError::Aborted);
            }

            self.gates.expire_overdue(Utc::now());

            match self.gates.state(gate_id) {
                Some(GateState::Pending) => continue,
                Some(GateState::Approved) => {
                    // Claim consumes the approval; a second claim of the
                    // same gate can never succeed.
                    return match self.gates.claim_approved(gate_id) {
                        Some(_) => Ok(()),
                        None => Err(VigilError::GuardrailDenied(
                            "Approval already consumed".into(),
                        )),
                    };
                }
                Some(GateState::Expired) => {
                    self.gates.discard(gate_id);
                    return Err(VigilError::GuardrailDenied(
                        "Confirmation gate expired".into(),
                    ));
                }
                Some(GateState::Denied) | None => {
                    self.gates.discard(gate_id);
                    return Err(VigilError::GuardrailDenied(
                        "Denied by operator".into(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::events::event_channel;
    use vigil_core::types::{ActionKind, ActionTarget, Point};

    fn region() -> Rect {
        Rect::new(0, 0, 1000, 800)
    }

    fn guardrails(timeout_ms: u64) -> (Guardrails, Arc<GateRegistry>, Arc<KillSwitch>) {
        let events = event_channel(64);
        let gates = Arc::new(GateRegistry::new(
            Duration::from_millis(timeout_ms),
            events.clone(),
        ));
        let kill = Arc::new(KillSwitch::new(events.clone()));
        let rails = Guardrails::new(
            region(),
            &GuardConfig::default(),
            Arc::clone(&gates),
            Arc::clone(&kill),
            events,
        )
        .unwrap()
        .with_gate_poll(Duration::from_millis(10));
        (rails, gates, kill)
    }

    fn normal_click(x: i32, y: i32) -> ActionStep {
        ActionStep::new(
            ActionKind::Click,
            ActionTarget::Coord(Point::new(x, y)),
            Sensitivity::Normal,
        )
    }

    fn sensitive_click(x: i32, y: i32) -> ActionStep {
        ActionStep::new(
            ActionKind::Click,
            ActionTarget::Coord(Point::new(x, y)),
            Sensitivity::Sensitive,
        )
    }

    #[tokio::test]
    async fn test_normal_action_clears_without_gate() {
        let (rails, gates, _) = guardrails(30_000);
        rails.clear(&normal_click(10, 10)).await.unwrap();
        assert_eq!(gates.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_region_rejected() {
        let (rails, _, _) = guardrails(30_000);
        let err = rails.clear(&normal_click(5000, 10)).await.unwrap_err();
        assert!(matches!(err, VigilError::OutOfRegion { x: 5000, y: 10 }));
    }

    #[tokio::test]
    async fn test_sensitive_action_waits_for_approval() {
        let (rails, gates, _) = guardrails(30_000);

        let approver = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                // Wait for the gate to appear, then approve it.
                loop {
                    let pending = gates.pending();
                    if let Some(view) = pending.first() {
                        gates.approve(view.id).unwrap();
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        rails.clear(&sensitive_click(10, 10)).await.unwrap();
        approver.await.unwrap();
        // The approval was consumed with the clearance.
        assert_eq!(gates.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sensitive_action_denied() {
        let (rails, gates, _) = guardrails(30_000);

        let denier = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                loop {
                    let pending = gates.pending();
                    if let Some(view) = pending.first() {
                        gates.deny(view.id).unwrap();
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let err = rails.clear(&sensitive_click(10, 10)).await.unwrap_err();
        assert!(matches!(err, VigilError::GuardrailDenied(_)));
        denier.await.unwrap();
    }

    #[tokio::test]
    async fn test_unresolved_gate_expires_and_action_discarded() {
        let (rails, gates, _) = guardrails(50);

        let err = rails.clear(&sensitive_click(10, 10)).await.unwrap_err();
        assert!(matches!(err, VigilError::GuardrailDenied(_)));
        assert!(err.to_string().contains("expired"));
        // The expired gate's action can never be claimed afterwards.
        assert_eq!(gates.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_kill_switch_aborts_gate_wait_and_denies_pending() {
        let (rails, gates, kill) = guardrails(30_000);

        let tripper = {
            let kill = Arc::clone(&kill);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                kill.trigger();
            })
        };

        let err = rails.clear(&sensitive_click(10, 10)).await.unwrap_err();
        assert!(matches!(err, VigilError::Aborted));
        tripper.await.unwrap();
        // The pending gate was implicitly denied.
        assert_eq!(gates.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_triggered_kill_switch_blocks_everything() {
        let (rails, _, kill) = guardrails(30_000);
        kill.trigger();

        let err = rails.clear(&normal_click(10, 10)).await.unwrap_err();
        assert!(matches!(err, VigilError::Aborted));
        let err = rails.ensure_live().unwrap_err();
        assert!(matches!(err, VigilError::Aborted));

        // Explicit reset re-arms.
        kill.reset();
        assert!(rails.ensure_live().is_ok());
        rails.clear(&normal_click(10, 10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_challenge_check_hands_off() {
        let (rails, _, _) = guardrails(30_000);
        let tokens = vec![OcrToken::new(
            "Enter your password",
            Rect::new(10, 10, 100, 12),
            0.9,
        )];
        let err = rails.check_challenges(&tokens).unwrap_err();
        assert!(matches!(err, VigilError::HumanHandoff(_)));

        let clean = vec![OcrToken::new("Inbox", Rect::new(10, 10, 40, 12), 0.9)];
        assert!(rails.check_challenges(&clean).is_ok());
    }
}
