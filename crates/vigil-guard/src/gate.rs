//! Confirmation gate state machine and registry.
//!
//! A gate is created atomically with the sensitive action(s) it guards,
//! resolves exactly once (operator approval/denial or timeout expiry),
//! and an approved gate's actions are claimed exactly once. On shutdown
//! all pending gates are flushed to Denied.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use vigil_core::error::VigilError;
use vigil_core::events::{DomainEvent, EventSender};
use vigil_core::types::{ActionStep, GateState};

/// Validate a gate state transition.
///
/// Valid transitions (Pending is the only non-terminal state):
/// - Pending -> Approved (operator)
/// - Pending -> Denied (operator or shutdown flush)
/// - Pending -> Expired (timeout)
pub fn validate_transition(from: GateState, to: GateState) -> Result<(), VigilError> {
    let valid = matches!(
        (from, to),
        (GateState::Pending, GateState::Approved)
            | (GateState::Pending, GateState::Denied)
            | (GateState::Pending, GateState::Expired)
    );

    if valid {
        Ok(())
    } else {
        Err(VigilError::GuardrailDenied(format!(
            "Invalid gate transition: {} -> {}",
            from, to
        )))
    }
}

/// One confirmation gate and the pending action(s) it guards.
#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    pub id: Uuid,
    pub description: String,
    pub actions: Vec<ActionStep>,
    pub state: GateState,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl ConfirmationGate {
    fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_milliseconds() >= self.timeout.as_millis() as i64
    }
}

/// Read-only gate view for the operator API.
#[derive(Debug, Clone, Serialize)]
pub struct GateView {
    pub id: Uuid,
    pub description: String,
    pub state: GateState,
    pub created_at: DateTime<Utc>,
}

/// Registry of confirmation gates.
///
/// Gates stay in the registry after resolution until their actions are
/// claimed (Approved) or they are swept; claiming removes the gate so an
/// approval can never be consumed twice.
pub struct GateRegistry {
    gates: Mutex<HashMap<Uuid, ConfirmationGate>>,
    timeout: Duration,
    events: EventSender,
}

impl GateRegistry {
    pub fn new(timeout: Duration, events: EventSender) -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            timeout,
            events,
        }
    }

    /// Open a gate guarding the given actions. The gate starts Pending.
    pub fn open(&self, actions: Vec<ActionStep>, description: String) -> Uuid {
        let gate = ConfirmationGate {
            id: Uuid::new_v4(),
            description: description.clone(),
            actions,
            state: GateState::Pending,
            created_at: Utc::now(),
            timeout: self.timeout,
        };
        let id = gate.id;
        self.gates.lock().unwrap().insert(id, gate);

        info!(gate_id = %id, %description, "Confirmation gate opened");
        let _ = self.events.send(DomainEvent::GateOpened {
            gate_id: id,
            description,
            timestamp: Utc::now(),
        });
        id
    }

    /// Current state of a gate, or None if unknown/claimed.
    pub fn state(&self, id: Uuid) -> Option<GateState> {
        self.gates.lock().unwrap().get(&id).map(|g| g.state)
    }

    /// Approve a pending gate.
    pub fn approve(&self, id: Uuid) -> Result<(), VigilError> {
        self.resolve(id, GateState::Approved)
    }

    /// Deny a pending gate.
    pub fn deny(&self, id: Uuid) -> Result<(), VigilError> {
        self.resolve(id, GateState::Denied)
    }

    /// Batch-approve every pending gate. Returns how many were approved.
    ///
    /// Approval is batched; execution is not -- the executor still injects
    /// and verifies each guarded action individually.
    pub fn approve_all(&self) -> usize {
        self.resolve_all(GateState::Approved)
    }

    /// Flush every pending gate to Denied (shutdown, kill switch).
    pub fn deny_all(&self) -> usize {
        self.resolve_all(GateState::Denied)
    }

    /// Expire every pending gate older than its timeout. Each gate
    /// expires at most once; its actions are discarded, never executed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut expired = Vec::new();
        {
            let mut gates = self.gates.lock().unwrap();
            for gate in gates.values_mut() {
                if gate.state == GateState::Pending && gate.is_overdue(now) {
                    gate.state = GateState::Expired;
                    expired.push(gate.id);
                }
            }
        }
        for id in &expired {
            info!(gate_id = %id, "Confirmation gate expired");
            let _ = self.events.send(DomainEvent::GateResolved {
                gate_id: *id,
                state: GateState::Expired,
                timestamp: Utc::now(),
            });
        }
        expired
    }

    /// Claim the actions of an approved gate, removing it.
    ///
    /// Returns None unless the gate exists and is Approved; a second
    /// claim of the same gate always returns None.
    pub fn claim_approved(&self, id: Uuid) -> Option<Vec<ActionStep>> {
        let mut gates = self.gates.lock().unwrap();
        match gates.get(&id) {
            Some(gate) if gate.state == GateState::Approved => {
                gates.remove(&id).map(|g| g.actions)
            }
            _ => None,
        }
    }

    /// Drop a gate that has reached a terminal state. Pending gates are
    /// kept; returns whether anything was removed.
    pub fn discard(&self, id: Uuid) -> bool {
        let mut gates = self.gates.lock().unwrap();
        match gates.get(&id) {
            Some(gate) if gate.state.is_terminal() => gates.remove(&id).is_some(),
            _ => false,
        }
    }

    /// Snapshot of all pending gates for the operator API.
    pub fn pending(&self) -> Vec<GateView> {
        let gates = self.gates.lock().unwrap();
        let mut views: Vec<GateView> = gates
            .values()
            .filter(|g| g.state == GateState::Pending)
            .map(|g| GateView {
                id: g.id,
                description: g.description.clone(),
                state: g.state,
                created_at: g.created_at,
            })
            .collect();
        views.sort_by_key(|v| v.created_at);
        views
    }

    pub fn pending_count(&self) -> usize {
        self.gates
            .lock()
            .unwrap()
            .values()
            .filter(|g| g.state == GateState::Pending)
            .count()
    }

    fn resolve(&self, id: Uuid, to: GateState) -> Result<(), VigilError> {
        {
            let mut gates = self.gates.lock().unwrap();
            let gate = gates.get_mut(&id).ok_or_else(|| {
                VigilError::GuardrailDenied(format!("Unknown gate: {}", id))
            })?;
            validate_transition(gate.state, to)?;
            gate.state = to;
        }

        info!(gate_id = %id, state = %to, "Confirmation gate resolved");
        let _ = self.events.send(DomainEvent::GateResolved {
            gate_id: id,
            state: to,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn resolve_all(&self, to: GateState) -> usize {
        let ids: Vec<Uuid> = {
            let gates = self.gates.lock().unwrap();
            gates
                .values()
                .filter(|g| g.state == GateState::Pending)
                .map(|g| g.id)
                .collect()
        };
        let mut resolved = 0;
        for id in ids {
            if self.resolve(id, to).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }
}
