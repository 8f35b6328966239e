//! The intent executor: perceive -> decide -> act -> verify.
//!
//! Coordinates the perception adapter, the guardrail layer, and the
//! input injector into the guarded execution loop. Intent execution is
//! strictly serialized: the desktop's pointer, keyboard, and focus are a
//! single shared resource, so a concurrent request is rejected Busy
//! rather than interleaved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use vigil_capture::FrameHub;
use vigil_core::config::ExecutorConfig;
use vigil_core::error::VigilError;
use vigil_core::events::{DomainEvent, EventSender};
use vigil_core::types::{IntentReport, IntentStatus, OcrToken};
use vigil_guard::Guardrails;
use vigil_perception::PerceptionAdapter;

use crate::inject::InputInjector;
use crate::plan::{ActionTemplate, IntentMode, IntentRegistry, IntentSpec, StepSpec, VerifySpec};

/// One observation of the locked region: the latest frame's
/// interpretation and content signatures.
struct Observation {
    tokens: Vec<OcrToken>,
    frame_sig: [u8; 32],
    text_sig: u64,
}

/// The guarded intent execution engine.
pub struct Executor {
    perception: Arc<PerceptionAdapter>,
    injector: Arc<dyn InputInjector>,
    guardrails: Arc<Guardrails>,
    hub: Arc<FrameHub>,
    registry: IntentRegistry,
    config: ExecutorConfig,
    events: EventSender,
    running: tokio::sync::Mutex<()>,
}

impl Executor {
    pub fn new(
        perception: Arc<PerceptionAdapter>,
        injector: Arc<dyn InputInjector>,
        guardrails: Arc<Guardrails>,
        hub: Arc<FrameHub>,
        registry: IntentRegistry,
        config: ExecutorConfig,
        events: EventSender,
    ) -> Self {
        Self {
            perception,
            injector,
            guardrails,
            hub,
            registry,
            config,
            events,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    /// Whether an intent is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Execute a named intent.
    ///
    /// Returns Err only for request-level problems (unknown intent, an
    /// intent already in flight); every execution outcome -- including
    /// aborts and partial failures -- is reported in the IntentReport so
    /// partial progress stays observable.
    pub async fn execute(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<IntentReport, VigilError> {
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| VigilError::UnknownIntent(name.to_string()))?
            .clone();

        let _running = self.running.try_lock().map_err(|_| VigilError::Busy)?;

        info!(intent = name, "Intent started");
        let _ = self.events.send(DomainEvent::IntentStarted {
            name: name.to_string(),
            timestamp: Utc::now(),
        });

        let report = match spec.mode {
            IntentMode::Sequence => self.run_sequence(&spec).await,
            IntentMode::Batch => {
                let count = batch_count(params);
                self.run_batch(&spec, count).await
            }
        };

        info!(
            intent = name,
            status = %report.status,
            steps_completed = report.steps_completed,
            "Intent finished"
        );
        let _ = self.events.send(DomainEvent::IntentFinished {
            name: name.to_string(),
            status: report.status,
            steps_completed: report.steps_completed,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    async fn run_sequence(&self, spec: &IntentSpec) -> IntentReport {
        let mut steps_completed = 0u32;
        let mut fallback_used = false;

        for step in &spec.steps {
            match self.run_step(spec, step, &mut fallback_used).await {
                Ok(()) => steps_completed += 1,
                Err(e) => return report_for_error(&e, steps_completed, fallback_used),
            }
        }

        IntentReport::new(
            IntentStatus::Success,
            format!("{} steps verified", steps_completed),
            steps_completed,
        )
        .with_fallback(fallback_used)
    }

    /// Repeat the advance step `count` times, recording one item per
    /// verified advance. An unchanged view after the retry budget ends
    /// the batch as Partial -- the count is never incremented without a
    /// verified content change, so an item can never be double-counted.
    async fn run_batch(&self, spec: &IntentSpec, count: u32) -> IntentReport {
        let step = match spec.steps.first() {
            Some(step) => step,
            None => {
                return IntentReport::new(
                    IntentStatus::Failed,
                    "Batch intent has no advance step",
                    0,
                )
            }
        };

        let mut items: Vec<String> = Vec::new();
        let mut fallback_used = false;

        for _ in 0..count {
            // Perceive the current item before advancing past it.
            let item = match self.observe().await {
                Ok(obs) => obs
                    .tokens
                    .first()
                    .map(|t| t.text.clone())
                    .unwrap_or_default(),
                Err(e) => {
                    let done = items.len() as u32;
                    return report_for_error(&e, done, fallback_used).with_items(items);
                }
            };

            match self.run_step(spec, step, &mut fallback_used).await {
                Ok(()) => items.push(item),
                Err(e) => {
                    let done = items.len() as u32;
                    return report_for_error(&e, done, fallback_used).with_items(items);
                }
            }
        }

        let done = items.len() as u32;
        IntentReport::new(
            IntentStatus::Success,
            format!("Captured {} items", done),
            done,
        )
        .with_fallback(fallback_used)
        .with_items(items)
    }

    /// Run one step with retries and fallback escalation.
    ///
    /// The kill switch and challenge detectors are evaluated before every
    /// attempt -- not only at intent start -- bounding abort latency to one
    /// step.
    async fn run_step(
        &self,
        spec: &IntentSpec,
        step: &StepSpec,
        fallback_used: &mut bool,
    ) -> Result<(), VigilError> {
        let region = self.guardrails.region();
        let candidates: Vec<&ActionTemplate> =
            std::iter::once(&step.primary).chain(step.fallbacks.iter()).collect();
        let mut last_err: Option<VigilError> = None;

        for attempt in 0..=self.config.retry_limit {
            self.guardrails.ensure_live()?;

            let obs = match self.observe().await {
                Ok(obs) => obs,
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, attempt, "Observation failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(self.config.verify_poll_ms)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.guardrails.check_challenges(&obs.tokens)?;

            // Escalate through the candidate list across attempts: the
            // first attempt starts at the cheap primary, each retry
            // starts one fallback further, wrapping so an unresolvable
            // fallback does not strand the step.
            let start = (attempt as usize).min(candidates.len() - 1);
            let order = candidates
                .iter()
                .enumerate()
                .skip(start)
                .chain(candidates.iter().enumerate().take(start));

            let mut chosen = None;
            for (idx, template) in order {
                if let Some(action) =
                    template.resolve(&self.perception, &obs.tokens, region, spec.sensitivity)
                {
                    chosen = Some((idx, action));
                    break;
                }
            }

            let (idx, action) = match chosen {
                Some(found) => found,
                None => {
                    last_err = Some(VigilError::Perception(
                        "No actionable target matched the step".into(),
                    ));
                    tokio::time::sleep(Duration::from_millis(self.config.verify_poll_ms)).await;
                    continue;
                }
            };

            if idx > 0 {
                *fallback_used = true;
            }

            debug!(attempt, candidate = idx, action = %action.describe(), "Executing step action");

            self.guardrails.clear(&action).await?;
            self.injector.inject(&action).await?;

            // The cheap primary only gets the short fallback delay to
            // show an effect; an escalated action gets the full budget.
            let window_ms = if idx == 0 && !step.fallbacks.is_empty() {
                self.config.fallback_delay_ms
            } else {
                self.config.verify_timeout_ms
            };

            match self.verify(&step.verify, &obs, window_ms).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, attempt, "Verification failed; retrying step");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(VigilError::VerificationTimeout {
            waited_ms: self.config.verify_timeout_ms,
        }))
    }

    /// Wait (bounded) for the step's verification condition, polling the
    /// kill switch on every cycle so the wait is always interruptible.
    async fn verify(
        &self,
        spec: &VerifySpec,
        baseline: &Observation,
        window_ms: u64,
    ) -> Result<(), VigilError> {
        if matches!(spec, VerifySpec::None) {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(window_ms);

        loop {
            tokio::time::sleep(Duration::from_millis(self.config.verify_poll_ms)).await;
            self.guardrails.ensure_live()?;

            match self.observe().await {
                Ok(obs) => {
                    let verified = match spec {
                        VerifySpec::ContentChanged => {
                            obs.frame_sig != baseline.frame_sig
                                || obs.text_sig != baseline.text_sig
                        }
                        VerifySpec::TokenGone(pattern) => {
                            self.perception.locate(pattern, &obs.tokens).is_none()
                        }
                        VerifySpec::None => true,
                    };
                    if verified {
                        return Ok(());
                    }
                }
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Observation failed during verification");
                }
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(VigilError::VerificationTimeout {
                    waited_ms: window_ms,
                });
            }
        }
    }

    async fn observe(&self) -> Result<Observation, VigilError> {
        let frame = self
            .hub
            .snapshot()
            .ok_or_else(|| VigilError::Capture("No frame available yet".into()))?;
        let tokens = self.perception.interpret(&frame).await?;
        let frame_sig = frame.content_signature();
        let text_sig = PerceptionAdapter::text_signature(&tokens);
        Ok(Observation {
            tokens,
            frame_sig,
            text_sig,
        })
    }
}

/// Map a terminal step error into the user-visible intent report.
///
/// Aborts (kill switch, guardrail denial, human handoff) are surfaced
/// as-is in the detail; retry exhaustion is Partial with the completed
/// count; everything else is Failed.
fn report_for_error(e: &VigilError, steps_completed: u32, fallback_used: bool) -> IntentReport {
    let status = match e {
        VigilError::Aborted | VigilError::HumanHandoff(_) | VigilError::GuardrailDenied(_) => {
            IntentStatus::Aborted
        }
        e if e.is_retryable() => IntentStatus::Partial,
        _ => IntentStatus::Failed,
    };
    IntentReport::new(status, e.to_string(), steps_completed).with_fallback(fallback_used)
}

fn batch_count(params: &serde_json::Value) -> u32 {
    params
        .get("count")
        .or_else(|| params.get("n"))
        .and_then(|v| v.as_u64())
        .unwrap_or(1) as u32
}
