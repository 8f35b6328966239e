//! Vigil executor crate - guarded intent execution.
//!
//! Interprets named intents into perceive -> decide -> act -> verify
//! cycles with fallback strategies and bounded retries, submitting every
//! action to the guardrail layer before injection.

pub mod executor;
pub mod inject;
pub mod plan;

pub use executor::Executor;
pub use inject::{InputInjector, MockInjector, SendInputInjector};
pub use plan::{ActionTemplate, IntentMode, IntentRegistry, IntentSpec, StepSpec, VerifySpec};
