//! Declarative intent plans.
//!
//! An intent is a named, ordered plan of steps defined by static
//! configuration -- never created at runtime. Each step carries a primary
//! action template, ordered fallbacks, and a verification condition.
//! Primary templates come first because they are cheaper and less
//! error-prone than coordinate-based clicking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vigil_core::types::{
    ActionKind, ActionStep, ActionTarget, OcrToken, Point, Rect, Sensitivity,
};
use vigil_perception::PerceptionAdapter;

/// An action whose target may still need to be located on screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTemplate {
    /// Press a named key in the focused window.
    KeyPress(String),
    /// Click the token best matching the pattern.
    ClickToken(String),
    /// Move the pointer onto the token best matching the pattern.
    HoverToken(String),
    /// Click an absolute screen coordinate.
    ClickAt(Point),
    /// Idle for the given milliseconds.
    Wait(u64),
}

impl ActionTemplate {
    /// Resolve the template into a concrete action step against the
    /// current tokens. Token bounds are frame-local, so located targets
    /// are offset by the region origin into screen coordinates.
    ///
    /// Returns None when a token-based target cannot be located.
    pub fn resolve(
        &self,
        perception: &PerceptionAdapter,
        tokens: &[OcrToken],
        region: Rect,
        sensitivity: Sensitivity,
    ) -> Option<ActionStep> {
        match self {
            ActionTemplate::KeyPress(key) => Some(ActionStep::new(
                ActionKind::KeyPress(key.clone()),
                ActionTarget::Focused,
                sensitivity,
            )),
            ActionTemplate::Wait(ms) => Some(ActionStep::new(
                ActionKind::Wait(*ms),
                ActionTarget::Focused,
                sensitivity,
            )),
            ActionTemplate::ClickAt(p) => Some(ActionStep::new(
                ActionKind::Click,
                ActionTarget::Coord(*p),
                sensitivity,
            )),
            ActionTemplate::ClickToken(pattern) => {
                let token = perception.locate(pattern, tokens)?;
                let c = token.bounds.center();
                Some(ActionStep::new(
                    ActionKind::Click,
                    ActionTarget::Coord(Point::new(region.x + c.x, region.y + c.y)),
                    sensitivity,
                ))
            }
            ActionTemplate::HoverToken(pattern) => {
                let token = perception.locate(pattern, tokens)?;
                let c = token.bounds.center();
                Some(ActionStep::new(
                    ActionKind::PointerMove,
                    ActionTarget::Coord(Point::new(region.x + c.x, region.y + c.y)),
                    sensitivity,
                ))
            }
        }
    }
}

/// Condition that must hold after an action for the step to count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySpec {
    /// The locked region's content (pixels or visible text) changed.
    ContentChanged,
    /// The token matching the pattern is no longer present.
    TokenGone(String),
    /// No verification; the action counts once injected.
    None,
}

/// One step of an intent plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepSpec {
    pub primary: ActionTemplate,
    #[serde(default)]
    pub fallbacks: Vec<ActionTemplate>,
    pub verify: VerifySpec,
}

/// How the executor runs an intent's steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    /// Run each step once, in order.
    Sequence,
    /// Repeat the single advance step `count` times, recording one item
    /// per verified advance.
    Batch,
}

/// A named, declarative intent plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentSpec {
    pub name: String,
    pub sensitivity: Sensitivity,
    pub mode: IntentMode,
    pub steps: Vec<StepSpec>,
}

/// Registry of the intents the executor accepts.
pub struct IntentRegistry {
    intents: HashMap<String, IntentSpec>,
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self {
            intents: HashMap::new(),
        }
    }

    /// Registry with the built-in intents.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Advance to the next item: cheap directional key first, then a
        // located "next" click. Spanish pattern included for es-locale UIs.
        let advance_step = StepSpec {
            primary: ActionTemplate::KeyPress("down".to_string()),
            fallbacks: vec![
                ActionTemplate::ClickToken("next".to_string()),
                ActionTemplate::ClickToken("siguiente".to_string()),
            ],
            verify: VerifySpec::ContentChanged,
        };

        registry.register(IntentSpec {
            name: "next_email".to_string(),
            sensitivity: Sensitivity::Normal,
            mode: IntentMode::Sequence,
            steps: vec![advance_step.clone()],
        });

        registry.register(IntentSpec {
            name: "capture_batch".to_string(),
            sensitivity: Sensitivity::Normal,
            mode: IntentMode::Batch,
            steps: vec![advance_step],
        });

        registry
    }

    pub fn register(&mut self, spec: IntentSpec) {
        self.intents.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&IntentSpec> {
        self.intents.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.intents.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
