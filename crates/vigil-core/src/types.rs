use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Geometry
// =============================================================================

/// A point in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An axis-aligned rectangle in screen coordinates.
///
/// Used for the capture region, the region lock, and OCR token bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// Whether the point lies inside this rectangle.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> Point {
        Point {
            x: self.x + (self.width / 2) as i32,
            y: self.y + (self.height / 2) as i32,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

// =============================================================================
// Frames and tokens
// =============================================================================

/// One captured frame of the locked region.
///
/// Immutable once produced. The pixel buffer is reference-counted so the
/// frame hub, stream subscribers, and the perception adapter share it
/// without copying; `Clone` is cheap.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The screen region this frame covers.
    pub region: Rect,
    pub width: u32,
    pub height: u32,
    /// Raw BGRA8 pixels, row-major, `width * height * 4` bytes.
    pub pixels: Arc<[u8]>,
}

impl Frame {
    /// Build a frame over the given region from a raw BGRA buffer.
    pub fn new(region: Rect, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            region,
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Content signature over the raw pixels.
    ///
    /// Two frames of the same region with identical content hash equal;
    /// used by the executor's "content changed" verification.
    pub fn content_signature(&self) -> [u8; 32] {
        *blake3::hash(&self.pixels).as_bytes()
    }
}

/// A recognized text span with its location and confidence.
///
/// Produced per perception query; never persisted beyond the query that
/// created it. Bounds are in frame coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub bounds: Rect,
    pub confidence: f32,
}

impl OcrToken {
    pub fn new(text: impl Into<String>, bounds: Rect, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bounds,
            confidence,
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Sensitivity classification of an intent or action step.
///
/// Sensitive steps must pass through a confirmation gate before injection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Normal,
    Sensitive,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensitivity::Normal => write!(f, "normal"),
            Sensitivity::Sensitive => write!(f, "sensitive"),
        }
    }
}

/// The kind of input an action step injects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Move the pointer to the target without clicking.
    PointerMove,
    /// Left-click at the target.
    Click,
    /// Press and release a named key (e.g. "down", "enter").
    KeyPress(String),
    /// Idle for the given number of milliseconds.
    Wait(u64),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::PointerMove => write!(f, "pointer_move"),
            ActionKind::Click => write!(f, "click"),
            ActionKind::KeyPress(key) => write!(f, "key_press({})", key),
            ActionKind::Wait(ms) => write!(f, "wait({}ms)", ms),
        }
    }
}

/// Where an action step lands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    /// An absolute screen coordinate.
    Coord(Point),
    /// No coordinate -- key presses and waits go to the focused window.
    Focused,
}

/// A single concrete action ready for injection.
///
/// Created by the executor per decision cycle and consumed immediately;
/// sensitivity is inherited from the owning intent step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub kind: ActionKind,
    pub target: ActionTarget,
    pub sensitivity: Sensitivity,
}

impl ActionStep {
    pub fn new(kind: ActionKind, target: ActionTarget, sensitivity: Sensitivity) -> Self {
        Self {
            kind,
            target,
            sensitivity,
        }
    }

    /// Coordinate this step lands on, if it has one.
    pub fn coord(&self) -> Option<Point> {
        match self.target {
            ActionTarget::Coord(p) => Some(p),
            ActionTarget::Focused => None,
        }
    }

    /// Human-readable description shown in confirmation gates.
    pub fn describe(&self) -> String {
        match &self.target {
            ActionTarget::Coord(p) => format!("{} at {}", self.kind, p),
            ActionTarget::Focused => format!("{} to focused window", self.kind),
        }
    }
}

// =============================================================================
// Intent outcomes
// =============================================================================

/// Terminal status of an intent execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// All steps completed and verified.
    Success,
    /// Some steps completed before the retry budget ran out.
    Partial,
    /// No progress was possible.
    Failed,
    /// Terminated by the kill switch, a guardrail denial, or a
    /// human-handoff condition.
    Aborted,
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentStatus::Success => write!(f, "success"),
            IntentStatus::Partial => write!(f, "partial"),
            IntentStatus::Failed => write!(f, "failed"),
            IntentStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// The result of executing an intent, reported to the caller even on
/// failure so partial progress is always observable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentReport {
    pub status: IntentStatus,
    pub detail: String,
    pub steps_completed: u32,
    pub fallback_used: bool,
    /// Items recorded by batch intents (empty otherwise).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

impl IntentReport {
    pub fn new(status: IntentStatus, detail: impl Into<String>, steps_completed: u32) -> Self {
        Self {
            status,
            detail: detail.into(),
            steps_completed,
            fallback_used: false,
            items: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, used: bool) -> Self {
        self.fallback_used = used;
        self
    }

    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.items = items;
        self
    }
}

// =============================================================================
// Guard states
// =============================================================================

/// Confirmation gate lifecycle. Pending is the only non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl GateState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GateState::Pending)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Pending => write!(f, "pending"),
            GateState::Approved => write!(f, "approved"),
            GateState::Denied => write!(f, "denied"),
            GateState::Expired => write!(f, "expired"),
        }
    }
}

/// Process-wide kill switch state. Triggered is sticky until reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchState {
    Armed,
    Triggered,
}

impl fmt::Display for KillSwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillSwitchState::Armed => write!(f, "armed"),
            KillSwitchState::Triggered => write!(f, "triggered"),
        }
    }
}

/// Watchdog supervision state. Failed is terminal and requires an
/// external reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Running,
    Restarting,
    Failed,
}

impl fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogState::Running => write!(f, "running"),
            WatchdogState::Restarting => write!(f, "restarting"),
            WatchdogState::Failed => write!(f, "failed"),
        }
    }
}

/// The family of authentication challenge detected on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Login,
    Mfa,
    Captcha,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Login => write!(f, "login"),
            ChallengeKind::Mfa => write!(f, "mfa"),
            ChallengeKind::Captcha => write!(f, "captcha"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Rect {
        Rect::new(100, 50, 800, 600)
    }

    // ---- Rect ----

    #[test]
    fn test_rect_contains_point() {
        let r = region();
        assert!(r.contains(Point::new(100, 50)));
        assert!(r.contains(Point::new(899, 649)));
        assert!(!r.contains(Point::new(900, 50)));
        assert!(!r.contains(Point::new(100, 650)));
        assert!(!r.contains(Point::new(99, 60)));
    }

    #[test]
    fn test_rect_contains_rect() {
        let r = region();
        assert!(r.contains_rect(&Rect::new(100, 50, 800, 600)));
        assert!(r.contains_rect(&Rect::new(200, 100, 10, 10)));
        assert!(!r.contains_rect(&Rect::new(99, 50, 800, 600)));
        assert!(!r.contains_rect(&Rect::new(100, 50, 801, 600)));
    }

    #[test]
    fn test_rect_center() {
        let r = Rect::new(0, 0, 100, 50);
        assert_eq!(r.center(), Point::new(50, 25));
        let r = region();
        assert_eq!(r.center(), Point::new(500, 350));
    }

    #[test]
    fn test_rect_display() {
        assert_eq!(region().to_string(), "800x600+100+50");
    }

    // ---- Frame ----

    #[test]
    fn test_frame_signature_stable_for_same_pixels() {
        let f1 = Frame::new(region(), 2, 2, vec![0u8; 16]);
        let f2 = Frame::new(region(), 2, 2, vec![0u8; 16]);
        assert_ne!(f1.id, f2.id);
        assert_eq!(f1.content_signature(), f2.content_signature());
    }

    #[test]
    fn test_frame_signature_differs_for_different_pixels() {
        let f1 = Frame::new(region(), 2, 2, vec![0u8; 16]);
        let f2 = Frame::new(region(), 2, 2, vec![1u8; 16]);
        assert_ne!(f1.content_signature(), f2.content_signature());
    }

    #[test]
    fn test_frame_clone_shares_pixels() {
        let f = Frame::new(region(), 2, 2, vec![7u8; 16]);
        let g = f.clone();
        assert!(Arc::ptr_eq(&f.pixels, &g.pixels));
    }

    // ---- ActionStep ----

    #[test]
    fn test_action_step_coord() {
        let step = ActionStep::new(
            ActionKind::Click,
            ActionTarget::Coord(Point::new(10, 20)),
            Sensitivity::Normal,
        );
        assert_eq!(step.coord(), Some(Point::new(10, 20)));

        let step = ActionStep::new(
            ActionKind::KeyPress("down".into()),
            ActionTarget::Focused,
            Sensitivity::Normal,
        );
        assert_eq!(step.coord(), None);
    }

    #[test]
    fn test_action_step_describe() {
        let step = ActionStep::new(
            ActionKind::Click,
            ActionTarget::Coord(Point::new(10, 20)),
            Sensitivity::Sensitive,
        );
        assert_eq!(step.describe(), "click at (10, 20)");

        let step = ActionStep::new(
            ActionKind::KeyPress("down".into()),
            ActionTarget::Focused,
            Sensitivity::Normal,
        );
        assert_eq!(step.describe(), "key_press(down) to focused window");
    }

    // ---- Enum serialization ----

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&IntentStatus::Partial).unwrap(),
            "\"partial\""
        );
        assert_eq!(
            serde_json::to_string(&GateState::Expired).unwrap(),
            "\"expired\""
        );
        assert_eq!(
            serde_json::to_string(&WatchdogState::Restarting).unwrap(),
            "\"restarting\""
        );
    }

    #[test]
    fn test_gate_state_terminal() {
        assert!(!GateState::Pending.is_terminal());
        assert!(GateState::Approved.is_terminal());
        assert!(GateState::Denied.is_terminal());
        assert!(GateState::Expired.is_terminal());
    }

    #[test]
    fn test_intent_report_builders() {
        let report = IntentReport::new(IntentStatus::Success, "done", 3)
            .with_fallback(true)
            .with_items(vec!["a".into(), "b".into()]);
        assert_eq!(report.status, IntentStatus::Success);
        assert_eq!(report.steps_completed, 3);
        assert!(report.fallback_used);
        assert_eq!(report.items.len(), 2);
    }

    #[test]
    fn test_intent_report_serde_omits_empty_items() {
        let report = IntentReport::new(IntentStatus::Failed, "nope", 0);
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("items"));
        assert!(json.contains("\"failed\""));
    }

    #[test]
    fn test_displays() {
        assert_eq!(ActionKind::Click.to_string(), "click");
        assert_eq!(ActionKind::KeyPress("down".into()).to_string(), "key_press(down)");
        assert_eq!(ActionKind::Wait(250).to_string(), "wait(250ms)");
        assert_eq!(ChallengeKind::Captcha.to_string(), "captcha");
        assert_eq!(KillSwitchState::Triggered.to_string(), "triggered");
    }
}
