//! Input injection behind a polymorphic capability.
//!
//! The executor only ever talks to the `InputInjector` trait, so tests
//! run against the recording mock and the guardrail layer is exercised
//! with no real input ever synthesized. The Windows implementation uses
//! SendInput for both mouse and keyboard events.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use vigil_core::error::VigilError;
use vigil_core::types::{ActionKind, ActionStep};

/// Capability that injects one approved action step.
#[async_trait]
pub trait InputInjector: Send + Sync {
    async fn inject(&self, action: &ActionStep) -> Result<(), VigilError>;
}

/// Recording injector for tests.
///
/// Stores every injected step; can be told to fail the next N calls.
pub struct MockInjector {
    injected: Mutex<Vec<ActionStep>>,
    fail_next: AtomicU32,
}

impl MockInjector {
    pub fn new() -> Self {
        Self {
            injected: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Make the next `count` inject calls fail.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Everything injected so far, in order.
    pub fn injected(&self) -> Vec<ActionStep> {
        self.injected.lock().unwrap().clone()
    }

    pub fn injected_count(&self) -> usize {
        self.injected.lock().unwrap().len()
    }
}

impl Default for MockInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputInjector for MockInjector {
    async fn inject(&self, action: &ActionStep) -> Result<(), VigilError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(VigilError::Injection("Mock injection failure".into()));
        }
        if let ActionKind::Wait(ms) = action.kind {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
        self.injected.lock().unwrap().push(action.clone());
        Ok(())
    }
}

/// Real input injection via the Windows SendInput API.
///
/// Pointer moves use SetCursorPos; clicks send a left-button down/up
/// pair; key presses map named keys to virtual-key codes. On non-Windows
/// platforms every call returns `VigilError::Injection`.
pub struct SendInputInjector;

impl SendInputInjector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendInputInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "windows")]
#[async_trait]
impl InputInjector for SendInputInjector {
    async fn inject(&self, action: &ActionStep) -> Result<(), VigilError> {
        debug!(action = %action.describe(), "Injecting input");
        match &action.kind {
            ActionKind::Wait(ms) => {
                tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
                Ok(())
            }
            ActionKind::PointerMove => {
                let p = action.coord().ok_or_else(|| {
                    VigilError::Injection("Pointer move without coordinate".into())
                })?;
                move_pointer(p.x, p.y)
            }
            ActionKind::Click => {
                let p = action
                    .coord()
                    .ok_or_else(|| VigilError::Injection("Click without coordinate".into()))?;
                move_pointer(p.x, p.y)?;
                send_click()
            }
            ActionKind::KeyPress(key) => {
                let vk = virtual_key(key).ok_or_else(|| {
                    VigilError::Injection(format!("Unknown key name: {}", key))
                })?;
                send_key(vk)
            }
        }
    }
}

#[cfg(target_os = "windows")]
fn move_pointer(x: i32, y: i32) -> Result<(), VigilError> {
    use windows_sys::Win32::UI::WindowsAndMessaging::SetCursorPos;

    let ok = unsafe { SetCursorPos(x, y) };
    if ok == 0 {
        return Err(VigilError::Injection(format!(
            "SetCursorPos({}, {}) failed",
            x, y
        )));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_click() -> Result<(), VigilError> {
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
        MOUSEINPUT,
    };

    let mouse = |flags: u32| INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };

    let inputs = [mouse(MOUSEEVENTF_LEFTDOWN), mouse(MOUSEEVENTF_LEFTUP)];
    let sent = unsafe {
        SendInput(
            inputs.len() as u32,
            inputs.as_ptr(),
            std::mem::size_of::<INPUT>() as i32,
        )
    };
    if sent as usize != inputs.len() {
        return Err(VigilError::Injection(format!(
            "SendInput sent {} of {} mouse events",
            sent,
            inputs.len()
        )));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_key(vk: u16) -> Result<(), VigilError> {
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP,
    };

    let key = |flags: u32| INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };

    let inputs = [key(0), key(KEYEVENTF_KEYUP)];
    let sent = unsafe {
        SendInput(
            inputs.len() as u32,
            inputs.as_ptr(),
            std::mem::size_of::<INPUT>() as i32,
        )
    };
    if sent as usize != inputs.len() {
        return Err(VigilError::Injection(format!(
            "SendInput sent {} of {} key events",
            sent,
            inputs.len()
        )));
    }
    Ok(())
}

/// Map a key name to a Windows virtual-key code.
#[cfg(target_os = "windows")]
fn virtual_key(name: &str) -> Option<u16> {
    let vk = match name.to_ascii_lowercase().as_str() {
        "backspace" => 0x08,
        "tab" => 0x09,
        "enter" | "return" => 0x0D,
        "escape" | "esc" => 0x1B,
        "space" => 0x20,
        "pageup" => 0x21,
        "pagedown" => 0x22,
        "end" => 0x23,
        "home" => 0x24,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "delete" => 0x2E,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => {
                    c.to_ascii_uppercase() as u16
                }
                _ => return None,
            }
        }
    };
    Some(vk)
}

#[cfg(not(target_os = "windows"))]
#[async_trait]
impl InputInjector for SendInputInjector {
    async fn inject(&self, action: &ActionStep) -> Result<(), VigilError> {
        debug!(action = %action.describe(), "SendInput not available on this platform");
        Err(VigilError::Injection(
            "Input injection is only available on Windows".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::{ActionTarget, Point, Sensitivity};

    fn click() -> ActionStep {
        ActionStep::new(
            ActionKind::Click,
            ActionTarget::Coord(Point::new(10, 20)),
            Sensitivity::Normal,
        )
    }

    #[tokio::test]
    async fn test_mock_records_in_order() {
        let injector = MockInjector::new();
        injector.inject(&click()).await.unwrap();
        injector
            .inject(&ActionStep::new(
                ActionKind::KeyPress("down".into()),
                ActionTarget::Focused,
                Sensitivity::Normal,
            ))
            .await
            .unwrap();

        let injected = injector.injected();
        assert_eq!(injected.len(), 2);
        assert_eq!(injected[0].kind, ActionKind::Click);
        assert_eq!(injected[1].kind, ActionKind::KeyPress("down".into()));
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let injector = MockInjector::new();
        injector.fail_next(2);

        assert!(injector.inject(&click()).await.is_err());
        assert!(injector.inject(&click()).await.is_err());
        assert!(injector.inject(&click()).await.is_ok());
        assert_eq!(injector.injected_count(), 1);
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_send_input_errors_off_windows() {
        let injector = SendInputInjector::new();
        let err = injector.inject(&click()).await.unwrap_err();
        assert!(err.to_string().contains("only available on Windows"));
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_virtual_key_mapping() {
        assert_eq!(virtual_key("down"), Some(0x28));
        assert_eq!(virtual_key("Enter"), Some(0x0D));
        assert_eq!(virtual_key("a"), Some(b'A' as u16));
        assert_eq!(virtual_key("7"), Some(b'7' as u16));
        assert_eq!(virtual_key("no-such-key"), None);
    }
}
