//! Real Windows region capture via Win32 GDI APIs.
//!
//! Captures the locked region with BitBlt into an in-memory 32-bit BGRA
//! buffer. On non-Windows platforms every call returns
//! `VigilError::Capture`, which the watchdog treats like any other
//! unrecoverable capture failure.

use async_trait::async_trait;
#[cfg(not(target_os = "windows"))]
use tracing::warn;

use vigil_core::error::VigilError;
use vigil_core::types::{Frame, Rect};

use crate::CaptureSource;

/// Windows screen capture source using Win32 GDI.
pub struct GdiCaptureSource;

impl GdiCaptureSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GdiCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Windows implementation
// =============================================================================

#[cfg(target_os = "windows")]
#[async_trait]
impl CaptureSource for GdiCaptureSource {
    async fn grab(&self, region: Rect) -> Result<Frame, VigilError> {
        // GDI calls are blocking; keep them off the async workers.
        let pixels = tokio::task::spawn_blocking(move || unsafe { grab_region_bgra(region) })
            .await
            .map_err(|e| VigilError::Capture(format!("Capture task panicked: {}", e)))??;

        Ok(Frame::new(region, region.width, region.height, pixels))
    }

    fn screen_bounds(&self) -> Result<Rect, VigilError> {
        use windows_sys::Win32::UI::WindowsAndMessaging::{
            GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN,
        };

        let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        if width <= 0 || height <= 0 {
            return Err(VigilError::Capture("No display available".into()));
        }
        Ok(Rect::new(0, 0, width as u32, height as u32))
    }
}

#[cfg(target_os = "windows")]
unsafe fn grab_region_bgra(region: Rect) -> Result<Vec<u8>, VigilError> {
    use windows_sys::Win32::Graphics::Gdi::*;

    let hdc_screen = GetDC(0);
    if hdc_screen == 0 {
        return Err(VigilError::Capture("Failed to get screen DC".into()));
    }

    let width = region.width as i32;
    let height = region.height as i32;

    let hdc_mem = CreateCompatibleDC(hdc_screen);
    let hbm = CreateCompatibleBitmap(hdc_screen, width, height);
    let old_bm = SelectObject(hdc_mem, hbm);

    let success = BitBlt(
        hdc_mem, 0, 0, width, height, hdc_screen, region.x, region.y, SRCCOPY,
    );
    if success == 0 {
        SelectObject(hdc_mem, old_bm);
        DeleteObject(hbm);
        DeleteDC(hdc_mem);
        ReleaseDC(0, hdc_screen);
        return Err(VigilError::Capture("BitBlt failed".into()));
    }

    // 32-bit top-down DIB: one BGRA quad per pixel, no stride padding.
    let image_size = (width * height * 4) as usize;
    let mut pixels = vec![0u8; image_size];

    // Pack BITMAPINFOHEADER manually (40 bytes).
    let mut bih = [0u8; 40];
    bih[0..4].copy_from_slice(&40u32.to_le_bytes());
    bih[4..8].copy_from_slice(&width.to_le_bytes());
    bih[8..12].copy_from_slice(&(-height).to_le_bytes()); // negative = top-down
    bih[12..14].copy_from_slice(&1u16.to_le_bytes()); // planes
    bih[14..16].copy_from_slice(&32u16.to_le_bytes()); // bpp

    let copied = GetDIBits(
        hdc_mem,
        hbm,
        0,
        height as u32,
        pixels.as_mut_ptr() as *mut _,
        bih.as_mut_ptr() as *mut _,
        DIB_RGB_COLORS,
    );

    SelectObject(hdc_mem, old_bm);
    DeleteObject(hbm);
    DeleteDC(hdc_mem);
    ReleaseDC(0, hdc_screen);

    if copied == 0 {
        return Err(VigilError::Capture("GetDIBits failed".into()));
    }

    Ok(pixels)
}

// =============================================================================
// Non-Windows stub
// =============================================================================

#[cfg(not(target_os = "windows"))]
#[async_trait]
impl CaptureSource for GdiCaptureSource {
    async fn grab(&self, _region: Rect) -> Result<Frame, VigilError> {
        warn!("GdiCaptureSource called on non-Windows platform");
        Err(VigilError::Capture(
            "GDI screen capture is only available on Windows".into(),
        ))
    }

    fn screen_bounds(&self) -> Result<Rect, VigilError> {
        Err(VigilError::Capture(
            "GDI screen capture is only available on Windows".into(),
        ))
    }
}
