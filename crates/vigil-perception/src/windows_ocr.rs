//! Real Windows OCR via `Windows.Media.Ocr`.
//!
//! Wraps a frame's raw BGRA buffer in a `SoftwareBitmap` and runs the
//! system OCR engine, producing word-level tokens with bounding boxes in
//! frame coordinates. On non-Windows platforms every call returns
//! `VigilError::Perception`.

#[cfg(target_os = "windows")]
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(target_os = "windows")]
use tracing::debug;
#[cfg(not(target_os = "windows"))]
use tracing::warn;

use vigil_core::error::VigilError;
use vigil_core::types::{Frame, OcrToken};

use crate::OcrEngine;

/// Configuration for the Windows OCR engine.
#[derive(Debug, Clone)]
pub struct OcrEngineConfig {
    /// BCP-47 language tag (e.g., "en-US", "es").
    pub language: String,
}

impl Default for OcrEngineConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
        }
    }
}

/// Windows OCR engine using `Windows.Media.Ocr`.
///
/// The WinRT API reports no per-word confidence, so tokens carry 1.0 and
/// the adapter's confidence floor only filters engines that do report one.
pub struct WindowsOcrEngine {
    config: OcrEngineConfig,
}

impl WindowsOcrEngine {
    pub fn new(config: OcrEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OcrEngineConfig {
        &self.config
    }
}

// =============================================================================
// Windows implementation
// =============================================================================

#[cfg(target_os = "windows")]
#[async_trait]
impl OcrEngine for WindowsOcrEngine {
    async fn recognize(&self, frame: &Frame) -> Result<Vec<OcrToken>, VigilError> {
        if frame.pixels.is_empty() {
            return Err(VigilError::Perception("Empty frame buffer".into()));
        }

        let pixels: Arc<[u8]> = Arc::clone(&frame.pixels);
        let (width, height) = (frame.width, frame.height);
        let lang = self.config.language.clone();

        // WinRT calls are blocking COM, offload to a blocking thread.
        tokio::task::spawn_blocking(move || ocr_from_bgra(&pixels, width, height, &lang))
            .await
            .map_err(|e| VigilError::Perception(format!("OCR task panicked: {}", e)))?
    }
}

#[cfg(target_os = "windows")]
fn ocr_from_bgra(
    pixels: &[u8],
    width: u32,
    height: u32,
    language: &str,
) -> Result<Vec<OcrToken>, VigilError> {
    use windows::core::HSTRING;
    use windows::Globalization::Language;
    use windows::Graphics::Imaging::{BitmapPixelFormat, SoftwareBitmap};
    use windows::Media::Ocr::OcrEngine as WinOcrEngine;
    use windows::Storage::Streams::DataWriter;

    let err = |stage: &str, e: windows::core::Error| {
        VigilError::Perception(format!("{} failed: {}", stage, e))
    };

    // Wrap the BGRA buffer in an IBuffer and copy it into a SoftwareBitmap.
    let writer = DataWriter::new().map_err(|e| err("DataWriter", e))?;
    writer.WriteBytes(pixels).map_err(|e| err("WriteBytes", e))?;
    let buffer = writer.DetachBuffer().map_err(|e| err("DetachBuffer", e))?;

    let bitmap = SoftwareBitmap::CreateCopyFromBuffer(
        &buffer,
        BitmapPixelFormat::Bgra8,
        width as i32,
        height as i32,
    )
    .map_err(|e| err("SoftwareBitmap", e))?;

    let lang = Language::CreateLanguage(&HSTRING::from(language))
        .map_err(|e| err("Language", e))?;
    let engine =
        WinOcrEngine::TryCreateFromLanguage(&lang).map_err(|e| err("OcrEngine", e))?;

    let result = engine
        .RecognizeAsync(&bitmap)
        .map_err(|e| err("RecognizeAsync", e))?
        .get()
        .map_err(|e| err("RecognizeAsync get", e))?;

    let mut tokens = Vec::new();
    let lines = result.Lines().map_err(|e| err("Lines", e))?;
    for line in &lines {
        let words = line.Words().map_err(|e| err("Words", e))?;
        for word in &words {
            let text = word.Text().map_err(|e| err("word Text", e))?;
            let rect = word.BoundingRect().map_err(|e| err("BoundingRect", e))?;
            tokens.push(OcrToken::new(
                text.to_string_lossy(),
                vigil_core::types::Rect::new(
                    rect.X as i32,
                    rect.Y as i32,
                    rect.Width.max(0.0) as u32,
                    rect.Height.max(0.0) as u32,
                ),
                1.0,
            ));
        }
    }

    debug!(tokens = tokens.len(), "OCR completed");
    Ok(tokens)
}

// =============================================================================
// Non-Windows stub
// =============================================================================

#[cfg(not(target_os = "windows"))]
#[async_trait]
impl OcrEngine for WindowsOcrEngine {
    async fn recognize(&self, _frame: &Frame) -> Result<Vec<OcrToken>, VigilError> {
        warn!("WindowsOcrEngine called on non-Windows platform");
        Err(VigilError::Perception(
            "Windows OCR is only available on Windows".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_engine_config_default() {
        let config = OcrEngineConfig::default();
        assert_eq!(config.language, "en-US");
    }

    #[test]
    fn test_ocr_engine_creation() {
        let engine = WindowsOcrEngine::new(OcrEngineConfig {
            language: "es".to_string(),
        });
        assert_eq!(engine.config().language, "es");
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_recognize_returns_error_on_non_windows() {
        use vigil_core::types::Rect;

        let engine = WindowsOcrEngine::new(OcrEngineConfig::default());
        let frame = Frame::new(Rect::new(0, 0, 2, 2), 2, 2, vec![0; 16]);
        let result = engine.recognize(&frame).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("only available on Windows"));
    }
}
