//! Vigil perception crate - OCR engine trait and fuzzy text location.
//!
//! Provides the OcrEngine trait for token extraction from frames, a
//! MockOcrEngine for testing, a WindowsOcrEngine using `Windows.Media.Ocr`,
//! and the PerceptionAdapter: the sole point where raw screen content
//! becomes structured, decision-usable tokens. Everything downstream
//! operates on tokens, never on raw pixels.

pub mod windows_ocr;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use vigil_core::config::PerceptionConfig;
use vigil_core::error::VigilError;
use vigil_core::types::{Frame, OcrToken};

pub use windows_ocr::{OcrEngineConfig, WindowsOcrEngine};

/// Engine that recognizes located text tokens in a frame.
///
/// Implementations wrap platform OCR capabilities behind a uniform async
/// interface; failure surfaces as `VigilError::Perception`, never a crash.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize all text tokens in the frame. Bounds are in frame
    /// coordinates. May be empty if no text is detected.
    async fn recognize(&self, frame: &Frame) -> Result<Vec<OcrToken>, VigilError>;
}

/// Mock OCR engine for testing.
///
/// Plays back a script of token sets, one per call; once the script is
/// exhausted it keeps returning the last set. This lets executor tests
/// model "identical content on cycles 1-2, changed content on cycle 3".
pub struct MockOcrEngine {
    script: Mutex<VecDeque<Result<Vec<OcrToken>, String>>>,
    last: Mutex<Vec<OcrToken>>,
    calls: AtomicU64,
}

impl MockOcrEngine {
    /// Engine that always returns no tokens.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Engine that always returns the given tokens.
    pub fn with_tokens(tokens: Vec<OcrToken>) -> Self {
        let engine = Self::new();
        *engine.last.lock().unwrap() = tokens;
        engine
    }

    /// Queue one recognition result.
    pub fn push_tokens(&self, tokens: Vec<OcrToken>) {
        self.script.lock().unwrap().push_back(Ok(tokens));
    }

    /// Queue one recognition failure.
    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Number of recognize calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockOcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(&self, _frame: &Frame) -> Result<Vec<OcrToken>, VigilError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Err(msg)) => Err(VigilError::Perception(msg)),
            Some(Ok(tokens)) => {
                *self.last.lock().unwrap() = tokens.clone();
                Ok(tokens)
            }
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

/// Adapter between the OCR capability and the rest of the system.
///
/// Applies the confidence floor, orders tokens in reading order, and
/// answers fuzzy text-location queries.
pub struct PerceptionAdapter {
    engine: Arc<dyn OcrEngine>,
    config: PerceptionConfig,
}

impl PerceptionAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>, config: PerceptionConfig) -> Self {
        Self { engine, config }
    }

    /// Turn a frame into confidence-filtered tokens in reading order
    /// (top-to-bottom, left-to-right).
    pub async fn interpret(&self, frame: &Frame) -> Result<Vec<OcrToken>, VigilError> {
        let mut tokens = self.engine.recognize(frame).await?;
        let before = tokens.len();
        tokens.retain(|t| t.confidence >= self.config.confidence_floor);
        tokens.sort_by_key(|t| (t.bounds.y, t.bounds.x));

        debug!(
            recognized = before,
            kept = tokens.len(),
            floor = self.config.confidence_floor,
            "Frame interpreted"
        );
        Ok(tokens)
    }

    /// Find the token best matching `pattern`, or None.
    ///
    /// Matching is case-insensitive: a token containing the pattern as a
    /// substring scores 0, otherwise the normalized edit distance applies.
    /// Tokens above the match threshold are rejected; ties go to the
    /// higher-confidence token.
    pub fn locate<'a>(&self, pattern: &str, tokens: &'a [OcrToken]) -> Option<&'a OcrToken> {
        let needle = normalize(pattern);
        if needle.is_empty() {
            return None;
        }

        let mut best: Option<(&OcrToken, f64)> = None;
        for token in tokens {
            let score = match_score(&needle, &normalize(&token.text));
            if score > self.config.match_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((b, s)) => score < s || (score == s && token.confidence > b.confidence),
            };
            if better {
                best = Some((token, score));
            }
        }
        best.map(|(t, _)| t)
    }

    /// Order-sensitive signature of the visible text, for cheap
    /// content-diff verification.
    pub fn text_signature(tokens: &[OcrToken]) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for token in tokens {
            hasher.update(token.text.as_bytes());
            hasher.update(b"\n");
        }
        let hash = hasher.finalize();
        u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap())
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// 0.0 for a perfect or substring match, otherwise the edit distance
/// normalized by the longer length.
fn match_score(needle: &str, haystack: &str) -> f64 {
    if haystack.is_empty() {
        return 1.0;
    }
    if haystack.contains(needle) {
        return 0.0;
    }
    let distance = levenshtein(needle, haystack);
    let longest = needle.chars().count().max(haystack.chars().count());
    distance as f64 / longest as f64
}

/// Classic two-row Levenshtein distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
