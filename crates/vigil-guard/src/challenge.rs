//! Authentication challenge detection.
//!
//! Scans perception tokens for known login / MFA / CAPTCHA textual
//! signatures. A match halts the current intent with a human-handoff
//! condition instead of retrying automatically -- defeating such
//! challenges is an explicit non-goal.

use regex::Regex;

use vigil_core::error::VigilError;
use vigil_core::types::{ChallengeKind, OcrToken};

/// Built-in signature table. Spanish variants are included because the
/// original deployments drove a Spanish-locale UI.
const BUILTIN_SIGNATURES: &[(&str, ChallengeKind)] = &[
    // Login / credential prompts
    (r"(?i)\bsign\s?in\b", ChallengeKind::Login),
    (r"(?i)\blog\s?in\b", ChallengeKind::Login),
    (r"(?i)\bpassword\b", ChallengeKind::Login),
    (r"(?i)iniciar sesi[oó]n", ChallengeKind::Login),
    (r"(?i)contraseñ?a", ChallengeKind::Login),
    // MFA / verification codes
    (r"(?i)verification code", ChallengeKind::Mfa),
    (r"(?i)c[oó]digo de verificaci[oó]n", ChallengeKind::Mfa),
    (r"(?i)two.factor", ChallengeKind::Mfa),
    (r"(?i)\b2fa\b", ChallengeKind::Mfa),
    (r"(?i)one.time (code|password)", ChallengeKind::Mfa),
    (r"(?i)\bauthenticator\b", ChallengeKind::Mfa),
    // CAPTCHA
    (r"(?i)captcha", ChallengeKind::Captcha),
    (r"(?i)not a robot", ChallengeKind::Captcha),
    (r"(?i)no soy un robot", ChallengeKind::Captcha),
    (r"(?i)unusual traffic", ChallengeKind::Captcha),
];

/// Detector over the built-in signature table plus operator-supplied
/// extras (treated as login-family signatures).
pub struct ChallengeDetector {
    signatures: Vec<(Regex, ChallengeKind)>,
}

impl ChallengeDetector {
    /// Build the detector. Invalid extra patterns are a configuration
    /// error, reported at startup rather than silently dropped.
    pub fn new(extra_patterns: &[String]) -> Result<Self, VigilError> {
        let mut signatures = Vec::with_capacity(BUILTIN_SIGNATURES.len() + extra_patterns.len());

        for (pattern, kind) in BUILTIN_SIGNATURES {
            let re = Regex::new(pattern).map_err(|e| {
                VigilError::Config(format!("Bad builtin challenge pattern '{}': {}", pattern, e))
            })?;
            signatures.push((re, *kind));
        }

        for pattern in extra_patterns {
            let re = Regex::new(pattern).map_err(|e| {
                VigilError::Config(format!("Bad challenge pattern '{}': {}", pattern, e))
            })?;
            signatures.push((re, ChallengeKind::Login));
        }

        Ok(Self { signatures })
    }

    /// Scan tokens for a challenge signature; first match wins.
    pub fn scan(&self, tokens: &[OcrToken]) -> Option<ChallengeKind> {
        for token in tokens {
            if let Some(kind) = self.scan_text(&token.text) {
                return Some(kind);
            }
        }
        None
    }

    /// Scan a single text span.
    pub fn scan_text(&self, text: &str) -> Option<ChallengeKind> {
        self.signatures
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, kind)| *kind)
    }
}
