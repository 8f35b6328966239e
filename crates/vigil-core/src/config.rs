use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VigilError};
use crate::types::Rect;

/// Top-level configuration for the Vigil runner.
///
/// Loaded from `~/.vigil/config.toml` by default. Each section corresponds
/// to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not
    /// exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| VigilError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// HTTP control server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Loopback by default; any other address is a
    /// deliberate override and is logged loudly at startup.
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl ServerConfig {
    /// Whether the configured bind address is loopback-only.
    pub fn is_loopback(&self) -> bool {
        self.bind
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

/// Frame capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture rate in frames per second.
    pub fps: f64,
    /// Upper clamp for stream clients requesting a higher rate.
    pub max_fps: f64,
    /// Default JPEG quality for snapshot/stream encoding (30-85 clamp).
    pub jpeg_quality: u8,
    /// The locked capture region. Absent means the full primary screen.
    pub region: Option<Rect>,
    /// Consecutive capture failures tolerated before the loop gives up
    /// and the watchdog takes over.
    pub failure_budget: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 10.0,
            max_fps: 15.0,
            jpeg_quality: 60,
            region: None,
            failure_budget: 3,
        }
    }
}

/// Watchdog supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Interval between health probes, independent of the capture rate.
    pub probe_interval_ms: u64,
    /// Heartbeat age beyond which the capture loop counts as stalled.
    pub heartbeat_stale_ms: u64,
    /// Maximum restarts within the rolling window before terminal FAILED.
    pub max_restarts: u32,
    /// Rolling window length in seconds.
    pub window_secs: u64,
    /// Initial restart backoff.
    pub backoff_initial_ms: u64,
    /// Backoff ceiling.
    pub backoff_max_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 1000,
            heartbeat_stale_ms: 3000,
            max_restarts: 3,
            window_secs: 60,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Perception (OCR) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// BCP-47 language tag for the OCR engine.
    pub language: String,
    /// Tokens below this confidence are ignored.
    pub confidence_floor: f32,
    /// Maximum normalized edit distance for a fuzzy text match.
    pub match_threshold: f64,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            confidence_floor: 0.5,
            match_threshold: 0.4,
        }
    }
}

/// Guardrail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Seconds before an unresolved confirmation gate expires.
    pub gate_timeout_secs: u64,
    /// Global hotkey that trips the kill switch.
    pub kill_hotkey: String,
    /// Extra challenge signatures (regex) on top of the built-in set.
    pub extra_challenge_patterns: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            gate_timeout_secs: 30,
            kill_hotkey: "Ctrl+Shift+F12".to_string(),
            extra_challenge_patterns: Vec::new(),
        }
    }
}

/// Intent executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Retries per step before the intent fails Partial.
    pub retry_limit: u32,
    /// Total budget for one verification wait.
    pub verify_timeout_ms: u64,
    /// Poll interval within a verification wait.
    pub verify_poll_ms: u64,
    /// How long to wait for the cheap primary action to take effect
    /// before escalating to a located-token fallback.
    pub fallback_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            verify_timeout_ms: 1500,
            verify_poll_ms: 150,
            fallback_delay_ms: 1200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.capture.fps, 10.0);
        assert_eq!(config.capture.jpeg_quality, 60);
        assert!(config.capture.region.is_none());
        assert_eq!(config.watchdog.max_restarts, 3);
        assert_eq!(config.watchdog.window_secs, 60);
        assert_eq!(config.guard.gate_timeout_secs, 30);
        assert_eq!(config.executor.retry_limit, 2);
    }

    #[test]
    fn test_default_bind_is_loopback() {
        let config = VigilConfig::default();
        assert!(config.server.is_loopback());
    }

    #[test]
    fn test_non_loopback_bind_detected() {
        let server = ServerConfig {
            bind: "0.0.0.0".to_string(),
            port: 8765,
        };
        assert!(!server.is_loopback());

        let server = ServerConfig {
            bind: "not-an-ip".to_string(),
            port: 8765,
        };
        assert!(!server.is_loopback());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[server]
bind = "127.0.0.1"
port = 9000

[capture]
fps = 5.0
jpeg_quality = 75
region = { x = 100, y = 50, width = 800, height = 600 }

[watchdog]
max_restarts = 5
window_secs = 120
"#;
        let file = create_temp_config(content);
        let config = VigilConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.capture.fps, 5.0);
        assert_eq!(config.capture.region, Some(Rect::new(100, 50, 800, 600)));
        assert_eq!(config.watchdog.max_restarts, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.executor.retry_limit, 2);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[guard]
gate_timeout_secs = 10
"#;
        let file = create_temp_config(content);
        let config = VigilConfig::load(file.path()).unwrap();
        assert_eq!(config.guard.gate_timeout_secs, 10);
        assert_eq!(config.guard.kill_hotkey, "Ctrl+Shift+F12");
        assert_eq!(config.capture.fps, 10.0);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = VigilConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.server.port, 8765);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(VigilConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = VigilConfig::default();
        config.capture.region = Some(Rect::new(0, 0, 1920, 1080));
        config.save(&path).unwrap();

        let reloaded = VigilConfig::load(&path).unwrap();
        assert_eq!(reloaded.capture.region, Some(Rect::new(0, 0, 1920, 1080)));
        assert_eq!(reloaded.server.bind, config.server.bind);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = VigilConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: VigilConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.watchdog.backoff_initial_ms, config.watchdog.backoff_initial_ms);
        assert_eq!(back.perception.language, config.perception.language);
        assert_eq!(back.executor.fallback_delay_ms, config.executor.fallback_delay_ms);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = VigilConfig::load(file.path()).unwrap();
        assert_eq!(config.capture.max_fps, 15.0);
        assert_eq!(config.watchdog.probe_interval_ms, 1000);
        assert_eq!(config.perception.confidence_floor, 0.5);
    }
}
