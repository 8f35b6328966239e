//! CLI argument definitions for the Vigil binary.
//!
//! Uses `clap` with derive macros. Priority resolution:
//! CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Vigil -- a local-only guarded desktop-automation runner.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Control server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Bind address. Anything other than 127.0.0.1 exposes the control
    /// surface to the network and is logged loudly.
    #[arg(long = "bind")]
    pub bind: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Capture region as X,Y,WIDTH,HEIGHT (defaults to the full screen).
    #[arg(long = "region")]
    pub region: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > VIGIL_CONFIG env var > ~/.vigil/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("VIGIL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Parse the --region override, if present.
    pub fn resolve_region(&self) -> Option<vigil_core::types::Rect> {
        let spec = self.region.as_deref()?;
        let parts: Vec<i64> = spec
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect();
        if parts.len() != 4 || parts[2] <= 0 || parts[3] <= 0 {
            return None;
        }
        Some(vigil_core::types::Rect::new(
            parts[0] as i32,
            parts[1] as i32,
            parts[2] as u32,
            parts[3] as u32,
        ))
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".vigil").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".vigil").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::Rect;

    #[test]
    fn test_region_parsing() {
        let args = CliArgs::parse_from(["vigil", "--region", "100,50,800,600"]);
        assert_eq!(args.resolve_region(), Some(Rect::new(100, 50, 800, 600)));
    }

    #[test]
    fn test_region_parsing_with_spaces() {
        let args = CliArgs::parse_from(["vigil", "--region", " 0, 0, 640, 480 "]);
        assert_eq!(args.resolve_region(), Some(Rect::new(0, 0, 640, 480)));
    }

    #[test]
    fn test_region_invalid_rejected() {
        for bad in ["", "1,2,3", "a,b,c,d", "0,0,-5,100", "0,0,100,0"] {
            let args = CliArgs::parse_from(["vigil", "--region", bad]);
            assert_eq!(args.resolve_region(), None, "should reject {:?}", bad);
        }
    }

    #[test]
    fn test_region_absent() {
        let args = CliArgs::parse_from(["vigil"]);
        assert_eq!(args.resolve_region(), None);
    }
}
