use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PostureError, Result};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CONFIG_FILE: &str = "posture_monitor.toml";
const DEFAULT_LOG_LEVEL: &str = "posture_monitor=info";

/// Main configuration structure loaded from posture_monitor.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub inference: InferenceConfig,
    pub camera: CameraConfig,
    pub control: ControlConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Scheduling and feedback timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_ms: u64,
    pub feedback_display_ms: u64,
    /// Upper bound on one analysis call, enforced by the orchestrator
    pub check_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            feedback_display_ms: 8_000,
            check_timeout_ms: 45_000,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn feedback_display(&self) -> Duration {
        Duration::from_millis(self.feedback_display_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

/// Remote vision model settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub model: String,
    pub api_base: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub request_timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_output_tokens: 150,
            temperature: 0.2,
            request_timeout_ms: 20_000,
        }
    }
}

/// Where the external capture process leaves its stills
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub frame_path: PathBuf,
    /// Frames older than this are treated as "not ready"; 0 disables the check
    pub max_frame_age_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_path: PathBuf::from("posture_frame.jpg"),
            max_frame_age_ms: 10_000,
        }
    }
}

impl CameraConfig {
    pub fn max_frame_age(&self) -> Option<Duration> {
        (self.max_frame_age_ms > 0).then(|| Duration::from_millis(self.max_frame_age_ms))
    }
}

/// Optional local HTTP control surface
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    pub http_bind: Option<SocketAddr>,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub gemini_api_key: Option<String>,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        Self {
            gemini_api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses POSTURE_MONITOR_CONFIG or falls back to ./posture_monitor.toml,
    /// then the user config directory.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(env_path) = std::env::var("POSTURE_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let mut config = match Self::config_path() {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::warn!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PostureError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("POSTURE_MONITOR_CONFIG") {
            return Some(PathBuf::from(explicit));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("posture-monitor").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Env-first overrides on top of whatever the file provided
    pub fn apply_env_overrides(&mut self) {
        if let Some(model) = non_empty_env("GEMINI_MODEL") {
            self.inference.model = model;
        }
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            self.inference.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(ms) = parse_env::<u64>("POSTURE_CHECK_INTERVAL_MS") {
            self.monitor.check_interval_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>("POSTURE_FEEDBACK_DISPLAY_MS") {
            self.monitor.feedback_display_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>("POSTURE_CHECK_TIMEOUT_MS") {
            self.monitor.check_timeout_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>("POSTURE_REQUEST_TIMEOUT_MS") {
            self.inference.request_timeout_ms = ms;
        }
        if let Some(path) = non_empty_env("POSTURE_FRAME_PATH") {
            self.camera.frame_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_env::<u64>("POSTURE_MAX_FRAME_AGE_MS") {
            self.camera.max_frame_age_ms = ms;
        }
        if let Some(bind) = parse_env::<SocketAddr>("POSTURE_HTTP_BIND") {
            self.control.http_bind = Some(bind);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> Result<()> {
            Err(PostureError::Config {
                message: message.to_string(),
            })
        };
        if self.monitor.check_interval_ms == 0 {
            return invalid("check_interval_ms must be > 0");
        }
        if self.monitor.feedback_display_ms == 0 {
            return invalid("feedback_display_ms must be > 0");
        }
        if self.monitor.check_timeout_ms == 0 {
            return invalid("check_timeout_ms must be > 0");
        }
        if self.inference.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be > 0");
        }
        if self.inference.max_output_tokens == 0 {
            return invalid("max_output_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return invalid("temperature must be between 0.0 and 2.0");
        }
        if self.inference.model.trim().is_empty() {
            return invalid("model must not be empty");
        }
        Ok(())
    }

    pub fn has_credential(&self) -> bool {
        self.runtime.gemini_api_key.is_some()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = non_empty_env(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_configuration() {
        let config = Config::default();
        assert_eq!(config.monitor.check_interval_ms, 30_000);
        assert_eq!(config.monitor.feedback_display_ms, 8_000);
        assert_eq!(config.inference.model, "gemini-2.0-flash");
        assert_eq!(config.inference.max_output_tokens, 150);
        assert!((config.inference.temperature - 0.2).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
        assert!(!config.has_credential());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [monitor]
            check_interval_ms = 5000

            [camera]
            frame_path = "/tmp/cam.png"
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor.check_interval_ms, 5000);
        assert_eq!(config.monitor.feedback_display_ms, 8_000);
        assert_eq!(config.camera.frame_path, PathBuf::from("/tmp/cam.png"));
        assert_eq!(config.inference.model, DEFAULT_MODEL);
        assert!(config.control.http_bind.is_none());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.monitor.check_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(PostureError::Config { .. })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.inference.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_frame_age_disables_staleness_check() {
        let camera = CameraConfig {
            max_frame_age_ms: 0,
            ..CameraConfig::default()
        };
        assert!(camera.max_frame_age().is_none());
        assert_eq!(
            CameraConfig::default().max_frame_age(),
            Some(Duration::from_secs(10))
        );
    }
}
