use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no reporting database_url configured")]
    NoDatabaseUrl,
    #[error("motion changed_fraction must be between 0 and 1")]
    InvalidChangedFraction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_device")]
    pub device: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_device() -> i32 {
    0
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_fps() -> u32 {
    30
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Per-pixel intensity difference that counts as "changed".
    #[serde(default = "default_pixel_delta")]
    pub pixel_delta: f64,
    /// Fraction of changed pixels above which a frame counts as motion.
    #[serde(default = "default_changed_fraction")]
    pub changed_fraction: f32,
}

fn default_pixel_delta() -> f64 {
    25.0
}

fn default_changed_fraction() -> f32 {
    0.12
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_delta: default_pixel_delta(),
            changed_fraction: default_changed_fraction(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path or URL of the ONNX detection model.
    #[serde(default = "default_model_path")]
    pub path: String,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
}

fn default_model_path() -> String {
    "yolov8n.onnx".to_string()
}

fn default_confidence() -> f32 {
    0.25
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            confidence_threshold: default_confidence(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    /// Base URL of the realtime database, e.g. "https://example.firebaseio.com".
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Seconds between re-affirming an unchanged state.
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

fn default_update_interval() -> u64 {
    2
}

fn default_write_timeout() -> u64 {
    1500
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            auth_token: None,
            update_interval_secs: default_update_interval(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reporting.database_url.is_empty() {
            return Err(ConfigError::NoDatabaseUrl);
        }
        if !(0.0..=1.0).contains(&self.motion.changed_fraction) {
            return Err(ConfigError::InvalidChangedFraction);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [reporting]
            database_url = "https://example.firebaseio.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.device, 0);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.camera.height, 480);
        assert_eq!(config.motion.pixel_delta, 25.0);
        assert_eq!(config.reporting.update_interval_secs, 2);
        assert_eq!(config.http.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let config: Config = toml::from_str("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoDatabaseUrl)));
    }

    #[test]
    fn out_of_range_changed_fraction_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [reporting]
            database_url = "https://example.firebaseio.com"

            [motion]
            changed_fraction = 1.5
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChangedFraction)
        ));
    }
}
