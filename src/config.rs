//! Configuration system using Figment.
//!
//! This module provides strongly-typed configuration loading for the hubs.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/ramanscope.toml` by default)
//! 2. Environment variables (prefixed with RAMANSCOPE_, section and
//!    field joined with a double underscore)
//!
//! Timing values the workers used to hard-code (poll cadence, retry
//! backoff, query wait timeout) are configuration fields so tests can
//! shrink them.
//!
//! # Example
//! ```no_run
//! use ramanscope::config::HubConfig;
//!
//! let config = HubConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), ramanscope::error::HubError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sampling loop cadence and backoff
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Timestamped store sizing and query deadlines
    #[serde(default)]
    pub store: StoreConfig,
    /// Image correction constants
    #[serde(default)]
    pub correction: CorrectionConfig,
    /// Device driver selection
    #[serde(default)]
    pub hardware: HardwareConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Sampling loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Poll period for stage coordinates
    #[serde(with = "humantime_serde", default = "default_coordinate_interval")]
    pub coordinate_interval: Duration,
    /// Poll period for spectrometer measurements
    #[serde(with = "humantime_serde", default = "default_spectrum_interval")]
    pub spectrum_interval: Duration,
    /// Backoff after a failed device poll, longer than the poll period
    #[serde(with = "humantime_serde", default = "default_retry_backoff")]
    pub retry_backoff: Duration,
    /// Initial logical timestamp offset applied to device samples, in ms
    #[serde(default)]
    pub offset_ms: i64,
}

/// Timestamped store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum records retained per store; oldest evicted past this
    #[serde(default = "default_store_capacity")]
    pub capacity: usize,
    /// Deadline for queries that wait on data not yet acquired
    #[serde(with = "humantime_serde", default = "default_wait_timeout")]
    pub wait_timeout: Duration,
}

/// Image correction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Flatfield gain applied after normalization
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Lower clamp for the normalized reference map
    #[serde(default = "default_reference_floor")]
    pub reference_floor: f32,
    /// Division guard added to the reference denominator
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    /// Upper clamp for corrected pixel values
    #[serde(default = "default_clamp_max")]
    pub clamp_max: f32,
    /// Gaussian sigma (pixels) for the background illumination estimate
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f64,
}

/// Device driver selection.
///
/// Vendor SDK bindings are selected here at startup; only the mock
/// drivers ship with this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub stage_driver: DriverKind,
    #[serde(default)]
    pub camera_driver: DriverKind,
    #[serde(default)]
    pub spectrometer_driver: DriverKind,
}

/// Known driver backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Mock,
}

// Default value functions
fn default_app_name() -> String {
    "ramanscope".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_coordinate_interval() -> Duration {
    Duration::from_millis(30)
}

fn default_spectrum_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_store_capacity() -> usize {
    512
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_gain() -> f32 {
    1.0
}

fn default_reference_floor() -> f32 {
    1e-3
}

fn default_epsilon() -> f32 {
    1e-6
}

fn default_clamp_max() -> f32 {
    65535.0
}

fn default_blur_sigma() -> f64 {
    25.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            coordinate_interval: default_coordinate_interval(),
            spectrum_interval: default_spectrum_interval(),
            retry_backoff: default_retry_backoff(),
            offset_ms: 0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_store_capacity(),
            wait_timeout: default_wait_timeout(),
        }
    }
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            reference_floor: default_reference_floor(),
            epsilon: default_epsilon(),
            clamp_max: default_clamp_max(),
            blur_sigma: default_blur_sigma(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            stage_driver: DriverKind::Mock,
            camera_driver: DriverKind::Mock,
            spectrometer_driver: DriverKind::Mock,
        }
    }
}

impl HubConfig {
    /// Load configuration from config/ramanscope.toml and environment variables.
    ///
    /// Environment variables can override configuration with prefix
    /// RAMANSCOPE_, with a double underscore between the section and
    /// the field so snake_case field names survive the mapping.
    /// Example: RAMANSCOPE_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/ramanscope.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RAMANSCOPE_").split("__"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.store.capacity == 0 {
            return Err("store.capacity must be at least 1".to_string());
        }

        if self.correction.gain < 0.0 {
            return Err(format!(
                "correction.gain must be non-negative, got {}",
                self.correction.gain
            ));
        }

        if self.correction.blur_sigma <= 0.0 {
            return Err(format!(
                "correction.blur_sigma must be positive, got {}",
                self.correction.blur_sigma
            ));
        }

        if self.sampling.retry_backoff < self.sampling.coordinate_interval {
            return Err(
                "sampling.retry_backoff should not be shorter than the poll interval".to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.capacity, 512);
        assert_eq!(config.sampling.coordinate_interval, Duration::from_millis(30));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = HubConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = HubConfig::default();
        config.store.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_gain_rejected() {
        let mut config = HubConfig::default();
        config.correction.gain = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_reaches_nested_field() {
        // Double-underscore separator so snake_case fields map cleanly.
        // These fields are not asserted by any other test, so the
        // process-global env cannot skew a parallel run.
        std::env::set_var("RAMANSCOPE_SAMPLING__OFFSET_MS", "1500");
        std::env::set_var("RAMANSCOPE_CORRECTION__BLUR_SIGMA", "12.5");
        let config = HubConfig::load_from("does-not-exist.toml").unwrap();
        std::env::remove_var("RAMANSCOPE_SAMPLING__OFFSET_MS");
        std::env::remove_var("RAMANSCOPE_CORRECTION__BLUR_SIGMA");

        assert_eq!(config.sampling.offset_ms, 1500);
        assert_eq!(config.correction.blur_sigma, 12.5);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramanscope.toml");
        std::fs::write(
            &path,
            r#"
[application]
log_level = "debug"

[store]
capacity = 64
wait_timeout = "250ms"

[sampling]
coordinate_interval = "5ms"
"#,
        )
        .unwrap();

        let config = HubConfig::load_from(&path).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.store.capacity, 64);
        assert_eq!(config.store.wait_timeout, Duration::from_millis(250));
        assert_eq!(config.sampling.coordinate_interval, Duration::from_millis(5));
        // Untouched sections keep their defaults.
        assert_eq!(config.correction.gain, 1.0);
        assert!(config.validate().is_ok());
    }
}
