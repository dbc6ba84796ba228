//! Earth Engine connection and dataset configuration.
//!
//! The configuration is embedded at compile time from
//! `config/earth_engine.toml`. Credentials are not; the service account
//! key (or a fixed access token) is read at start-up from the file the
//! configuration names.

use std::path::PathBuf;
use std::time::Duration;

use forest_change::pipeline::AnalysisOptions;
use serde::Deserialize;

use crate::{
    EarthEngineError,
    retry::{MAX_RETRIES, RetryPolicy},
};

const EMBEDDED_CONFIG: &str = include_str!("../config/earth_engine.toml");

/// Service endpoint, dataset identifiers and request tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EarthEngineConfig {
    /// REST API root (e.g. `"https://earthengine.googleapis.com/v1"`).
    pub base_url: String,
    /// Cloud project the requests are billed to.
    pub project: String,
    /// Google service account JSON key used to obtain access tokens.
    #[serde(default)]
    pub service_account_key_file: Option<PathBuf>,
    /// File holding a ready-made OAuth2 access token. Takes precedence over
    /// the service account and is never refreshed.
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
    /// Forest change raster asset.
    pub forest_change_dataset: String,
    /// Bands of the forest change raster.
    pub forest_change_bands: Vec<String>,
    /// National boundaries table.
    pub country_table: String,
    /// First-level administrative units table.
    pub admin_unit_table: String,
    /// Property holding the country code in both tables.
    pub region_field: String,
    /// Pixel size in meters.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Maximum pixels per reduction.
    #[serde(default = "default_max_pixels")]
    pub max_pixels: f64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Per-year reductions in flight at once.
    #[serde(default = "default_concurrent")]
    pub concurrent_requests: usize,
    /// Retries for HTTP 429 and 5xx responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential retry backoff in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

const fn default_scale() -> f64 {
    forest_change::aggregation::DEFAULT_SCALE
}

const fn default_max_pixels() -> f64 {
    forest_change::aggregation::DEFAULT_MAX_PIXELS
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_concurrent() -> usize {
    4
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl EarthEngineConfig {
    /// Parses the configuration embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError::Toml`] if the embedded file is malformed.
    pub fn embedded() -> Result<Self, EarthEngineError> {
        Self::from_toml(EMBEDDED_CONFIG)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError::Toml`] if the text is malformed and
    /// [`EarthEngineError::Config`] if a value is out of range.
    pub fn from_toml(text: &str) -> Result<Self, EarthEngineError> {
        let config: Self = toml::de::from_str(text)?;
        if config.concurrent_requests == 0 {
            return Err(EarthEngineError::Config {
                message: "concurrent_requests must be at least 1".to_string(),
            });
        }
        if config.request_timeout_secs == 0 {
            return Err(EarthEngineError::Config {
                message: "request_timeout_secs must be at least 1".to_string(),
            });
        }
        if config.max_retries > MAX_RETRIES {
            return Err(EarthEngineError::Config {
                message: format!("max_retries must be at most {MAX_RETRIES}"),
            });
        }
        Ok(config)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Analysis options matching this configuration.
    #[must_use]
    pub const fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            scale: self.scale,
            max_pixels: self.max_pixels,
            concurrent_requests: self.concurrent_requests,
            request_timeout: self.request_timeout(),
        }
    }

    /// Retry behavior for HTTP 429 and 5xx responses.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// `value:compute` endpoint for the configured project.
    #[must_use]
    pub fn compute_url(&self) -> String {
        format!(
            "{}/projects/{}/value:compute",
            self.base_url.trim_end_matches('/'),
            self.project
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_config_parses() {
        let config = EarthEngineConfig::embedded().unwrap();
        assert_eq!(
            config.forest_change_dataset,
            "UMD/hansen/global_forest_change_2022_v1_10"
        );
        assert_eq!(config.country_table, "FAO/GAUL/2015/level0");
        assert_eq!(config.admin_unit_table, "FAO/GAUL/2015/level1");
        assert_eq!(config.region_field, "ADM0_CODE");
        assert!((config.scale - 30.0).abs() < f64::EPSILON);
        assert!((config.max_pixels - 1e13).abs() < 1.0);
    }

    #[test]
    fn embedded_config_has_forest_change_bands() {
        let config = EarthEngineConfig::embedded().unwrap();
        for band in ["treecover2000", "gain", "loss", "lossyear"] {
            assert!(
                config.forest_change_bands.iter().any(|b| b == band),
                "missing band {band}"
            );
        }
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let config = EarthEngineConfig::from_toml(
            r#"
            base_url = "http://localhost:8080/v1/"
            project = "demo"
            service_account_key_file = "key.json"
            forest_change_dataset = "dataset"
            forest_change_bands = ["lossyear"]
            country_table = "level0"
            admin_unit_table = "level1"
            region_field = "ADM0_CODE"
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrent_requests, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(
            config.compute_url(),
            "http://localhost:8080/v1/projects/demo/value:compute"
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let text = EMBEDDED_CONFIG.replace("concurrent_requests = 4", "concurrent_requests = 0");
        assert!(matches!(
            EarthEngineConfig::from_toml(&text),
            Err(EarthEngineError::Config { .. })
        ));
    }

    #[test]
    fn too_many_retries_are_rejected() {
        let text = EMBEDDED_CONFIG.replace("max_retries = 3", "max_retries = 64");
        assert!(matches!(
            EarthEngineConfig::from_toml(&text),
            Err(EarthEngineError::Config { .. })
        ));
    }

    #[test]
    fn embedded_config_authenticates_with_service_account() {
        let config = EarthEngineConfig::embedded().unwrap();
        assert!(config.service_account_key_file.is_some());
        assert!(config.access_token_file.is_none());
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
            }
        );
    }
}
