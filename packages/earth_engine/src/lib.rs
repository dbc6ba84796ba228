#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Google Earth Engine adapter for forest change statistics.
//!
//! Implements the boundary, raster and aggregation seams of
//! [`forest_change`] on top of the Earth Engine REST API
//! (`projects/{project}/value:compute`). Boundaries come from the FAO GAUL
//! 2015 tables and pixel statistics from the Hansen Global Forest Change
//! raster; both are evaluated remotely as expression graphs built in
//! [`expression`].

pub mod auth;
pub mod config;
pub mod expression;
pub mod response;
pub mod retry;

#[cfg(test)]
mod test_server;

use async_trait::async_trait;
use forest_change::{
    ForestError,
    aggregation::{AggregationClient, AggregationOutput, AggregationRequest},
    provider::{BoundaryProvider, RasterHandle, RasterProvider, Region},
};
use forest_change_models::ReducerKind;
use thiserror::Error;

pub use auth::Credentials;
pub use config::EarthEngineConfig;

/// Errors from Earth Engine requests.
#[derive(Debug, Error)]
pub enum EarthEngineError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedded configuration is malformed.
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration value is unusable.
    #[error("Config error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// Credentials could not be loaded or exchanged.
    #[error("Authentication error: {message}")]
    Auth {
        /// Description of what went wrong.
        message: String,
    },

    /// The service rejected the request.
    #[error("Earth Engine API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message reported by the service.
        message: String,
    },

    /// The service answered with an unexpected shape.
    #[error("Unexpected response: {message}")]
    Response {
        /// Description of what went wrong.
        message: String,
    },

    /// A request cannot be expressed for the service.
    #[error("Unsupported request: {message}")]
    Unsupported {
        /// Description of what went wrong.
        message: String,
    },
}

/// Earth Engine REST client.
pub struct EarthEngine {
    http: reqwest::Client,
    config: EarthEngineConfig,
    credentials: Credentials,
}

impl EarthEngine {
    /// Creates a client authorizing requests with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError::Http`] if the HTTP client cannot be
    /// built.
    pub fn new(
        config: EarthEngineConfig,
        credentials: Credentials,
    ) -> Result<Self, EarthEngineError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    /// Creates a client with the credentials named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError`] if the credentials cannot be loaded or
    /// the HTTP client cannot be built.
    pub fn from_config(config: EarthEngineConfig) -> Result<Self, EarthEngineError> {
        let credentials = Credentials::from_config(&config)?;
        Self::new(config, credentials)
    }

    /// Evaluates an expression graph and returns its `result`.
    ///
    /// # Errors
    ///
    /// Returns [`EarthEngineError`] if the request fails or the response
    /// has no result.
    pub async fn compute(
        &self,
        root: serde_json::Value,
    ) -> Result<serde_json::Value, EarthEngineError> {
        let policy = self.config.retry_policy();
        let access_token = self.credentials.access_token(&self.http, policy).await?;
        let url = self.config.compute_url();
        let body = expression::compute_body(root);
        log::trace!("POST {url}: {body}");

        let response = retry::send_json(
            || {
                self.http
                    .post(&url)
                    .bearer_auth(&access_token)
                    .json(&body)
            },
            policy,
        )
        .await?;

        response::result(response)
    }

    async fn boundary(&self, table: &str, gaul_code: i64) -> Result<Region, EarthEngineError> {
        log::info!(
            "Obtaining {table} boundaries for {} = {gaul_code}",
            self.config.region_field
        );
        let root = expression::filtered_geometry(table, &self.config.region_field, gaul_code);
        let geometry = response::geometry(self.compute(root).await?)?;

        Ok(Region {
            gaul_code,
            geometry,
        })
    }

    fn no_features(&self, table: &str, gaul_code: i64) -> String {
        format!(
            "no {table} feature has {} = {gaul_code}",
            self.config.region_field
        )
    }
}

#[async_trait]
impl BoundaryProvider for EarthEngine {
    async fn country_boundary(&self, gaul_code: i64) -> Result<Region, ForestError> {
        let table = &self.config.country_table;
        let region = self
            .boundary(table, gaul_code)
            .await
            .map_err(|e| ForestError::aggregation(table.as_str(), e))?;
        if region.polygon_count() == 0 {
            return Err(ForestError::aggregation(
                table.as_str(),
                self.no_features(table, gaul_code),
            ));
        }
        Ok(region)
    }

    async fn admin_units(&self, gaul_code: i64) -> Result<Region, ForestError> {
        let table = &self.config.admin_unit_table;
        let region = self
            .boundary(table, gaul_code)
            .await
            .map_err(|e| ForestError::aggregation(table.as_str(), e))?;
        if region.polygon_count() == 0 {
            log::warn!(
                "{}; continuing without administrative units",
                self.no_features(table, gaul_code)
            );
        }
        Ok(region)
    }
}

impl RasterProvider for EarthEngine {
    fn forest_change_raster(&self) -> RasterHandle {
        RasterHandle::new(
            self.config.forest_change_dataset.as_str(),
            self.config.forest_change_bands.clone(),
        )
    }
}

#[async_trait]
impl AggregationClient for EarthEngine {
    async fn aggregate(
        &self,
        request: &AggregationRequest<'_>,
    ) -> Result<AggregationOutput, ForestError> {
        let band = request.predicate.output_band().ok_or_else(|| {
            ForestError::aggregation(request.reducer.to_string(), "predicate references no band")
        })?;
        let context = format!("{} of {band}", request.reducer);

        let root = expression::reduce_region(request)
            .map_err(|e| ForestError::aggregation(context.as_str(), e))?;
        let result = self
            .compute(root)
            .await
            .map_err(|e| ForestError::aggregation(context.as_str(), e))?;

        let output = match request.reducer {
            ReducerKind::Sum => response::sum(&result, band.as_ref()).map(AggregationOutput::Sum),
            ReducerKind::FrequencyHistogram => {
                response::histogram(&result, band.as_ref()).map(AggregationOutput::Histogram)
            }
        };
        output.map_err(|e| ForestError::aggregation(context, e))
    }
}
