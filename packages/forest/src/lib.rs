#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Forest cover change statistics for administrative regions.
//!
//! Builds pixel-classification predicates for the Hansen Global Forest
//! Change raster, hands them to a remote [`aggregation::AggregationClient`]
//! and turns the returned sums and loss-year histograms into an ordered
//! year series, a year-over-year rate series and the peak-rate year.
//!
//! No pixel is ever processed locally. Everything spatial happens on the
//! remote service; this crate only decides what to ask for and reshapes
//! the answers.

pub mod aggregation;
pub mod decode;
pub mod pipeline;
pub mod predicate;
pub mod progress;
pub mod provider;
pub mod rates;

use forest_change_models::Band;
use thiserror::Error;

/// Errors that can occur while computing forest change statistics.
///
/// Every variant aborts the computation for the region being processed.
#[derive(Debug, Error)]
pub enum ForestError {
    /// A predicate referenced a band the raster does not have.
    #[error("Invalid band reference: '{band}' is not one of [{}]", available.join(", "))]
    InvalidBandReference {
        /// The missing band.
        band: Band,
        /// Bands the raster actually exposes.
        available: Vec<String>,
    },

    /// The remote aggregation failed, timed out, or returned an
    /// unexpected shape.
    #[error("Aggregation error ({context}): {message}")]
    Aggregation {
        /// Which stage, predicate or year the call was for.
        context: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A histogram key is not an index of the loss-year lookup table.
    #[error("Unmapped loss-year index '{key}' (dataset version mismatch?)")]
    UnmappedIndex {
        /// The key as received.
        key: String,
    },

    /// A year in the series has a zero value, so the next year's rate is
    /// undefined.
    #[error("Cannot compute rate for {year}: previous year {previous_year} has a value of zero")]
    DivisionByZeroRate {
        /// Year whose rate was being computed.
        year: i32,
        /// Year with the zero baseline.
        previous_year: i32,
    },

    /// Peak selection was asked for on an empty rate series.
    #[error("Rate series is empty; at least two loss years are required")]
    EmptySeries,

    /// Malformed input or configuration.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of what went wrong.
        message: String,
    },
}

impl ForestError {
    /// Builds an [`ForestError::Aggregation`] for the given stage.
    #[must_use]
    pub fn aggregation(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Aggregation {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Prefixes the context of an [`ForestError::Aggregation`] with the
    /// calling stage. Other variants pass through unchanged.
    #[must_use]
    pub fn within(self, stage: &str) -> Self {
        match self {
            Self::Aggregation { context, message } => Self::Aggregation {
                context: format!("{stage}: {context}"),
                message,
            },
            other => other,
        }
    }
}
