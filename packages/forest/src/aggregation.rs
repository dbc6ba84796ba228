//! The boundary to the remote aggregation service.
//!
//! [`AggregationClient::aggregate`] is the only call that reaches the
//! service for pixel statistics. Everything else in this crate prepares
//! its input or reshapes its output.

use async_trait::async_trait;
use forest_change_models::{EncodedYearHistogram, PixelClassification, ReducerKind};

use crate::{
    ForestError,
    provider::{RasterHandle, Region},
};

/// Nominal pixel size in meters for every reduction.
pub const DEFAULT_SCALE: f64 = 30.0;

/// Upper bound on pixels a single reduction may touch.
pub const DEFAULT_MAX_PIXELS: f64 = 1e13;

/// One reduction to run on the remote service.
#[derive(Debug, Clone, Copy)]
pub struct AggregationRequest<'a> {
    /// Raster the predicate is evaluated against.
    pub raster: &'a RasterHandle,
    /// Pixel classification to reduce.
    pub predicate: &'a PixelClassification,
    /// Reducer to apply.
    pub reducer: ReducerKind,
    /// Region to reduce over.
    pub region: &'a Region,
    /// Pixel size in meters.
    pub scale: f64,
    /// Maximum number of pixels the reduction may touch.
    pub max_pixels: f64,
}

/// Result of a reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutput {
    /// Pixel-area-weighted sum in square meters.
    Sum(f64),
    /// Pixel value to pixel count.
    Histogram(EncodedYearHistogram),
}

impl AggregationOutput {
    /// Returns the sum, or fails if the service answered with a histogram.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::Aggregation`] on a shape mismatch.
    pub fn into_sum(self, context: &str) -> Result<f64, ForestError> {
        match self {
            Self::Sum(value) => Ok(value),
            Self::Histogram(_) => Err(ForestError::aggregation(
                context,
                "expected a sum but received a histogram",
            )),
        }
    }

    /// Returns the histogram, or fails if the service answered with a sum.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::Aggregation`] on a shape mismatch.
    pub fn into_histogram(self, context: &str) -> Result<EncodedYearHistogram, ForestError> {
        match self {
            Self::Histogram(histogram) => Ok(histogram),
            Self::Sum(_) => Err(ForestError::aggregation(
                context,
                "expected a histogram but received a sum",
            )),
        }
    }
}

/// A remote service able to reduce a pixel classification over a region.
///
/// Implementations own any retry policy. A missing or null reducer output
/// must surface as [`ForestError::Aggregation`], never as zero.
#[async_trait]
pub trait AggregationClient: Send + Sync {
    /// Runs one reduction.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::Aggregation`] if the call fails, times out or
    /// returns no usable output.
    async fn aggregate(
        &self,
        request: &AggregationRequest<'_>,
    ) -> Result<AggregationOutput, ForestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_shape_mismatch_is_an_error() {
        let output = AggregationOutput::Histogram(EncodedYearHistogram::new());
        let err = output.into_sum("stable forest").unwrap_err();
        assert!(matches!(err, ForestError::Aggregation { ref context, .. } if context == "stable forest"));
    }

    #[test]
    fn histogram_passes_through() {
        let mut histogram = EncodedYearHistogram::new();
        histogram.insert("1".to_string(), 3.0);
        let output = AggregationOutput::Histogram(histogram.clone());
        assert_eq!(output.into_histogram("loss years").unwrap(), histogram);
    }
}
