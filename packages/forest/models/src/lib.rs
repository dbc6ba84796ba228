#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Forest change raster, classification, and time-series types.
//!
//! These types describe what is sent to the remote aggregation service
//! (band references and pixel classifications) and what comes back from
//! it (scalar area sums and string-keyed histograms), plus the decoded
//! year and rate series derived from those results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Square meters per square kilometer.
pub const SQ_M_PER_SQ_KM: f64 = 1e6;

/// A named band of the forest change raster.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Band {
    /// Tree canopy cover for year 2000, in percent.
    Treecover2000,
    /// Forest gain during the study period (1 = gain).
    Gain,
    /// Forest loss during the study period (1 = loss).
    Loss,
    /// Encoded year of gross forest cover loss (0 = no loss).
    Lossyear,
}

/// Comparison operator applied between a band and a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Comparison {
    /// Strictly greater than.
    Gt,
    /// Equal to.
    Eq,
}

/// A boolean (or raw-value) pixel expression over raster bands.
///
/// This is a request payload for the aggregation service, never
/// evaluated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PixelClassification {
    /// `band <op> value`.
    Compare {
        /// Band being compared.
        band: Band,
        /// Comparison operator.
        op: Comparison,
        /// Constant right-hand side.
        value: f64,
    },
    /// Logical AND of every term, in order.
    All {
        /// Terms to combine. The first term names the output band.
        terms: Vec<Self>,
    },
    /// The raw band value, optionally with zero-valued pixels masked out.
    BandValue {
        /// Band to read.
        band: Band,
        /// Whether pixels equal to zero are excluded.
        mask_zero: bool,
    },
}

impl PixelClassification {
    /// Returns the band whose name keys the reducer output.
    ///
    /// Combined images keep the name of their left-most operand, so this
    /// is the first band referenced by the expression.
    #[must_use]
    pub fn output_band(&self) -> Option<Band> {
        match self {
            Self::Compare { band, .. } | Self::BandValue { band, .. } => Some(*band),
            Self::All { terms } => terms.iter().find_map(Self::output_band),
        }
    }

    /// Returns every band referenced by the expression, in order of
    /// first appearance.
    #[must_use]
    pub fn bands(&self) -> Vec<Band> {
        let mut bands = Vec::new();
        self.collect_bands(&mut bands);
        bands
    }

    fn collect_bands(&self, out: &mut Vec<Band>) {
        match self {
            Self::Compare { band, .. } | Self::BandValue { band, .. } => {
                if !out.contains(band) {
                    out.push(*band);
                }
            }
            Self::All { terms } => {
                for term in terms {
                    term.collect_bands(out);
                }
            }
        }
    }
}

/// Reducer applied by the aggregation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReducerKind {
    /// Pixel-area-weighted sum.
    Sum,
    /// Frequency histogram of pixel values.
    FrequencyHistogram,
}

/// Histogram of encoded loss-year indices to pixel counts.
///
/// Keys are decimal strings as returned by the service. Their order
/// carries no meaning; decoding sorts them numerically.
pub type EncodedYearHistogram = BTreeMap<String, f64>;

/// Calendar year to measured quantity, iterated in ascending year order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct YearSeries(BTreeMap<i32, f64>);

impl YearSeries {
    /// Creates an empty series.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Sets the value for `year`, returning the previous value if any.
    pub fn insert(&mut self, year: i32, value: f64) -> Option<f64> {
        self.0.insert(year, value)
    }

    /// Returns the value recorded for `year`.
    #[must_use]
    pub fn get(&self, year: i32) -> Option<f64> {
        self.0.get(&year).copied()
    }

    /// Number of years in the series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the series has no years.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(year, value)` pairs in ascending year order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, f64)> + '_ {
        self.0.iter().map(|(year, value)| (*year, *value))
    }

    /// Iterates the years in ascending order.
    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.keys().copied()
    }
}

impl FromIterator<(i32, f64)> for YearSeries {
    fn from_iter<T: IntoIterator<Item = (i32, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Calendar year to relative change versus the preceding year in the
/// source series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateSeries(BTreeMap<i32, f64>);

impl RateSeries {
    /// Creates an empty series.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Sets the rate for `year`.
    pub fn insert(&mut self, year: i32, rate: f64) -> Option<f64> {
        self.0.insert(year, rate)
    }

    /// Returns the rate recorded for `year`.
    #[must_use]
    pub fn get(&self, year: i32) -> Option<f64> {
        self.0.get(&year).copied()
    }

    /// Number of years in the series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the series has no years.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(year, rate)` pairs in ascending year order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, f64)> + '_ {
        self.0.iter().map(|(year, rate)| (*year, *rate))
    }
}

impl FromIterator<(i32, f64)> for RateSeries {
    fn from_iter<T: IntoIterator<Item = (i32, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for RateSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (year, rate)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{year}: {rate}")?;
        }
        write!(f, "}}")
    }
}

/// The year with the highest deforestation rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakRate {
    /// Calendar year.
    pub year: i32,
    /// Relative rate versus the preceding year.
    pub rate: f64,
}

/// Forest change statistics for a single administrative region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForestChangeReport {
    /// FAO GAUL code of the region.
    pub gaul_code: i64,
    /// Forest with no gain and no loss, in km².
    pub stable_forest_km2: f64,
    /// Forest that experienced loss, in km².
    pub deforested_km2: f64,
    /// Loss pixel counts per year, as reported by the histogram.
    pub loss_pixels: YearSeries,
    /// Area-weighted loss per year, in km².
    pub loss_km2: YearSeries,
    /// Year-over-year relative change of `loss_km2`.
    pub rates: RateSeries,
    /// Year with the highest rate.
    pub peak: PeakRate,
}

/// Converts square meters to square kilometers.
#[must_use]
pub fn sq_m_to_sq_km(sq_m: f64) -> f64 {
    sq_m / SQ_M_PER_SQ_KM
}
