//! Year-over-year rates and peak detection.

use forest_change_models::{PeakRate, RateSeries, YearSeries};

use crate::ForestError;

/// Computes the relative change of every year versus the year before it
/// in `series`.
///
/// "Before" means the preceding entry of the series, which is not always
/// the previous calendar year. The first year has no baseline and gets no
/// rate, so series with fewer than two entries yield an empty result.
///
/// # Errors
///
/// Returns [`ForestError::DivisionByZeroRate`] if a baseline value is zero.
#[allow(clippy::float_cmp)]
pub fn compute_rates(series: &YearSeries) -> Result<RateSeries, ForestError> {
    let mut rates = RateSeries::new();
    let mut previous: Option<(i32, f64)> = None;

    for (year, value) in series.iter() {
        if let Some((previous_year, previous_value)) = previous {
            if previous_value == 0.0 {
                return Err(ForestError::DivisionByZeroRate {
                    year,
                    previous_year,
                });
            }
            rates.insert(year, (value - previous_value) / previous_value);
        }
        previous = Some((year, value));
    }

    Ok(rates)
}

/// Returns the year with the highest rate.
///
/// Ties go to the earliest year.
///
/// # Errors
///
/// Returns [`ForestError::EmptySeries`] if `rates` is empty.
pub fn select_peak(rates: &RateSeries) -> Result<PeakRate, ForestError> {
    rates
        .iter()
        .fold(None::<PeakRate>, |best, (year, rate)| match best {
            Some(peak) if peak.rate >= rate => Some(peak),
            _ => Some(PeakRate { year, rate }),
        })
        .ok_or(ForestError::EmptySeries)
}
