//! Parsing of `value:compute` responses.
//!
//! A successful call returns `{"result": ...}`. For `reduceRegion` the
//! result is a dictionary keyed by output band name; a band that is absent
//! or `null` means the reduction produced nothing and is reported as an
//! error rather than read as zero.

use forest_change_models::EncodedYearHistogram;
use serde_json::Value;

use crate::EarthEngineError;

/// Extracts the `result` member of a compute response.
///
/// # Errors
///
/// Returns [`EarthEngineError::Response`] if there is no `result`.
pub fn result(mut body: Value) -> Result<Value, EarthEngineError> {
    body.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| EarthEngineError::Response {
            message: "response has no 'result' member".to_string(),
        })
}

fn band_output<'a>(result: &'a Value, band: &str) -> Result<&'a Value, EarthEngineError> {
    match result.get(band) {
        None => Err(EarthEngineError::Response {
            message: format!("'{band}' missing from reducer output"),
        }),
        Some(Value::Null) => Err(EarthEngineError::Response {
            message: format!("'{band}' is null in reducer output"),
        }),
        Some(value) => Ok(value),
    }
}

/// Reads the sum reported for `band`.
///
/// # Errors
///
/// Returns [`EarthEngineError::Response`] if the band is missing, null or
/// not a number.
pub fn sum(result: &Value, band: &str) -> Result<f64, EarthEngineError> {
    band_output(result, band)?
        .as_f64()
        .ok_or_else(|| EarthEngineError::Response {
            message: format!("'{band}' sum is not a number"),
        })
}

/// Reads the frequency histogram reported for `band`.
///
/// # Errors
///
/// Returns [`EarthEngineError::Response`] if the band is missing, null,
/// not an object, or has a non-numeric count.
pub fn histogram(result: &Value, band: &str) -> Result<EncodedYearHistogram, EarthEngineError> {
    let buckets = band_output(result, band)?
        .as_object()
        .ok_or_else(|| EarthEngineError::Response {
            message: format!("'{band}' histogram is not an object"),
        })?;

    buckets
        .iter()
        .map(|(key, count)| {
            count
                .as_f64()
                .map(|count| (key.clone(), count))
                .ok_or_else(|| EarthEngineError::Response {
                    message: format!("'{band}' histogram count for '{key}' is not a number"),
                })
        })
        .collect()
}

/// Reads a `GeoJSON` geometry result.
///
/// # Errors
///
/// Returns [`EarthEngineError::Json`] if the result is not a geometry.
pub fn geometry(result: Value) -> Result<geojson::Geometry, EarthEngineError> {
    Ok(serde_json::from_value(result)?)
}
