//! Earth Engine expression graph encoding.
//!
//! Earth Engine evaluates serialized function-call graphs. Each node is
//! either a `constantValue`, an `arrayValue` of nodes, or a
//! `functionInvocationValue` naming an algorithm and its arguments. The
//! request wraps a single root node under `values` and points `result` at
//! it.

use forest_change::{aggregation::AggregationRequest, provider::RasterHandle};
use forest_change_models::{Band, Comparison, PixelClassification, ReducerKind};
use serde_json::{Value, json};

use crate::EarthEngineError;

/// Wraps `root` into a `value:compute` request body.
#[must_use]
pub fn compute_body(root: Value) -> Value {
    json!({
        "expression": {
            "result": "0",
            "values": { "0": root },
        },
    })
}

fn constant(value: impl Into<Value>) -> Value {
    json!({ "constantValue": value.into() })
}

fn array(values: Vec<Value>) -> Value {
    json!({ "arrayValue": { "values": values } })
}

fn invoke(function: &str, arguments: Value) -> Value {
    json!({
        "functionInvocationValue": {
            "functionName": function,
            "arguments": arguments,
        },
    })
}

/// Encodes a `GeoJSON` geometry as a geometry constructor call.
///
/// # Errors
///
/// Returns [`EarthEngineError::Unsupported`] for geometry types other than
/// polygons, multi-polygons and collections of those.
pub fn geometry(geometry: &geojson::Geometry) -> Result<Value, EarthEngineError> {
    geometry_value(&geometry.value)
}

fn geometry_value(value: &geojson::Value) -> Result<Value, EarthEngineError> {
    match value {
        geojson::Value::Polygon(rings) => Ok(invoke(
            "GeometryConstructors.Polygon",
            json!({ "coordinates": constant(json!(rings)) }),
        )),
        geojson::Value::MultiPolygon(polygons) => Ok(invoke(
            "GeometryConstructors.MultiPolygon",
            json!({ "coordinates": constant(json!(polygons)) }),
        )),
        geojson::Value::GeometryCollection(geometries) => {
            let parts = geometries
                .iter()
                .map(|g| geometry_value(&g.value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(invoke(
                "GeometryConstructors.MultiGeometry",
                json!({ "geometries": array(parts) }),
            ))
        }
        other => Err(EarthEngineError::Unsupported {
            message: format!("cannot reduce over a {} geometry", type_name(other)),
        }),
    }
}

const fn type_name(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Loads the raster, clipped to its clip geometry when it has one.
///
/// # Errors
///
/// Returns [`EarthEngineError::Unsupported`] if the clip geometry cannot
/// be encoded.
pub fn raster(raster: &RasterHandle) -> Result<Value, EarthEngineError> {
    let image = invoke(
        "Image.load",
        json!({ "id": constant(raster.asset_id.as_str()) }),
    );
    match &raster.clip {
        Some(clip) => Ok(invoke(
            "Image.clip",
            json!({ "input": image, "geometry": geometry(clip)? }),
        )),
        None => Ok(image),
    }
}

fn select(image: &Value, band: Band) -> Value {
    invoke(
        "Image.select",
        json!({
            "input": image,
            "bandSelectors": constant(json!([band.as_ref()])),
        }),
    )
}

/// Encodes a pixel classification evaluated on `image`.
///
/// # Errors
///
/// Returns [`EarthEngineError::Unsupported`] for an empty conjunction.
pub fn classification(
    image: &Value,
    predicate: &PixelClassification,
) -> Result<Value, EarthEngineError> {
    match predicate {
        PixelClassification::Compare { band, op, value } => {
            let function = match op {
                Comparison::Gt => "Image.gt",
                Comparison::Eq => "Image.eq",
            };
            Ok(invoke(
                function,
                json!({
                    "image1": select(image, *band),
                    "image2": invoke("Image.constant", json!({ "value": constant(*value) })),
                }),
            ))
        }
        PixelClassification::All { terms } => {
            let mut encoded = terms.iter().map(|term| classification(image, term));
            let first = encoded.next().ok_or_else(|| EarthEngineError::Unsupported {
                message: "empty conjunction".to_string(),
            })??;
            encoded.try_fold(first, |acc, term| {
                Ok::<_, EarthEngineError>(invoke(
                    "Image.and",
                    json!({ "image1": acc, "image2": term? }),
                ))
            })
        }
        PixelClassification::BandValue { band, mask_zero } => {
            let selected = select(image, *band);
            if *mask_zero {
                Ok(invoke("Image.selfMask", json!({ "image": selected })))
            } else {
                Ok(selected)
            }
        }
    }
}

/// Encodes a full `reduceRegion` call for `request`.
///
/// Sum reductions multiply the classification by the pixel area first, so
/// the result is in square meters.
///
/// # Errors
///
/// Returns [`EarthEngineError::Unsupported`] if the raster, predicate or
/// region cannot be encoded.
pub fn reduce_region(request: &AggregationRequest<'_>) -> Result<Value, EarthEngineError> {
    let image = raster(request.raster)?;
    let classified = classification(&image, request.predicate)?;

    let (image, reducer) = match request.reducer {
        ReducerKind::Sum => (
            invoke(
                "Image.multiply",
                json!({
                    "image1": classified,
                    "image2": invoke("Image.pixelArea", json!({})),
                }),
            ),
            invoke("Reducer.sum", json!({})),
        ),
        ReducerKind::FrequencyHistogram => {
            (classified, invoke("Reducer.frequencyHistogram", json!({})))
        }
    };

    Ok(invoke(
        "Image.reduceRegion",
        json!({
            "image": image,
            "reducer": reducer,
            "geometry": geometry(&request.region.geometry)?,
            "scale": constant(request.scale),
            "maxPixels": constant(request.max_pixels),
        }),
    ))
}

/// Encodes the union geometry of every feature in `table` whose `field`
/// equals `code`.
#[must_use]
pub fn filtered_geometry(table: &str, field: &str, code: i64) -> Value {
    let collection = invoke("Collection.loadTable", json!({ "tableId": constant(table) }));
    let filter = invoke(
        "Filter.equals",
        json!({
            "leftField": constant(field),
            "rightValue": constant(code),
        }),
    );
    invoke(
        "Collection.geometry",
        json!({
            "collection": invoke(
                "Collection.filter",
                json!({ "collection": collection, "filter": filter }),
            ),
        }),
    )
}
