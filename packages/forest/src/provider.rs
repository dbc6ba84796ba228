//! Boundary and raster providers.
//!
//! Both are thin handles onto remote datasets. Geometry is passed through
//! to the aggregation service untouched and the raster is only ever named,
//! never downloaded.

use async_trait::async_trait;
use forest_change_models::Band;

use crate::ForestError;

/// An administrative region boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// FAO GAUL code the boundary was looked up by.
    pub gaul_code: i64,
    /// Boundary geometry as returned by the boundary provider.
    pub geometry: geojson::Geometry,
}

impl Region {
    /// Number of polygons making up the boundary.
    #[must_use]
    pub fn polygon_count(&self) -> usize {
        count_polygons(&self.geometry.value)
    }
}

fn count_polygons(value: &geojson::Value) -> usize {
    match value {
        geojson::Value::Polygon(_) => 1,
        geojson::Value::MultiPolygon(polygons) => polygons.len(),
        geojson::Value::GeometryCollection(geometries) => geometries
            .iter()
            .map(|geometry| count_polygons(&geometry.value))
            .sum(),
        _ => 0,
    }
}

/// A remote multi-band raster, optionally clipped to a region.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHandle {
    /// Dataset identifier on the remote service.
    pub asset_id: String,
    /// Band names the dataset exposes.
    pub bands: Vec<String>,
    /// Geometry the raster is clipped to, if any.
    pub clip: Option<geojson::Geometry>,
}

impl RasterHandle {
    /// Creates an unclipped handle.
    #[must_use]
    pub fn new(asset_id: impl Into<String>, bands: Vec<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            bands,
            clip: None,
        }
    }

    /// Returns a copy of this raster masked to `region`.
    ///
    /// Pixels outside the geometry are masked; band names and metadata are
    /// unchanged.
    #[must_use]
    pub fn clip(&self, region: &Region) -> Self {
        Self {
            asset_id: self.asset_id.clone(),
            bands: self.bands.clone(),
            clip: Some(region.geometry.clone()),
        }
    }

    /// Whether `band` is one of this raster's bands.
    #[must_use]
    pub fn has_band(&self, band: Band) -> bool {
        self.bands.iter().any(|b| b == band.as_ref())
    }
}

/// Looks up administrative boundaries by FAO GAUL code.
#[async_trait]
pub trait BoundaryProvider: Send + Sync {
    /// Returns the national boundary for `gaul_code`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::Aggregation`] if the lookup fails or no
    /// feature carries the code.
    async fn country_boundary(&self, gaul_code: i64) -> Result<Region, ForestError>;

    /// Returns the union of first-level administrative units for
    /// `gaul_code`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::Aggregation`] if the lookup fails or no
    /// feature carries the code.
    async fn admin_units(&self, gaul_code: i64) -> Result<Region, ForestError>;
}

/// Hands out the forest change raster.
pub trait RasterProvider: Send + Sync {
    /// Returns the global forest change raster.
    fn forest_change_raster(&self) -> RasterHandle;
}
