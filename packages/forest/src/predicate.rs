//! Pixel-classification predicates for the forest change raster.
//!
//! Forest at baseline is any pixel whose year-2000 canopy cover exceeds
//! [`CANOPY_COVER_THRESHOLD`] percent.

use forest_change_models::{Band, Comparison, PixelClassification};

use crate::{ForestError, provider::RasterHandle};

/// Minimum `treecover2000` percentage (exclusive) for a pixel to count as
/// forest.
pub const CANOPY_COVER_THRESHOLD: f64 = 10.0;

/// Builds predicates after checking the referenced bands exist on the
/// raster they will be evaluated against.
pub struct PredicateBuilder<'a> {
    raster: &'a RasterHandle,
}

impl<'a> PredicateBuilder<'a> {
    /// Builds predicates checked against the bands of `raster`.
    #[must_use]
    pub const fn new(raster: &'a RasterHandle) -> Self {
        Self { raster }
    }

    /// Forest at baseline with neither gain nor loss.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidBandReference`] if the raster lacks
    /// `treecover2000`, `gain` or `loss`.
    pub fn stable_forest(&self) -> Result<PixelClassification, ForestError> {
        self.checked(PixelClassification::All {
            terms: vec![
                forest_at_baseline(),
                compare(Band::Gain, Comparison::Eq, 0.0),
                compare(Band::Loss, Comparison::Eq, 0.0),
            ],
        })
    }

    /// Forest at baseline that was lost during the study period.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidBandReference`] if the raster lacks
    /// `treecover2000` or `loss`.
    pub fn deforested(&self) -> Result<PixelClassification, ForestError> {
        self.checked(PixelClassification::All {
            terms: vec![
                forest_at_baseline(),
                compare(Band::Loss, Comparison::Eq, 1.0),
            ],
        })
    }

    /// Pixels whose loss was detected in the year encoded as `index`.
    ///
    /// `index` is the raster's own encoding, not a calendar year.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidBandReference`] if the raster lacks
    /// `lossyear`.
    pub fn loss_in_year(&self, index: u32) -> Result<PixelClassification, ForestError> {
        self.checked(compare(Band::Lossyear, Comparison::Eq, f64::from(index)))
    }

    /// The encoded loss-year band with no-loss (zero) pixels masked, for
    /// frequency histograms.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidBandReference`] if the raster lacks
    /// `lossyear`.
    pub fn loss_year_index(&self) -> Result<PixelClassification, ForestError> {
        self.checked(PixelClassification::BandValue {
            band: Band::Lossyear,
            mask_zero: true,
        })
    }

    fn checked(&self, predicate: PixelClassification) -> Result<PixelClassification, ForestError> {
        if let Some(band) = predicate
            .bands()
            .into_iter()
            .find(|band| !self.raster.has_band(*band))
        {
            return Err(ForestError::InvalidBandReference {
                band,
                available: self.raster.bands.clone(),
            });
        }
        Ok(predicate)
    }
}

const fn compare(band: Band, op: Comparison, value: f64) -> PixelClassification {
    PixelClassification::Compare { band, op, value }
}

const fn forest_at_baseline() -> PixelClassification {
    compare(Band::Treecover2000, Comparison::Gt, CANOPY_COVER_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hansen() -> RasterHandle {
        RasterHandle::new(
            "UMD/hansen/global_forest_change_2022_v1_10",
            ["treecover2000", "loss", "gain", "lossyear"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        )
    }

    #[test]
    fn stable_forest_shape() {
        let raster = hansen();
        let predicate = PredicateBuilder::new(&raster).stable_forest().unwrap();
        assert_eq!(
            predicate,
            PixelClassification::All {
                terms: vec![
                    compare(Band::Treecover2000, Comparison::Gt, 10.0),
                    compare(Band::Gain, Comparison::Eq, 0.0),
                    compare(Band::Loss, Comparison::Eq, 0.0),
                ],
            }
        );
        assert_eq!(predicate.output_band(), Some(Band::Treecover2000));
    }

    #[test]
    fn deforested_shape() {
        let raster = hansen();
        let predicate = PredicateBuilder::new(&raster).deforested().unwrap();
        assert_eq!(
            predicate,
            PixelClassification::All {
                terms: vec![
                    compare(Band::Treecover2000, Comparison::Gt, 10.0),
                    compare(Band::Loss, Comparison::Eq, 1.0),
                ],
            }
        );
    }

    #[test]
    fn loss_in_year_uses_encoded_index() {
        let raster = hansen();
        let predicate = PredicateBuilder::new(&raster).loss_in_year(4).unwrap();
        assert_eq!(predicate, compare(Band::Lossyear, Comparison::Eq, 4.0));
        assert_eq!(predicate.output_band(), Some(Band::Lossyear));
    }

    #[test]
    fn loss_year_index_masks_zero() {
        let raster = hansen();
        let predicate = PredicateBuilder::new(&raster).loss_year_index().unwrap();
        assert_eq!(
            predicate,
            PixelClassification::BandValue {
                band: Band::Lossyear,
                mask_zero: true,
            }
        );
    }

    #[test]
    fn missing_band_is_rejected() {
        let raster = RasterHandle::new("partial", vec!["treecover2000".to_string()]);
        let err = PredicateBuilder::new(&raster).deforested().unwrap_err();
        match err {
            ForestError::InvalidBandReference { band, available } => {
                assert_eq!(band, Band::Loss);
                assert_eq!(available, vec!["treecover2000".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
