//! Loss-year index decoding.
//!
//! The `lossyear` band stores a small integer per pixel rather than a
//! calendar year. The index-to-year mapping is a property of the dataset
//! release, so it is kept in an explicit [`YearLookup`] instead of being
//! computed as an offset.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use forest_change_models::{EncodedYearHistogram, YearSeries};

use crate::ForestError;

/// Index-to-year table of Hansen Global Forest Change v1.10 (2000-2022).
///
/// Index 3 maps to 2003; there is no index for 2002.
pub const HANSEN_GFC_2022_YEARS: &[(u32, i32)] = &[
    (1, 2000),
    (2, 2001),
    (3, 2003),
    (4, 2004),
    (5, 2005),
    (6, 2006),
    (7, 2007),
    (8, 2008),
    (9, 2009),
    (10, 2010),
    (11, 2011),
    (12, 2012),
    (13, 2013),
    (14, 2014),
    (15, 2015),
    (16, 2016),
    (17, 2017),
    (18, 2018),
    (19, 2019),
    (20, 2020),
    (21, 2021),
    (22, 2022),
];

static HANSEN_GFC_2022: LazyLock<YearLookup> = LazyLock::new(|| YearLookup {
    years: HANSEN_GFC_2022_YEARS.iter().copied().collect(),
});

/// Immutable mapping from encoded loss-year index to calendar year.
///
/// Years strictly increase with index, so ascending index order is
/// ascending year order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearLookup {
    years: BTreeMap<u32, i32>,
}

impl YearLookup {
    /// The process-wide Hansen v1.10 table.
    #[must_use]
    pub fn hansen_gfc_2022() -> &'static Self {
        &HANSEN_GFC_2022
    }

    /// Builds a table from `(index, year)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidArgument`] if an index repeats or the
    /// years do not strictly increase with the index.
    pub fn from_pairs(pairs: &[(u32, i32)]) -> Result<Self, ForestError> {
        let mut years = BTreeMap::new();
        for &(index, year) in pairs {
            if years.insert(index, year).is_some() {
                return Err(ForestError::InvalidArgument {
                    message: format!("duplicate loss-year index {index}"),
                });
            }
        }

        let ordered: Vec<i32> = years.values().copied().collect();
        if ordered.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ForestError::InvalidArgument {
                message: "loss-year table years must strictly increase with index".to_string(),
            });
        }

        Ok(Self { years })
    }

    /// Returns the calendar year for `index`.
    #[must_use]
    pub fn year(&self, index: u32) -> Option<i32> {
        self.years.get(&index).copied()
    }

    /// Number of indices in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.years.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }
}

/// One histogram bucket after decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedYear {
    /// Index as stored in the raster.
    pub index: u32,
    /// Calendar year the index stands for.
    pub year: i32,
    /// Pixel count reported for the index.
    pub count: f64,
}

/// Turns string-keyed loss-year histograms into ordered year series.
#[derive(Debug, Clone, Copy)]
pub struct YearIndexDecoder<'a> {
    lookup: &'a YearLookup,
}

impl<'a> YearIndexDecoder<'a> {
    /// Decodes against `lookup`.
    #[must_use]
    pub const fn new(lookup: &'a YearLookup) -> Self {
        Self { lookup }
    }

    /// Decodes `histogram` into `year -> count`, ascending by year.
    ///
    /// An empty histogram decodes to an empty series.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::UnmappedIndex`] if a key is not an integer in
    /// the lookup table.
    pub fn decode(&self, histogram: &EncodedYearHistogram) -> Result<YearSeries, ForestError> {
        Ok(self
            .decode_entries(histogram)?
            .into_iter()
            .map(|entry| (entry.year, entry.count))
            .collect())
    }

    /// Decodes `histogram` keeping the raster index next to each year.
    ///
    /// Entries come back sorted by index (and therefore by year).
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::UnmappedIndex`] if a key is not an integer in
    /// the lookup table.
    pub fn decode_entries(
        &self,
        histogram: &EncodedYearHistogram,
    ) -> Result<Vec<DecodedYear>, ForestError> {
        // Keys are text, so "10" sorts before "2" until parsed.
        let mut parsed = histogram
            .iter()
            .map(|(key, count)| {
                key.trim()
                    .parse::<u32>()
                    .map(|index| (index, *count))
                    .map_err(|_| ForestError::UnmappedIndex { key: key.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort_by_key(|(index, _)| *index);

        if let Some(w) = parsed.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ForestError::InvalidArgument {
                message: format!("histogram encodes loss-year index {} twice", w[0].0),
            });
        }

        parsed
            .into_iter()
            .map(|(index, count)| {
                let year = self
                    .lookup
                    .year(index)
                    .ok_or_else(|| ForestError::UnmappedIndex {
                        key: index.to_string(),
                    })?;
                Ok(DecodedYear { index, year, count })
            })
            .collect()
    }
}
