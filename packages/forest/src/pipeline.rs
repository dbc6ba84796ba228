//! End-to-end forest change computation for one region.
//!
//! Stages run strictly in order: boundaries, raster, clip, stable forest,
//! deforestation, loss-year histogram, decode, per-year loss areas, rates,
//! peak. Only the per-year loss areas run concurrently, and they are put
//! back in year order before rates are computed.

use std::sync::Arc;
use std::time::Duration;

use forest_change_models::{
    ForestChangeReport, PixelClassification, ReducerKind, YearSeries, sq_m_to_sq_km,
};
use futures::stream::{self, StreamExt as _, TryStreamExt as _};

use crate::{
    ForestError,
    aggregation::{
        AggregationClient, AggregationOutput, AggregationRequest, DEFAULT_MAX_PIXELS,
        DEFAULT_SCALE,
    },
    decode::{DecodedYear, YearIndexDecoder, YearLookup},
    predicate::PredicateBuilder,
    progress::{ProgressCallback, null_progress},
    provider::{BoundaryProvider, RasterHandle, RasterProvider, Region},
    rates::{compute_rates, select_peak},
};

/// Tuning for the remote calls made during an analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisOptions {
    /// Pixel size in meters.
    pub scale: f64,
    /// Maximum pixels per reduction.
    pub max_pixels: f64,
    /// Per-year loss reductions allowed in flight at once.
    pub concurrent_requests: usize,
    /// Upper bound on a single remote call.
    pub request_timeout: Duration,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            max_pixels: DEFAULT_MAX_PIXELS,
            concurrent_requests: 4,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Runs forest change reductions against an [`AggregationClient`].
pub struct ForestChangeAnalysis<'a> {
    client: &'a dyn AggregationClient,
    lookup: &'a YearLookup,
    options: AnalysisOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a> ForestChangeAnalysis<'a> {
    /// Creates an analysis issuing reductions through `client` and
    /// decoding loss years with `lookup`. Progress is discarded until
    /// [`Self::with_progress`] is called.
    #[must_use]
    pub fn new(
        client: &'a dyn AggregationClient,
        lookup: &'a YearLookup,
        options: AnalysisOptions,
    ) -> Self {
        Self {
            client,
            lookup,
            options,
            progress: null_progress(),
        }
    }

    /// Reports per-year loss reductions to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Computes the full report for the region identified by `gaul_code`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ForestError`] raised by any stage. No partial
    /// report is produced.
    pub async fn run(
        &self,
        boundaries: &dyn BoundaryProvider,
        rasters: &dyn RasterProvider,
        gaul_code: i64,
    ) -> Result<ForestChangeReport, ForestError> {
        log::info!("Obtaining country boundary for GAUL code {gaul_code}");
        let country = boundaries
            .country_boundary(gaul_code)
            .await
            .map_err(|e| e.within("country boundary"))?;
        log::info!(
            "Country boundary has {} polygon(s)",
            country.polygon_count()
        );

        log::info!("Obtaining first-level administrative units for GAUL code {gaul_code}");
        let admin_units = boundaries
            .admin_units(gaul_code)
            .await
            .map_err(|e| e.within("administrative units"))?;
        log::info!(
            "Administrative units cover {} polygon(s)",
            admin_units.polygon_count()
        );

        let raster = rasters.forest_change_raster();
        log::info!("Clipping {} to the country boundary", raster.asset_id);
        let clipped = raster.clip(&country);

        let stable_forest_km2 = self.stable_forest_km2(&clipped, &country).await?;
        log::info!("Stable forest area: {stable_forest_km2} km²");

        let deforested_km2 = self.deforested_km2(&clipped, &country).await?;
        log::info!("Deforested area: {deforested_km2} km²");

        log::info!("Calculating deforestation rate...");
        let entries = self.loss_year_entries(&clipped, &country).await?;
        let loss_pixels: YearSeries = entries.iter().map(|e| (e.year, e.count)).collect();

        let loss_km2 = self.loss_km2_by_year(&clipped, &country, &entries).await?;
        let rates = compute_rates(&loss_km2)?;
        let peak = select_peak(&rates)?;

        Ok(ForestChangeReport {
            gaul_code,
            stable_forest_km2,
            deforested_km2,
            loss_pixels,
            loss_km2,
            rates,
            peak,
        })
    }

    /// Area of forest with neither gain nor loss, in km².
    ///
    /// # Errors
    ///
    /// Returns [`ForestError`] if the predicate cannot be built or the
    /// reduction fails.
    pub async fn stable_forest_km2(
        &self,
        raster: &RasterHandle,
        region: &Region,
    ) -> Result<f64, ForestError> {
        log::info!("Calculating stable forest area...");
        let predicate = PredicateBuilder::new(raster).stable_forest()?;
        let sq_m = self.sum(raster, region, &predicate, "stable forest").await?;
        Ok(sq_m_to_sq_km(sq_m))
    }

    /// Area of forest lost during the study period, in km².
    ///
    /// # Errors
    ///
    /// Returns [`ForestError`] if the predicate cannot be built or the
    /// reduction fails.
    pub async fn deforested_km2(
        &self,
        raster: &RasterHandle,
        region: &Region,
    ) -> Result<f64, ForestError> {
        log::info!("Calculating deforested regions...");
        let predicate = PredicateBuilder::new(raster).deforested()?;
        let sq_m = self.sum(raster, region, &predicate, "deforested").await?;
        Ok(sq_m_to_sq_km(sq_m))
    }

    /// Histogram of loss-year indices over `region`, decoded to years.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError`] if the reduction fails or an index is not in
    /// the lookup table.
    pub async fn loss_year_entries(
        &self,
        raster: &RasterHandle,
        region: &Region,
    ) -> Result<Vec<DecodedYear>, ForestError> {
        const STAGE: &str = "loss-year histogram";

        let predicate = PredicateBuilder::new(raster).loss_year_index()?;
        let histogram = self
            .call(
                &AggregationRequest {
                    raster,
                    predicate: &predicate,
                    reducer: ReducerKind::FrequencyHistogram,
                    region,
                    scale: self.options.scale,
                    max_pixels: self.options.max_pixels,
                },
                STAGE,
            )
            .await?
            .into_histogram(STAGE)?;
        log::debug!("Loss-year histogram: {histogram:?}");

        YearIndexDecoder::new(self.lookup).decode_entries(&histogram)
    }

    /// Area-weighted loss for each decoded year, in km².
    ///
    /// Issues one reduction per entry, at most
    /// [`AnalysisOptions::concurrent_requests`] at a time. The result is
    /// keyed by year regardless of completion order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ForestError`] raised by any year's reduction.
    pub async fn loss_km2_by_year(
        &self,
        raster: &RasterHandle,
        region: &Region,
        entries: &[DecodedYear],
    ) -> Result<YearSeries, ForestError> {
        let builder = PredicateBuilder::new(raster);
        let requests = entries
            .iter()
            .map(|entry| Ok((*entry, builder.loss_in_year(entry.index)?)))
            .collect::<Result<Vec<_>, ForestError>>()?;

        log::info!(
            "Summing loss for {} year(s) (concurrency={})",
            requests.len(),
            self.options.concurrent_requests
        );
        self.progress.set_total(requests.len() as u64);
        self.progress.set_message("Loss per year".to_string());

        let results: Vec<(i32, f64)> = stream::iter(requests.iter().map(
            |(entry, predicate)| async move {
                let context = format!("loss in {} (index {})", entry.year, entry.index);
                let sq_m = self.sum(raster, region, predicate, &context).await?;
                self.progress.inc(1);
                log::debug!("{context}: {sq_m} m²");
                Ok::<_, ForestError>((entry.year, sq_m_to_sq_km(sq_m)))
            },
        ))
        .buffer_unordered(self.options.concurrent_requests.max(1))
        .try_collect()
        .await?;

        self.progress
            .finish(format!("Summed loss for {} year(s)", results.len()));

        Ok(results.into_iter().collect())
    }

    async fn sum(
        &self,
        raster: &RasterHandle,
        region: &Region,
        predicate: &PixelClassification,
        context: &str,
    ) -> Result<f64, ForestError> {
        self.call(
            &AggregationRequest {
                raster,
                predicate,
                reducer: ReducerKind::Sum,
                region,
                scale: self.options.scale,
                max_pixels: self.options.max_pixels,
            },
            context,
        )
        .await?
        .into_sum(context)
    }

    async fn call(
        &self,
        request: &AggregationRequest<'_>,
        context: &str,
    ) -> Result<AggregationOutput, ForestError> {
        let timeout = self.options.request_timeout;
        tokio::time::timeout(timeout, self.client.aggregate(request))
            .await
            .map_err(|_| ForestError::aggregation(context, format!("timed out after {timeout:?}")))?
            .map_err(|e| e.within(context))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use forest_change_models::{Band, Comparison, EncodedYearHistogram, PeakRate};

    use super::*;

    const HANSEN_BANDS: &[&str] = &["treecover2000", "loss", "gain", "lossyear"];

    struct FixedBoundaries;

    fn square(gaul_code: i64) -> Region {
        Region {
            gaul_code,
            geometry: geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 0.0],
            ]])),
        }
    }

    #[async_trait]
    impl BoundaryProvider for FixedBoundaries {
        async fn country_boundary(&self, gaul_code: i64) -> Result<Region, ForestError> {
            Ok(square(gaul_code))
        }

        async fn admin_units(&self, gaul_code: i64) -> Result<Region, ForestError> {
            Ok(square(gaul_code))
        }
    }

    struct Hansen;

    impl RasterProvider for Hansen {
        fn forest_change_raster(&self) -> RasterHandle {
            RasterHandle::new(
                "UMD/hansen/global_forest_change_2022_v1_10",
                HANSEN_BANDS.iter().map(ToString::to_string).collect(),
            )
        }
    }

    /// Answers reductions from in-memory tables. Per-index loss calls for
    /// lower indices are delayed longer so they complete out of order.
    struct ScriptedClient {
        histogram: EncodedYearHistogram,
        loss_sq_m: BTreeMap<u32, f64>,
        stable_sq_m: f64,
        deforested_sq_m: f64,
        delay_per_index: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn scenario() -> Self {
            Self {
                histogram: [("1", 1000.0), ("2", 2000.0), ("4", 500.0)]
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), *v))
                    .collect(),
                loss_sq_m: [(1, 10.0e6), (2, 25.0e6), (4, 8.0e6)].into_iter().collect(),
                stable_sq_m: 1_234.0e6,
                deforested_sq_m: 43.0e6,
                delay_per_index: Duration::from_millis(5),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AggregationClient for ScriptedClient {
        async fn aggregate(
            &self,
            request: &AggregationRequest<'_>,
        ) -> Result<AggregationOutput, ForestError> {
            assert!(request.raster.clip.is_some());
            assert!((request.scale - 30.0).abs() < f64::EPSILON);

            let output = match (request.reducer, request.predicate) {
                (ReducerKind::FrequencyHistogram, PixelClassification::BandValue { .. }) => {
                    self.calls.lock().unwrap().push("histogram".to_string());
                    AggregationOutput::Histogram(self.histogram.clone())
                }
                (
                    ReducerKind::Sum,
                    PixelClassification::Compare {
                        band: Band::Lossyear,
                        op: Comparison::Eq,
                        value,
                    },
                ) => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let index = *value as u32;
                    let wait = self.delay_per_index * (5 - index.min(5));
                    tokio::time::sleep(wait).await;
                    self.calls.lock().unwrap().push(format!("loss {index}"));
                    let sq_m = self.loss_sq_m.get(&index).copied().ok_or_else(|| {
                        ForestError::aggregation("sum of lossyear", "lossyear missing from result")
                    })?;
                    AggregationOutput::Sum(sq_m)
                }
                (ReducerKind::Sum, PixelClassification::All { terms }) if terms.len() == 3 => {
                    self.calls.lock().unwrap().push("stable".to_string());
                    AggregationOutput::Sum(self.stable_sq_m)
                }
                (ReducerKind::Sum, PixelClassification::All { .. }) => {
                    self.calls.lock().unwrap().push("deforested".to_string());
                    AggregationOutput::Sum(self.deforested_sq_m)
                }
                other => panic!("unexpected request: {other:?}"),
            };
            Ok(output)
        }
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.unwrap_or(f64::NAN);
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[tokio::test]
    async fn region_113_scenario() {
        let client = ScriptedClient::scenario();
        let analysis = ForestChangeAnalysis::new(
            &client,
            YearLookup::hansen_gfc_2022(),
            AnalysisOptions::default(),
        );

        let report = analysis.run(&FixedBoundaries, &Hansen, 113).await.unwrap();

        assert_eq!(report.gaul_code, 113);
        assert!((report.stable_forest_km2 - 1_234.0).abs() < 1e-9);
        assert!((report.deforested_km2 - 43.0).abs() < 1e-9);

        let pixel_years: Vec<i32> = report.loss_pixels.years().collect();
        assert_eq!(pixel_years, vec![2000, 2001, 2004]);
        assert_close(report.loss_pixels.get(2001), 2000.0);

        let area_years: Vec<i32> = report.loss_km2.years().collect();
        assert_eq!(area_years, vec![2000, 2001, 2004]);
        assert_close(report.loss_km2.get(2000), 10.0);
        assert_close(report.loss_km2.get(2001), 25.0);
        assert_close(report.loss_km2.get(2004), 8.0);

        assert_eq!(report.rates.len(), 2);
        assert_close(report.rates.get(2001), 1.5);
        assert_close(report.rates.get(2004), -0.68);
        assert_eq!(
            report.peak,
            PeakRate {
                year: 2001,
                rate: 1.5,
            }
        );

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[..3], ["stable", "deforested", "histogram"]);
        assert_eq!(calls.len(), 6);
    }

    #[tokio::test]
    async fn sequential_and_concurrent_fan_out_agree() {
        let client = ScriptedClient::scenario();
        let raster = Hansen.forest_change_raster().clip(&square(113));
        let region = square(113);
        let lookup = YearLookup::hansen_gfc_2022();

        let sequential = ForestChangeAnalysis::new(
            &client,
            lookup,
            AnalysisOptions {
                concurrent_requests: 1,
                ..AnalysisOptions::default()
            },
        );
        let concurrent = ForestChangeAnalysis::new(
            &client,
            lookup,
            AnalysisOptions {
                concurrent_requests: 8,
                ..AnalysisOptions::default()
            },
        );

        let entries = sequential.loss_year_entries(&raster, &region).await.unwrap();
        let a = sequential
            .loss_km2_by_year(&raster, &region, &entries)
            .await
            .unwrap();
        let b = concurrent
            .loss_km2_by_year(&raster, &region, &entries)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn failing_year_aborts_the_run() {
        let mut client = ScriptedClient::scenario();
        client.loss_sq_m.remove(&2);
        let analysis = ForestChangeAnalysis::new(
            &client,
            YearLookup::hansen_gfc_2022(),
            AnalysisOptions::default(),
        );

        let err = analysis.run(&FixedBoundaries, &Hansen, 113).await.unwrap_err();
        match err {
            ForestError::Aggregation { context, .. } => {
                assert!(context.starts_with("loss in 2001 (index 2)"), "{context}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unmapped_histogram_index_aborts_the_run() {
        let mut client = ScriptedClient::scenario();
        client.histogram.insert("99".to_string(), 1.0);
        let analysis = ForestChangeAnalysis::new(
            &client,
            YearLookup::hansen_gfc_2022(),
            AnalysisOptions::default(),
        );

        let err = analysis.run(&FixedBoundaries, &Hansen, 113).await.unwrap_err();
        assert!(matches!(err, ForestError::UnmappedIndex { ref key } if key == "99"));
    }

    #[tokio::test]
    async fn single_loss_year_has_no_peak() {
        let mut client = ScriptedClient::scenario();
        client.histogram = [("4".to_string(), 500.0)].into_iter().collect();
        let analysis = ForestChangeAnalysis::new(
            &client,
            YearLookup::hansen_gfc_2022(),
            AnalysisOptions::default(),
        );

        let err = analysis.run(&FixedBoundaries, &Hansen, 113).await.unwrap_err();
        assert!(matches!(err, ForestError::EmptySeries));
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let mut client = ScriptedClient::scenario();
        client.delay_per_index = Duration::from_secs(5);
        let analysis = ForestChangeAnalysis::new(
            &client,
            YearLookup::hansen_gfc_2022(),
            AnalysisOptions {
                request_timeout: Duration::from_millis(20),
                ..AnalysisOptions::default()
            },
        );

        let err = analysis.run(&FixedBoundaries, &Hansen, 113).await.unwrap_err();
        match err {
            ForestError::Aggregation { message, .. } => {
                assert!(message.starts_with("timed out"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_lossyear_band_fails_before_histogram() {
        struct NoLossYear;

        impl RasterProvider for NoLossYear {
            fn forest_change_raster(&self) -> RasterHandle {
                RasterHandle::new(
                    "partial",
                    vec![
                        "treecover2000".to_string(),
                        "loss".to_string(),
                        "gain".to_string(),
                    ],
                )
            }
        }

        let client = ScriptedClient::scenario();
        let analysis = ForestChangeAnalysis::new(
            &client,
            YearLookup::hansen_gfc_2022(),
            AnalysisOptions::default(),
        );

        let err = analysis
            .run(&FixedBoundaries, &NoLossYear, 113)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::InvalidBandReference {
                band: Band::Lossyear,
                ..
            }
        ));
        assert_eq!(client.calls.lock().unwrap().len(), 2);
    }
}
