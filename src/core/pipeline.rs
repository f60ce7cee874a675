use crate::config::PipelineConfig;
use crate::core::atmospheric::AtmosphericCorrector;
use crate::core::indices::{IndexCollections, IndexEngine};
use crate::core::mosaic::TemporalMosaicker;
use crate::core::region::Region;
use crate::core::series::{RegionSeriesExtractor, TimeSeries};
use crate::core::water_mask::{WaterMasker, WaterOccurrence};
use crate::io::archive::{OpticalArchive, RadarArchive, RadarQuery};
use crate::io::dem::ElevationSource;
use crate::types::{DateRange, IndexRaster, WaterParameter, WqResult};
use ndarray::Zip;
use std::sync::Arc;

/// One user interaction: a date window over a region
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub range: DateRange,
    pub region: Region,
}

impl AnalysisRequest {
    pub fn new(range: DateRange, region: Region) -> Self {
        Self { range, region }
    }
}

/// Runs the processing stages for a request
///
/// Holds no per-request state, so one orchestrator can serve concurrent
/// requests.
pub struct Orchestrator {
    optical: Arc<dyn OpticalArchive>,
    radar: Arc<dyn RadarArchive>,
    elevation: Arc<dyn ElevationSource>,
    corrector: AtmosphericCorrector,
    mosaicker: TemporalMosaicker,
    masker: WaterMasker,
    engine: IndexEngine,
    extractor: RegionSeriesExtractor,
    radar_query: RadarQuery,
}

impl Orchestrator {
    pub fn new(
        optical: Arc<dyn OpticalArchive>,
        radar: Arc<dyn RadarArchive>,
        elevation: Arc<dyn ElevationSource>,
    ) -> Self {
        Self::with_config(optical, radar, elevation, PipelineConfig::default())
    }

    pub fn with_config(
        optical: Arc<dyn OpticalArchive>,
        radar: Arc<dyn RadarArchive>,
        elevation: Arc<dyn ElevationSource>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            optical,
            radar,
            elevation,
            corrector: AtmosphericCorrector::with_params(config.atmospheric),
            mosaicker: TemporalMosaicker::new(),
            masker: WaterMasker::with_params(config.water_mask),
            engine: IndexEngine::with_params(config.index),
            extractor: RegionSeriesExtractor::with_params(config.series),
            radar_query: config.radar,
        }
    }

    /// Turbidity, NDCI and chlorophyll-a collections for a request
    ///
    /// A window with no intersecting scenes yields three empty collections.
    pub fn compute_indices(&self, request: &AnalysisRequest) -> WqResult<IndexCollections> {
        request.region.validate()?;
        log::info!(
            "Computing indices for {} .. {}",
            request.range.start,
            request.range.end
        );

        let scenes = self
            .optical
            .query(&request.region.bounding_box(), &request.range)?;
        if scenes.is_empty() {
            log::info!("No optical scenes intersect the request");
            return Ok(IndexCollections::empty());
        }

        let corrected = self.corrector.correct_collection(&scenes, self.elevation.as_ref());
        let mut composites = self.mosaicker.mosaic(&corrected);

        // Clip every composite to the region
        for composite in &mut composites {
            let inside = request
                .region
                .mask_for_grid(&composite.transform, composite.mask.dim());
            Zip::from(&mut composite.mask)
                .and(&inside)
                .for_each(|valid, &inside| *valid &= inside);
        }

        let collections = self.engine.compute_all(&composites)?;
        log::info!("Produced {} index rasters per parameter", collections.turbidity.len());
        Ok(collections)
    }

    /// Radar water-occurrence frequency, `None` when no radar scene matches
    pub fn water_occurrence(&self, request: &AnalysisRequest) -> WqResult<Option<WaterOccurrence>> {
        request.region.validate()?;
        let scenes = self.radar.query(
            &request.region.bounding_box(),
            &request.range,
            &self.radar_query,
        )?;
        if scenes.is_empty() {
            log::info!("No radar scenes intersect the request");
            return Ok(None);
        }
        self.masker
            .water_occurrence(&scenes, &request.region)
            .map(Some)
    }

    /// Region mean series of an index collection
    pub fn extract_series(&self, rasters: &[IndexRaster], region: &Region) -> WqResult<TimeSeries> {
        self.extractor.extract(rasters, region)
    }

    /// Chart series of one parameter, restricted to its charting range
    pub fn series_for(
        &self,
        collections: &IndexCollections,
        parameter: WaterParameter,
        region: &Region,
    ) -> WqResult<TimeSeries> {
        let charted: Vec<IndexRaster> = collections
            .collection(parameter)
            .iter()
            .map(IndexEngine::chart_mask)
            .collect();
        self.extractor.extract(&charted, region)
    }

    pub fn select_least_cloudy<'a>(&self, rasters: &'a [IndexRaster]) -> Option<&'a IndexRaster> {
        select_least_cloudy(rasters)
    }
}

/// Raster with the lowest cloud percentage; the earliest wins a tie
pub fn select_least_cloudy(rasters: &[IndexRaster]) -> Option<&IndexRaster> {
    rasters
        .iter()
        .min_by(|a, b| a.cloud_percentage.total_cmp(&b.cloud_percentage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::archive::InMemoryArchive;
    use crate::io::dem::ConstantElevation;
    use crate::types::GeoTransform;
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn raster(day: u32, cloud: f64) -> IndexRaster {
        IndexRaster {
            parameter: WaterParameter::Ndci,
            values: Array2::zeros((2, 2)),
            mask: Array2::from_elem((2, 2), true),
            transform: GeoTransform::north_up(0.0, 0.0, 10.0),
            timestamp: Utc.with_ymd_and_hms(2021, 7, day, 0, 0, 0).unwrap(),
            cloud_percentage: cloud,
        }
    }

    #[test]
    fn test_select_least_cloudy() {
        let rasters = vec![raster(1, 40.0), raster(2, 3.5), raster(3, 3.5), raster(4, 12.0)];
        let best = select_least_cloudy(&rasters).unwrap();
        assert_eq!(best.timestamp, rasters[1].timestamp);
        assert!(select_least_cloudy(&[]).is_none());
    }

    #[test]
    fn test_empty_archive_yields_empty_results() {
        let archive = Arc::new(InMemoryArchive::default());
        let orchestrator = Orchestrator::new(archive.clone(), archive, Arc::new(ConstantElevation(0.0)));
        let request = AnalysisRequest::new(
            DateRange::parse("2021-06-01", "2021-07-01").unwrap(),
            Region::polygon(&[(0.0, 0.0), (100.0, 0.0), (100.0, 100.0)]).unwrap(),
        );

        let collections = orchestrator.compute_indices(&request).unwrap();
        assert!(collections.is_empty());
        assert!(orchestrator.water_occurrence(&request).unwrap().is_none());
        for parameter in WaterParameter::ALL {
            let series = orchestrator
                .series_for(&collections, parameter, &request.region)
                .unwrap();
            assert!(series.is_empty());
        }
    }
}
