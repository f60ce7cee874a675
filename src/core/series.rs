use crate::core::region::Region;
use crate::types::{IndexRaster, TimeSeriesPoint, WqResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Region series extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesParams {
    /// Sampling resolution of the spatial mean (m)
    pub scale_m: f64,
    /// Fill dates with no valid pixels by linear interpolation between neighbours
    pub interpolate: bool,
}

impl Default for SeriesParams {
    fn default() -> Self {
        Self {
            scale_m: 30.0,
            interpolate: false,
        }
    }
}

/// Time-ordered (timestamp, value) samples of one region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    points: Vec<TimeSeriesPoint>,
}

impl TimeSeries {
    pub fn new(mut points: Vec<TimeSeriesPoint>) -> Self {
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeSeriesPoint> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[TimeSeriesPoint] {
        &self.points
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = &'a TimeSeriesPoint;
    type IntoIter = std::slice::Iter<'a, TimeSeriesPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Spatial-mean reduction of index rasters over a region
pub struct RegionSeriesExtractor {
    params: SeriesParams,
}

impl RegionSeriesExtractor {
    pub fn new() -> Self {
        Self {
            params: SeriesParams::default(),
        }
    }

    pub fn with_params(params: SeriesParams) -> Self {
        Self { params }
    }

    /// Mean of the valid pixels sampled over the region, `None` if there are none
    pub fn reduce_mean(&self, raster: &IndexRaster, region: &Region) -> Option<f64> {
        let cells = region.sample_cells(&raster.transform, raster.dim(), self.params.scale_m);
        let (sum, count) = cells
            .into_iter()
            .filter_map(|(r, c)| raster.value_at(r, c))
            .filter(|v| v.is_finite())
            .fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Ordered series of region means, one per raster with valid pixels in the region
    pub fn extract(&self, rasters: &[IndexRaster], region: &Region) -> WqResult<TimeSeries> {
        region.validate()?;
        let bounds = region.bounding_box();
        let candidates: Vec<&IndexRaster> = rasters
            .iter()
            .filter(|r| r.transform.bounds(r.dim()).intersects(&bounds))
            .collect();

        log::debug!(
            "Extracting series over {} of {} rasters at {} m",
            candidates.len(),
            rasters.len(),
            self.params.scale_m
        );

        let reduce = |raster: &&IndexRaster| (raster.timestamp, self.reduce_mean(raster, region));

        #[cfg(feature = "parallel")]
        let mut samples: Vec<(DateTime<Utc>, Option<f64>)> = {
            use rayon::prelude::*;
            candidates.par_iter().map(reduce).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let mut samples: Vec<(DateTime<Utc>, Option<f64>)> = candidates.iter().map(reduce).collect();

        samples.sort_by(|a, b| a.0.cmp(&b.0));
        if self.params.interpolate {
            fill_interior_gaps(&mut samples);
        }

        let points = samples
            .into_iter()
            .filter_map(|(timestamp, value)| value.map(|value| TimeSeriesPoint { timestamp, value }))
            .collect();
        Ok(TimeSeries::new(points))
    }
}

impl Default for RegionSeriesExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear interpolation in time between the nearest valid neighbours; leading
/// and trailing gaps stay empty
fn fill_interior_gaps(samples: &mut [(DateTime<Utc>, Option<f64>)]) {
    let known: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, (_, v))| v.is_some())
        .map(|(i, _)| i)
        .collect();

    for pair in known.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let (t0, v0) = (samples[lo].0, samples[lo].1.unwrap_or_default());
        let (t1, v1) = (samples[hi].0, samples[hi].1.unwrap_or_default());
        let span = (t1 - t0).num_seconds() as f64;
        for sample in &mut samples[lo + 1..hi] {
            let frac = if span > 0.0 {
                (sample.0 - t0).num_seconds() as f64 / span
            } else {
                0.0
            };
            sample.1 = Some(v0 + (v1 - v0) * frac);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, WaterParameter};
    use chrono::TimeZone;
    use ndarray::Array2;

    fn raster(day: u32, value: f32, valid: bool) -> IndexRaster {
        IndexRaster {
            parameter: WaterParameter::Turbidity,
            values: Array2::from_elem((6, 6), value),
            mask: Array2::from_elem((6, 6), valid),
            transform: GeoTransform::north_up(0.0, 60.0, 10.0),
            timestamp: Utc.with_ymd_and_hms(2021, 6, day, 0, 0, 0).unwrap(),
            cloud_percentage: 0.0,
        }
    }

    fn lake() -> Region {
        Region::polygon(&[(0.0, 0.0), (60.0, 0.0), (60.0, 60.0), (0.0, 60.0)]).unwrap()
    }

    #[test]
    fn test_omits_fully_invalid_dates() {
        let rasters = vec![raster(3, 4.0, true), raster(1, 2.0, true), raster(2, 9.0, false)];
        let series = RegionSeriesExtractor::new().extract(&rasters, &lake()).unwrap();

        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 4.0]);
        // Traversable more than once
        assert_eq!(series.iter().count(), (&series).into_iter().count());
    }

    #[test]
    fn test_interpolation_fills_interior_gaps_only() {
        let extractor = RegionSeriesExtractor::with_params(SeriesParams {
            interpolate: true,
            ..SeriesParams::default()
        });
        let rasters = vec![
            raster(1, 0.0, false),
            raster(2, 2.0, true),
            raster(3, 0.0, false),
            raster(4, 6.0, true),
            raster(5, 0.0, false),
        ];
        let series = extractor.extract(&rasters, &lake()).unwrap();
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_point_and_disjoint_regions() {
        let mut r = raster(1, 1.0, true);
        r.values[[0, 0]] = 8.0;
        let extractor = RegionSeriesExtractor::new();
        assert_eq!(extractor.reduce_mean(&r, &Region::point(5.0, 55.0)), Some(8.0));

        let far = Region::polygon(&[(500.0, 500.0), (600.0, 500.0), (600.0, 600.0)]).unwrap();
        assert!(extractor.extract(&[r], &far).unwrap().is_empty());
    }
}
