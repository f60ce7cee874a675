use crate::core::region::Region;
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams};
use crate::types::{
    BackscatterScale, BandImage, GeoTransform, RadarScene, ValidityMask, WqError, WqResult,
};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Water masking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterMaskParams {
    /// Radius of the focal median applied before classification (m)
    pub focal_radius_m: f64,
    /// Number of histogram buckets
    pub histogram_buckets: usize,
    /// Sampling resolution of the histogram (m)
    pub histogram_scale_m: f64,
    /// Occurrence (%) at or above which a pixel counts as persistent water
    pub min_occurrence_pct: f32,
}

impl Default for WaterMaskParams {
    fn default() -> Self {
        Self {
            focal_radius_m: 50.0,
            histogram_buckets: 256,
            histogram_scale_m: 10.0,
            min_occurrence_pct: 90.0,
        }
    }
}

/// Bucketed backscatter distribution: mean and count per non-empty bucket
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub means: Vec<f64>,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Equal-width histogram between the sample minimum and maximum
    ///
    /// Non-finite values are ignored and empty buckets are dropped, so
    /// `means` is strictly increasing.
    pub fn from_values<I>(values: I, buckets: usize) -> Self
    where
        I: IntoIterator<Item = f32>,
    {
        let values: Vec<f64> = values
            .into_iter()
            .filter(|v| v.is_finite())
            .map(|v| v as f64)
            .collect();
        if values.is_empty() || buckets == 0 {
            return Self { means: Vec::new(), counts: Vec::new() };
        }

        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let width = (max - min) / buckets as f64;

        let mut sums = vec![0.0f64; buckets];
        let mut counts = vec![0u64; buckets];
        for v in values {
            let bucket = if width > 0.0 {
                (((v - min) / width) as usize).min(buckets - 1)
            } else {
                0
            };
            sums[bucket] += v;
            counts[bucket] += 1;
        }

        let (means, counts) = sums
            .into_iter()
            .zip(counts)
            .filter(|&(_, c)| c > 0)
            .map(|(s, c)| (s / c as f64, c))
            .unzip();
        Self { means, counts }
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Otsu threshold: the bucket mean maximising between-class variance
///
/// Class A holds buckets `0..=i`, class B the rest; ties resolve to the
/// last maximising bucket.
pub fn otsu_threshold(histogram: &Histogram) -> WqResult<f64> {
    if histogram.len() < 2 {
        return Err(WqError::DegenerateHistogram(format!(
            "{} non-empty buckets, need at least 2",
            histogram.len()
        )));
    }

    let total = histogram.total() as f64;
    let global_mean = histogram
        .means
        .iter()
        .zip(&histogram.counts)
        .map(|(m, &c)| m * c as f64)
        .sum::<f64>()
        / total;

    let mut best: Option<(usize, f64)> = None;
    let mut a_count = 0.0;
    let mut a_sum = 0.0;
    for i in 0..histogram.len() - 1 {
        let count = histogram.counts[i] as f64;
        a_count += count;
        a_sum += histogram.means[i] * count;

        let b_count = total - a_count;
        let a_mean = a_sum / a_count;
        let b_mean = (global_mean * total - a_sum) / b_count;
        let bss = a_count * (a_mean - global_mean).powi(2) + b_count * (b_mean - global_mean).powi(2);

        match best {
            Some((_, best_bss)) if bss < best_bss => {}
            _ => best = Some((i, bss)),
        }
    }

    best.map(|(i, _)| histogram.means[i])
        .ok_or_else(|| WqError::DegenerateHistogram("no candidate split".to_string()))
}

/// Linear power to decibels; non-positive power has no dB value and becomes NaN
pub fn to_decibels(linear: &BandImage) -> BandImage {
    linear.mapv(|x| if x > 0.0 { 10.0 * x.log10() } else { f32::NAN })
}

/// Water classification of one radar date
#[derive(Debug, Clone)]
pub struct WaterMask {
    pub timestamp: DateTime<Utc>,
    pub threshold: f64,
    /// True where the pixel is water
    pub water: ValidityMask,
    /// True where the pixel was observed inside the region
    pub observed: ValidityMask,
}

/// Per-pixel water occurrence across dates
#[derive(Debug, Clone)]
pub struct WaterOccurrence {
    /// Percentage of observed dates classified as water, NaN where never observed
    pub frequency: BandImage,
    pub observed_dates: Array2<u32>,
    pub transform: GeoTransform,
    /// Dates that produced a water mask
    pub dates_used: usize,
    /// Dates dropped for a degenerate histogram
    pub dates_excluded: usize,
    pub min_occurrence_pct: f32,
}

impl WaterOccurrence {
    /// Binary persistent-water mask at the configured minimum occurrence
    pub fn persistent_mask(&self) -> ValidityMask {
        let min = self.min_occurrence_pct;
        self.frequency.mapv(|f| f.is_finite() && f >= min)
    }
}

/// Otsu-based water masking of radar backscatter
pub struct WaterMasker {
    params: WaterMaskParams,
    filter: SpeckleFilter,
}

impl WaterMasker {
    /// Create a water masker with default parameters
    pub fn new() -> Self {
        Self::with_params(WaterMaskParams::default())
    }

    /// Create a water masker with custom parameters
    pub fn with_params(params: WaterMaskParams) -> Self {
        let filter = SpeckleFilter::with_params(SpeckleFilterParams {
            radius_m: params.focal_radius_m,
        });
        Self { params, filter }
    }

    pub fn params(&self) -> &WaterMaskParams {
        &self.params
    }

    fn backscatter_db(scene: &RadarScene) -> BandImage {
        match scene.scale {
            BackscatterScale::Decibel => scene.vv.clone(),
            BackscatterScale::Linear => to_decibels(&scene.vv),
        }
    }

    /// Histogram of VV backscatter (dB) sampled over the region
    pub fn compute_histogram(&self, backscatter_db: &BandImage, transform: &GeoTransform, region: &Region) -> Histogram {
        let cells = region.sample_cells(transform, backscatter_db.dim(), self.params.histogram_scale_m);
        Histogram::from_values(
            cells.into_iter().map(|(r, c)| backscatter_db[[r, c]]),
            self.params.histogram_buckets,
        )
    }

    /// Water where the smoothed backscatter is strictly below the threshold
    pub fn classify(&self, smoothed_db: &BandImage, threshold: f64) -> ValidityMask {
        smoothed_db.mapv(|v| v.is_finite() && (v as f64) < threshold)
    }

    /// Water mask of a single radar scene over a region
    pub fn water_mask(&self, scene: &RadarScene, region: &Region) -> WqResult<WaterMask> {
        let db = Self::backscatter_db(scene);
        let histogram = self.compute_histogram(&db, &scene.transform, region);
        let threshold = otsu_threshold(&histogram).map_err(|e| match e {
            WqError::DegenerateHistogram(msg) => {
                WqError::DegenerateHistogram(format!("scene {}: {}", scene.id, msg))
            }
            other => other,
        })?;

        let smoothed = self.filter.focal_median_circular(&db, scene.transform.pixel_size())?;
        let in_region = region.mask_for_grid(&scene.transform, db.dim());

        let observed = Zip::from(&in_region)
            .and(&smoothed)
            .map_collect(|&inside, &v| inside && v.is_finite());
        let water = Zip::from(&observed)
            .and(&self.classify(&smoothed, threshold))
            .map_collect(|&obs, &w| obs && w);

        log::debug!(
            "Scene {}: Otsu threshold {:.3} dB over {} buckets, {} water pixels",
            scene.id,
            threshold,
            histogram.len(),
            water.iter().filter(|&&w| w).count()
        );

        Ok(WaterMask {
            timestamp: scene.timestamp,
            threshold,
            water,
            observed,
        })
    }

    /// Water-occurrence frequency over a stack of radar scenes
    ///
    /// The earliest scene fixes the output grid. Dates on another grid or
    /// with a degenerate histogram are excluded from both numerator and
    /// denominator.
    pub fn water_occurrence(&self, scenes: &[RadarScene], region: &Region) -> WqResult<WaterOccurrence> {
        let reference = scenes
            .iter()
            .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
            .ok_or_else(|| WqError::EmptyCollection("no radar scenes".to_string()))?;
        let dims = reference.vv.dim();
        let transform = reference.transform;

        let (on_grid, off_grid): (Vec<&RadarScene>, Vec<&RadarScene>) = scenes
            .iter()
            .partition(|s| s.vv.dim() == dims && s.transform == transform);
        for scene in &off_grid {
            log::warn!(
                "Excluding date from water occurrence: radar scene {} does not share the grid of {}",
                scene.id,
                reference.id
            );
        }

        log::info!("Computing water occurrence from {} radar scenes", on_grid.len());

        #[cfg(feature = "parallel")]
        let results: Vec<WqResult<WaterMask>> = {
            use rayon::prelude::*;
            on_grid.par_iter().map(|s| self.water_mask(s, region)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<WqResult<WaterMask>> =
            on_grid.iter().map(|s| self.water_mask(s, region)).collect();

        let mut water_dates = Array2::<u32>::zeros(dims);
        let mut observed_dates = Array2::<u32>::zeros(dims);
        let mut dates_used = 0;
        let mut dates_excluded = off_grid.len();
        for result in results {
            match result {
                Ok(mask) => {
                    Zip::from(&mut water_dates)
                        .and(&mut observed_dates)
                        .and(&mask.water)
                        .and(&mask.observed)
                        .for_each(|w, o, &is_water, &is_observed| {
                            if is_observed {
                                *o += 1;
                                if is_water {
                                    *w += 1;
                                }
                            }
                        });
                    dates_used += 1;
                }
                Err(WqError::DegenerateHistogram(msg)) => {
                    log::warn!("Excluding date from water occurrence: {}", msg);
                    dates_excluded += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let frequency = Zip::from(&water_dates)
            .and(&observed_dates)
            .map_collect(|&w, &o| {
                if o > 0 {
                    w as f32 / o as f32 * 100.0
                } else {
                    f32::NAN
                }
            });

        log::info!(
            "Water occurrence completed: {} dates used, {} excluded",
            dates_used,
            dates_excluded
        );

        Ok(WaterOccurrence {
            frequency,
            observed_dates,
            transform,
            dates_used,
            dates_excluded,
            min_occurrence_pct: self.params.min_occurrence_pct,
        })
    }
}

impl Default for WaterMasker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AcquisitionMode, BoundingBox, OrbitPass, Polarization};

    #[test]
    fn test_otsu_bimodal_threshold_between_clusters() {
        let mut values = Vec::new();
        for i in 0..500 {
            values.push(-22.0 + (i % 10) as f32 * 0.2); // open water
            values.push(-8.0 + (i % 10) as f32 * 0.2); // land
        }
        let histogram = Histogram::from_values(values, 256);
        let threshold = otsu_threshold(&histogram).unwrap();
        assert!(threshold > -21.1 && threshold < -7.1, "threshold {}", threshold);
    }

    #[test]
    fn test_otsu_degenerate() {
        let single = Histogram::from_values(vec![-15.0; 20], 256);
        assert_eq!(single.len(), 1);
        assert!(matches!(otsu_threshold(&single), Err(WqError::DegenerateHistogram(_))));

        let empty = Histogram::from_values(vec![f32::NAN; 4], 256);
        assert!(empty.is_empty());
        assert!(otsu_threshold(&empty).is_err());
    }

    #[test]
    fn test_otsu_two_buckets_picks_lower() {
        let histogram = Histogram {
            means: vec![-20.0, -5.0],
            counts: vec![10, 10],
        };
        assert_eq!(otsu_threshold(&histogram).unwrap(), -20.0);
    }

    #[test]
    fn test_classify_strictly_below() {
        let masker = WaterMasker::new();
        let smoothed = ndarray::arr2(&[[-20.0f32, -12.0], [-11.9, f32::NAN]]);
        let water = masker.classify(&smoothed, -12.0);
        assert_eq!(water, ndarray::arr2(&[[true, false], [false, false]]));
    }

    #[test]
    fn test_to_decibels() {
        let linear = ndarray::arr2(&[[100.0f32, 0.01], [0.0, -1.0]]);
        let db = to_decibels(&linear);
        assert!((db[[0, 0]] - 20.0).abs() < 1e-6);
        assert!((db[[0, 1]] + 20.0).abs() < 1e-5);
        assert!(db[[1, 0]].is_nan() && db[[1, 1]].is_nan());
    }

    #[test]
    fn test_occurrence_excludes_degenerate_dates() {
        let transform = GeoTransform::north_up(0.0, 40.0, 10.0);
        // Columns 0-1 open water, column 2 shoreline, column 3 land
        let mut vv = Array2::from_elem((4, 4), -6.0f32);
        for r in 0..4 {
            vv[[r, 0]] = -22.0;
            vv[[r, 1]] = -22.0;
            vv[[r, 2]] = -21.0;
        }
        let radar = |id: &str, vv: BandImage| RadarScene {
            id: id.to_string(),
            timestamp: Utc::now(),
            footprint: BoundingBox { min_x: 0.0, max_x: 40.0, min_y: 0.0, max_y: 40.0 },
            transform,
            vv,
            scale: BackscatterScale::Decibel,
            polarizations: vec![Polarization::VV],
            mode: AcquisitionMode::IW,
            orbit_pass: OrbitPass::Ascending,
        };
        let region = Region::polygon(&[(0.0, 0.0), (40.0, 0.0), (40.0, 40.0), (0.0, 40.0)]).unwrap();

        let masker = WaterMasker::with_params(WaterMaskParams {
            focal_radius_m: 0.0,
            ..WaterMaskParams::default()
        });
        let scenes = vec![radar("a", vv.clone()), radar("flat", Array2::from_elem((4, 4), -9.0))];
        let occurrence = masker.water_occurrence(&scenes, &region).unwrap();

        assert_eq!(occurrence.dates_used, 1);
        assert_eq!(occurrence.dates_excluded, 1);
        assert_eq!(occurrence.frequency[[0, 0]], 100.0);
        assert_eq!(occurrence.frequency[[0, 2]], 0.0);
        assert_eq!(occurrence.frequency[[0, 3]], 0.0);
        let persistent = occurrence.persistent_mask();
        assert!(persistent[[3, 1]]);
        assert!(!persistent[[3, 2]]);

        // A date on a neighbouring grid is left out instead of failing the stack
        let mut shifted = radar("b_shifted", vv.clone());
        shifted.transform = GeoTransform::north_up(40.0, 40.0, 10.0);
        shifted.timestamp = scenes[0].timestamp;
        let mut cropped = radar("c_cropped", Array2::from_elem((3, 4), -22.0));
        cropped.timestamp = scenes[0].timestamp;
        let scenes = vec![scenes[0].clone(), shifted, cropped, scenes[1].clone()];
        let occurrence = masker.water_occurrence(&scenes, &region).unwrap();
        assert_eq!(occurrence.dates_used, 1);
        assert_eq!(occurrence.dates_excluded, 3);
        assert_eq!(occurrence.transform, transform);
        assert_eq!(occurrence.frequency[[0, 0]], 100.0);
    }
}
