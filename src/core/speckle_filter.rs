use crate::types::{BandImage, WqError, WqResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Speckle filtering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleFilterParams {
    /// Radius of the circular focal window in metres
    pub radius_m: f64,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self { radius_m: 50.0 }
    }
}

/// Focal median smoothing of radar backscatter ahead of water classification
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    /// Pixel offsets covered by a circle of `radius_m` on a grid of `pixel_size`
    fn circular_kernel(&self, pixel_size: f64) -> WqResult<Vec<(isize, isize)>> {
        if !(pixel_size > 0.0) || !(self.params.radius_m >= 0.0) {
            return Err(WqError::InvalidParameter(format!(
                "focal radius {} m on pixel size {} m",
                self.params.radius_m, pixel_size
            )));
        }

        let radius_px = self.params.radius_m / pixel_size;
        let reach = radius_px.floor() as isize;
        let mut offsets = Vec::new();
        for di in -reach..=reach {
            for dj in -reach..=reach {
                let dist2 = (di * di + dj * dj) as f64;
                if dist2 <= radius_px * radius_px {
                    offsets.push((di, dj));
                }
            }
        }
        Ok(offsets)
    }

    /// Circular focal median, ignoring non-finite pixels
    ///
    /// Pixels whose whole window is non-finite stay NaN. Even-sized windows
    /// take the upper median.
    pub fn focal_median_circular(&self, image: &BandImage, pixel_size: f64) -> WqResult<BandImage> {
        let kernel = self.circular_kernel(pixel_size)?;
        log::debug!(
            "Applying circular focal median: radius {} m, {} pixels per window",
            self.params.radius_m,
            kernel.len()
        );

        let (height, width) = image.dim();
        let mut filtered = Array2::from_elem((height, width), f32::NAN);

        let median_at = |i: usize, j: usize| -> f32 {
            let mut window_values = Vec::with_capacity(kernel.len());
            for &(di, dj) in &kernel {
                let ii = i as isize + di;
                let jj = j as isize + dj;
                if ii >= 0 && jj >= 0 && (ii as usize) < height && (jj as usize) < width {
                    let value = image[[ii as usize, jj as usize]];
                    if value.is_finite() {
                        window_values.push(value);
                    }
                }
            }

            if window_values.is_empty() {
                return f32::NAN;
            }
            window_values.sort_by(|a, b| a.total_cmp(b));
            window_values[window_values.len() / 2]
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut filtered).par_for_each(|(i, j), out| *out = median_at(i, j));
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut filtered).for_each(|(i, j), out| *out = median_at(i, j));

        Ok(filtered)
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_circular() {
        let filter = SpeckleFilter::new();
        // 50 m on 10 m pixels: radius 5, corners of the 11x11 box excluded
        let kernel = filter.circular_kernel(10.0).unwrap();
        assert!(kernel.contains(&(5, 0)));
        assert!(kernel.contains(&(3, 4)));
        assert!(!kernel.contains(&(5, 5)));
        assert!(kernel.len() < 121);

        let point = SpeckleFilter::with_params(SpeckleFilterParams { radius_m: 0.0 });
        assert_eq!(point.circular_kernel(10.0).unwrap(), vec![(0, 0)]);
        assert!(filter.circular_kernel(0.0).is_err());
    }

    #[test]
    fn test_median_removes_isolated_spike() {
        let filter = SpeckleFilter::with_params(SpeckleFilterParams { radius_m: 10.0 });
        let mut image = Array2::from_elem((5, 5), -18.0f32);
        image[[2, 2]] = 5.0;

        let smoothed = filter.focal_median_circular(&image, 10.0).unwrap();
        assert_eq!(smoothed[[2, 2]], -18.0);
        assert!(smoothed.iter().all(|&v| v == -18.0));
    }

    #[test]
    fn test_median_skips_nan() {
        let filter = SpeckleFilter::with_params(SpeckleFilterParams { radius_m: 10.0 });
        let mut image = Array2::from_elem((3, 3), f32::NAN);
        image[[1, 1]] = -3.0;
        image[[0, 1]] = -1.0;
        image[[1, 0]] = -2.0;

        let smoothed = filter.focal_median_circular(&image, 10.0).unwrap();
        assert_eq!(smoothed[[1, 1]], -2.0);
        // (2, 2) only sees NaN neighbours
        assert!(smoothed[[2, 2]].is_nan());
    }
}
