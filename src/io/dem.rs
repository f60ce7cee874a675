use crate::types::{BandImage, GeoTransform, Scene, WqResult};
use ndarray::Array2;

/// Supplies surface elevation (m) on a scene's grid
pub trait ElevationSource: Send + Sync {
    fn elevation_for(&self, scene: &Scene) -> WqResult<BandImage>;
}

/// Flat terrain at a fixed height, e.g. a lake's surface level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantElevation(pub f32);

impl ElevationSource for ConstantElevation {
    fn elevation_for(&self, scene: &Scene) -> WqResult<BandImage> {
        Ok(Array2::from_elem(scene.dim(), self.0))
    }
}

/// Elevation raster resampled onto each scene grid on demand
#[derive(Debug, Clone)]
pub struct DemRaster {
    pub elevation: BandImage,
    pub transform: GeoTransform,
}

impl DemRaster {
    pub fn new(elevation: BandImage, transform: GeoTransform) -> Self {
        Self { elevation, transform }
    }

    /// Bilinear resampling onto a target grid, sampled at pixel centres
    ///
    /// Target pixels outside the DEM are NaN.
    pub fn resample(&self, target_transform: &GeoTransform, target_shape: (usize, usize)) -> BandImage {
        log::debug!("Resampling DEM to target grid {:?}", target_shape);

        let dem = &self.elevation;
        let source = &self.transform;
        let (source_height, source_width) = dem.dim();
        if dem.is_empty() {
            return Array2::from_elem(target_shape, f32::NAN);
        }

        Array2::from_shape_fn(target_shape, |(i, j)| {
            let (x, y) = target_transform.pixel_center(i, j);

            // Continuous source coordinates relative to pixel centres
            let source_col = (x - source.top_left_x) / source.pixel_width - 0.5;
            let source_row = (y - source.top_left_y) / source.pixel_height - 0.5;

            if source_col < 0.0
                || source_row < 0.0
                || source_col > (source_width - 1) as f64
                || source_row > (source_height - 1) as f64
            {
                return f32::NAN;
            }

            let x1 = source_col.floor() as usize;
            let y1 = source_row.floor() as usize;
            let x2 = (x1 + 1).min(source_width - 1);
            let y2 = (y1 + 1).min(source_height - 1);
            let dx = source_col - x1 as f64;
            let dy = source_row - y1 as f64;

            let v11 = dem[[y1, x1]] as f64;
            let v12 = dem[[y2, x1]] as f64;
            let v21 = dem[[y1, x2]] as f64;
            let v22 = dem[[y2, x2]] as f64;

            (v11 * (1.0 - dx) * (1.0 - dy)
                + v21 * dx * (1.0 - dy)
                + v12 * (1.0 - dx) * dy
                + v22 * dx * dy) as f32
        })
    }
}

impl ElevationSource for DemRaster {
    fn elevation_for(&self, scene: &Scene) -> WqResult<BandImage> {
        let dims = scene.dim();
        if self.transform == scene.transform && self.elevation.dim() == dims {
            return Ok(self.elevation.clone());
        }
        Ok(self.resample(&scene.transform, dims))
    }
}

/// Digital Elevation Model reader
#[cfg(feature = "gdal")]
pub struct DemReader;

#[cfg(feature = "gdal")]
impl DemReader {
    /// Read the first band of a DEM file
    pub fn read_dem<P: AsRef<std::path::Path>>(dem_path: P) -> WqResult<DemRaster> {
        use crate::types::WqError;
        use gdal::Dataset;

        log::info!("Reading DEM from: {}", dem_path.as_ref().display());

        let dataset = Dataset::open(dem_path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("DEM size: {}x{}, geotransform: {:?}", width, height, geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let mut elevation = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| WqError::Processing(format!("Failed to reshape DEM data: {}", e)))?;
        if let Some(no_data) = no_data {
            elevation.mapv_inplace(|h| if (h as f64 - no_data).abs() < f64::EPSILON { f32::NAN } else { h });
        }

        Ok(DemRaster::new(
            elevation,
            GeoTransform {
                top_left_x: geo_transform[0],
                pixel_width: geo_transform[1],
                rotation_x: geo_transform[2],
                top_left_y: geo_transform[3],
                rotation_y: geo_transform[4],
                pixel_height: geo_transform[5],
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_grid_is_identity() {
        let transform = GeoTransform::north_up(0.0, 30.0, 10.0);
        let dem = DemRaster::new(ndarray::arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]), transform);
        let resampled = dem.resample(&transform, (3, 3));
        assert_eq!(resampled, dem.elevation);
    }

    #[test]
    fn test_resample_halfway_and_outside() {
        let dem = DemRaster::new(
            ndarray::arr2(&[[100.0, 200.0], [100.0, 200.0]]),
            GeoTransform::north_up(0.0, 20.0, 10.0),
        );
        // 5 m target pixel centred at x = 10 sits halfway between the two source centres
        let target = GeoTransform::north_up(7.5, 12.5, 5.0);
        let resampled = dem.resample(&target, (1, 1));
        assert!((resampled[[0, 0]] - 150.0).abs() < 1e-4);

        let outside = dem.resample(&GeoTransform::north_up(100.0, 20.0, 10.0), (1, 1));
        assert!(outside[[0, 0]].is_nan());
    }

    #[test]
    fn test_resample_empty_dem() {
        let transform = GeoTransform::north_up(0.0, 20.0, 10.0);
        for shape in [(0, 0), (2, 0), (0, 2)] {
            let dem = DemRaster::new(Array2::zeros(shape), transform);
            // Target centre at the DEM origin would map to source column 0
            let resampled = dem.resample(&GeoTransform::north_up(-5.0, 25.0, 10.0), (2, 2));
            assert!(resampled.iter().all(|v| v.is_nan()));
        }
    }
}
