//! minnow: inland water quality from Sentinel-2 and Sentinel-1
//!
//! Converts Sentinel-2 L1C scenes into water-leaving reflectance, mosaics
//! same-day captures, derives turbidity, NDCI and chlorophyll-a rasters,
//! and reduces them to time series over points, lakes or road sections.
//! Sentinel-1 VV backscatter provides an Otsu water mask and a multi-date
//! water-occurrence frequency.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::config::PipelineConfig;
pub use crate::core::{
    select_least_cloudy, AnalysisRequest, AtmosphericCorrector, IndexCollections, IndexEngine,
    Orchestrator, Region, RegionSeriesExtractor, TemporalMosaicker, TimeSeries, WaterMasker,
};
pub use crate::io::{ElevationSource, InMemoryArchive, OpticalArchive, RadarArchive};
pub use crate::types::{
    Band, CorrectedScene, DailyComposite, DateRange, IndexRaster, Scene, SceneCollection,
    TimeSeriesPoint, WaterParameter, WqError, WqResult,
};

#[cfg(feature = "python")]
mod python {
    use crate::core::indices::IndexEngine;
    use crate::core::water_mask::{otsu_threshold, Histogram};
    use crate::types::{Band, BandImage, DailyComposite, GeoTransform, IndexRaster, WqError};
    use chrono::NaiveDate;
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
    use pyo3::prelude::*;
    use std::collections::BTreeMap;

    fn to_py_err(e: WqError) -> PyErr {
        match e {
            WqError::InvalidParameter(_) | WqError::GridMismatch(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// Wrap loose reflectance arrays as an undated, fully valid composite
    fn composite(bands: Vec<(Band, BandImage)>) -> PyResult<DailyComposite> {
        let dims = bands.first().map(|(_, b)| b.dim()).unwrap_or((0, 0));
        if bands.iter().any(|(_, b)| b.dim() != dims) {
            return Err(to_py_err(WqError::GridMismatch(
                "reflectance arrays must share one shape".to_string(),
            )));
        }
        let date = NaiveDate::default();
        Ok(DailyComposite {
            date,
            timestamp: date.and_time(chrono::NaiveTime::MIN).and_utc(),
            cloud_percentage: 0.0,
            transform: GeoTransform::north_up(0.0, 0.0, 1.0),
            reflectance: bands.into_iter().collect::<BTreeMap<_, _>>(),
            mask: ndarray::Array2::from_elem(dims, true),
            scene_count: 1,
        })
    }

    type MaskedRaster<'py> = (&'py PyArray2<f32>, &'py PyArray2<bool>);

    fn into_py(py: Python<'_>, raster: IndexRaster) -> MaskedRaster<'_> {
        (raster.values.into_pyarray(py), raster.mask.into_pyarray(py))
    }

    /// Turbidity (FNU) and validity mask from green (B3) and blue (B2) Rrs
    #[pyfunction]
    fn turbidity<'py>(
        py: Python<'py>,
        green: PyReadonlyArray2<f32>,
        blue: PyReadonlyArray2<f32>,
    ) -> PyResult<MaskedRaster<'py>> {
        let c = composite(vec![
            (Band::B3, green.as_array().to_owned()),
            (Band::B2, blue.as_array().to_owned()),
        ])?;
        let raster = IndexEngine::new().turbidity(&c).map_err(to_py_err)?;
        Ok(into_py(py, raster))
    }

    /// NDCI and validity mask from red (B4) and red-edge (B5) Rrs
    #[pyfunction]
    fn ndci<'py>(
        py: Python<'py>,
        red: PyReadonlyArray2<f32>,
        red_edge: PyReadonlyArray2<f32>,
    ) -> PyResult<MaskedRaster<'py>> {
        let c = composite(vec![
            (Band::B4, red.as_array().to_owned()),
            (Band::B5, red_edge.as_array().to_owned()),
        ])?;
        let raster = IndexEngine::new().ndci(&c).map_err(to_py_err)?;
        Ok(into_py(py, raster))
    }

    /// Chlorophyll-a (mg/m³) and validity mask from red (B4) and red-edge (B5) Rrs
    #[pyfunction]
    fn chlorophyll_a<'py>(
        py: Python<'py>,
        red: PyReadonlyArray2<f32>,
        red_edge: PyReadonlyArray2<f32>,
    ) -> PyResult<MaskedRaster<'py>> {
        let c = composite(vec![
            (Band::B4, red.as_array().to_owned()),
            (Band::B5, red_edge.as_array().to_owned()),
        ])?;
        let raster = IndexEngine::new().chlorophyll_a(&c).map_err(to_py_err)?;
        Ok(into_py(py, raster))
    }

    /// Otsu threshold of backscatter samples (dB), None for a degenerate histogram
    #[pyfunction]
    #[pyo3(signature = (values, buckets = 256))]
    fn otsu(values: PyReadonlyArray1<f32>, buckets: usize) -> PyResult<Option<f64>> {
        let histogram = Histogram::from_values(values.as_array().iter().copied(), buckets);
        match otsu_threshold(&histogram) {
            Ok(threshold) => Ok(Some(threshold)),
            Err(WqError::DegenerateHistogram(_)) => Ok(None),
            Err(e) => Err(to_py_err(e)),
        }
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(turbidity, m)?)?;
        m.add_function(wrap_pyfunction!(ndci, m)?)?;
        m.add_function(wrap_pyfunction!(chlorophyll_a, m)?)?;
        m.add_function(wrap_pyfunction!(otsu, m)?)?;
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }
}
