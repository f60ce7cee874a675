use crate::types::{
    Band, BandImage, DailyComposite, IndexRaster, ValidityMask, WaterParameter, WqResult,
};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Coefficients of the water quality formulas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Turbidity slope on ln(green / blue)
    pub turbidity_slope: f64,
    /// Turbidity intercept (FNU)
    pub turbidity_intercept: f64,
    /// Scale applied to B4 / B5 before the NDCI ratio
    pub ndci_scale: f64,
    /// Chlorophyll-a quadratic coefficients a0 + a1·NDCI + a2·NDCI²
    pub chlorophyll_coefficients: [f64; 3],
    /// Upper bound of a valid chlorophyll-a value (mg/m³)
    pub chlorophyll_max: f64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            turbidity_slope: 15.31,
            turbidity_intercept: 3.497,
            ndci_scale: 0.0001,
            chlorophyll_coefficients: [16.93, 142.2, 182.3],
            chlorophyll_max: 70.0,
        }
    }
}

/// The three index collections of one request, each in composite order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexCollections {
    pub turbidity: Vec<IndexRaster>,
    pub ndci: Vec<IndexRaster>,
    pub chlorophyll_a: Vec<IndexRaster>,
}

impl IndexCollections {
    /// Result of a request with no intersecting scenes
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.turbidity.is_empty() && self.ndci.is_empty() && self.chlorophyll_a.is_empty()
    }

    pub fn collection(&self, parameter: WaterParameter) -> &[IndexRaster] {
        match parameter {
            WaterParameter::Turbidity => &self.turbidity,
            WaterParameter::Ndci => &self.ndci,
            WaterParameter::ChlorophyllA => &self.chlorophyll_a,
        }
    }
}

/// Per-pixel water quality formulas over daily composites
pub struct IndexEngine {
    params: IndexParams,
}

impl IndexEngine {
    pub fn new() -> Self {
        Self {
            params: IndexParams::default(),
        }
    }

    pub fn with_params(params: IndexParams) -> Self {
        Self { params }
    }

    fn tagged(
        composite: &DailyComposite,
        parameter: WaterParameter,
        values: BandImage,
        mask: ValidityMask,
    ) -> IndexRaster {
        IndexRaster {
            parameter,
            values,
            mask,
            transform: composite.transform,
            timestamp: composite.timestamp,
            cloud_percentage: composite.cloud_percentage,
        }
    }

    /// Raw NDCI of a composite, before any range mask
    fn ndci_values(&self, composite: &DailyComposite) -> WqResult<BandImage> {
        let scale = self.params.ndci_scale as f32;
        let red = composite.band(Band::B4)?;
        let red_edge = composite.band(Band::B5)?;
        Ok(Zip::from(red_edge).and(red).map_collect(|&b5, &b4| {
            let (b5, b4) = (b5 * scale, b4 * scale);
            (b5 - b4) / (b5 + b4)
        }))
    }

    /// Turbidity (FNU) from the green/blue log ratio, valid where ≥ 0
    pub fn turbidity(&self, composite: &DailyComposite) -> WqResult<IndexRaster> {
        let slope = self.params.turbidity_slope as f32;
        let intercept = self.params.turbidity_intercept as f32;
        let green = composite.band(Band::B3)?;
        let blue = composite.band(Band::B2)?;

        let values = Zip::from(green)
            .and(blue)
            .map_collect(|&g, &b| slope * (g / b).ln() + intercept);
        let mask = Zip::from(&values)
            .and(&composite.mask)
            .map_collect(|&v, &valid| valid && v.is_finite() && v >= 0.0);

        Ok(Self::tagged(composite, WaterParameter::Turbidity, values, mask))
    }

    /// Normalized Difference Chlorophyll Index, valid within [-1, 1]
    pub fn ndci(&self, composite: &DailyComposite) -> WqResult<IndexRaster> {
        let values = self.ndci_values(composite)?;
        let mask = Zip::from(&values)
            .and(&composite.mask)
            .map_collect(|&v, &valid| valid && v.is_finite() && (-1.0..=1.0).contains(&v));

        Ok(Self::tagged(composite, WaterParameter::Ndci, values, mask))
    }

    /// Chlorophyll-a (mg/m³) from the NDCI quadratic, valid where ≤ the ceiling
    pub fn chlorophyll_a(&self, composite: &DailyComposite) -> WqResult<IndexRaster> {
        let [a0, a1, a2] = self.params.chlorophyll_coefficients.map(|c| c as f32);
        let ceiling = self.params.chlorophyll_max as f32;

        let values = self
            .ndci_values(composite)?
            .mapv(|n| a0 + a1 * n + a2 * n * n);
        let mask = Zip::from(&values)
            .and(&composite.mask)
            .map_collect(|&v, &valid| valid && v.is_finite() && v <= ceiling);

        Ok(Self::tagged(composite, WaterParameter::ChlorophyllA, values, mask))
    }

    /// Evaluate one parameter
    pub fn compute(&self, parameter: WaterParameter, composite: &DailyComposite) -> WqResult<IndexRaster> {
        match parameter {
            WaterParameter::Turbidity => self.turbidity(composite),
            WaterParameter::Ndci => self.ndci(composite),
            WaterParameter::ChlorophyllA => self.chlorophyll_a(composite),
        }
    }

    fn compute_collection(
        &self,
        parameter: WaterParameter,
        composites: &[DailyComposite],
    ) -> WqResult<Vec<IndexRaster>> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            composites.par_iter().map(|c| self.compute(parameter, c)).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            composites.iter().map(|c| self.compute(parameter, c)).collect()
        }
    }

    /// All three index collections over a sequence of composites
    pub fn compute_all(&self, composites: &[DailyComposite]) -> WqResult<IndexCollections> {
        log::info!("Computing water quality indices for {} composites", composites.len());

        #[cfg(feature = "parallel")]
        let (turbidity, (ndci, chlorophyll_a)) = rayon::join(
            || self.compute_collection(WaterParameter::Turbidity, composites),
            || {
                rayon::join(
                    || self.compute_collection(WaterParameter::Ndci, composites),
                    || self.compute_collection(WaterParameter::ChlorophyllA, composites),
                )
            },
        );
        #[cfg(not(feature = "parallel"))]
        let (turbidity, (ndci, chlorophyll_a)) = (
            self.compute_collection(WaterParameter::Turbidity, composites),
            (
                self.compute_collection(WaterParameter::Ndci, composites),
                self.compute_collection(WaterParameter::ChlorophyllA, composites),
            ),
        );

        Ok(IndexCollections {
            turbidity: turbidity?,
            ndci: ndci?,
            chlorophyll_a: chlorophyll_a?,
        })
    }

    /// Narrow a raster's mask to the parameter's charting range
    pub fn chart_mask(raster: &IndexRaster) -> IndexRaster {
        let (lo, hi) = raster.parameter.chart_range();
        let mask = Zip::from(&raster.values)
            .and(&raster.mask)
            .map_collect(|&v, &valid| valid && v >= lo && v <= hi);
        IndexRaster {
            mask,
            ..raster.clone()
        }
    }
}

impl Default for IndexEngine {
    fn default() -> Self {
        Self::new()
    }
}
