//! Core data types shared by every processing stage

use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Single band raster (rows x cols)
pub type BandImage = Array2<f32>;

/// Per-pixel validity, `true` where the pixel carries a usable value
pub type ValidityMask = Array2<bool>;

/// Sentinel-2 MSI bands used by the water quality pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    B1,
    B2,
    B3,
    B4,
    B5,
    B6,
    B7,
    B8,
    B8A,
    B11,
    B12,
}

impl Band {
    /// Every band the atmospheric correction consumes
    pub const ALL: [Band; 11] = [
        Band::B1,
        Band::B2,
        Band::B3,
        Band::B4,
        Band::B5,
        Band::B6,
        Band::B7,
        Band::B8,
        Band::B8A,
        Band::B11,
        Band::B12,
    ];

    /// Bands carried into surface reflectance (the SWIR pair only drives the aerosol term)
    pub const SURFACE: [Band; 9] = [
        Band::B1,
        Band::B2,
        Band::B3,
        Band::B4,
        Band::B5,
        Band::B6,
        Band::B7,
        Band::B8,
        Band::B8A,
    ];

    /// Band centre wavelength in nanometres
    pub fn center_wavelength_nm(self) -> f64 {
        match self {
            Band::B1 => 443.0,
            Band::B2 => 490.0,
            Band::B3 => 560.0,
            Band::B4 => 665.0,
            Band::B5 => 705.0,
            Band::B6 => 740.0,
            Band::B7 => 783.0,
            Band::B8 => 842.0,
            Band::B8A => 865.0,
            Band::B11 => 1610.0,
            Band::B12 => 2190.0,
        }
    }

    /// Ozone absorption coefficient (cm^-1)
    pub fn ozone_coefficient(self) -> f64 {
        match self {
            Band::B1 => 0.0039,
            Band::B2 => 0.0213,
            Band::B3 => 0.1052,
            Band::B4 => 0.0505,
            Band::B5 => 0.0205,
            Band::B6 => 0.0112,
            Band::B7 => 0.0075,
            Band::B8 => 0.0021,
            Band::B8A => 0.0019,
            Band::B11 | Band::B12 => 0.0,
        }
    }

    /// Map the `bandId` index used in Sentinel-2 product metadata
    pub fn from_s2_band_id(id: u8) -> Option<Band> {
        match id {
            0 => Some(Band::B1),
            1 => Some(Band::B2),
            2 => Some(Band::B3),
            3 => Some(Band::B4),
            4 => Some(Band::B5),
            5 => Some(Band::B6),
            6 => Some(Band::B7),
            7 => Some(Band::B8),
            8 => Some(Band::B8A),
            11 => Some(Band::B11),
            12 => Some(Band::B12),
            _ => None, // B9 / B10 are atmospheric bands we never read
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::B1 => "B1",
            Band::B2 => "B2",
            Band::B3 => "B3",
            Band::B4 => "B4",
            Band::B5 => "B5",
            Band::B6 => "B6",
            Band::B7 => "B7",
            Band::B8 => "B8",
            Band::B8A => "B8A",
            Band::B11 => "B11",
            Band::B12 => "B12",
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Geospatial bounding box in projected metres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up grid with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// World coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Pixel containing a world coordinate, if it lies on a grid of `dims`
    ///
    /// Rotation terms are ignored; every archive delivers north-up grids.
    pub fn world_to_pixel(&self, x: f64, y: f64, dims: (usize, usize)) -> Option<(usize, usize)> {
        let col = ((x - self.top_left_x) / self.pixel_width).floor();
        let row = ((y - self.top_left_y) / self.pixel_height).floor();
        if col < 0.0 || row < 0.0 || !col.is_finite() || !row.is_finite() {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row < dims.0 && col < dims.1 {
            Some((row, col))
        } else {
            None
        }
    }

    /// Extent covered by a grid of `dims`
    pub fn bounds(&self, dims: (usize, usize)) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + dims.1 as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + dims.0 as f64 * self.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    pub fn pixel_size(&self) -> f64 {
        self.pixel_width.abs()
    }
}

/// Half-open calendar date window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> WqResult<Self> {
        if end < start {
            return Err(WqError::InvalidParameter(format!(
                "date range ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse `YYYY-MM-DD` bounds as typed into the date boxes
    pub fn parse(start: &str, end: &str) -> WqResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| WqError::InvalidParameter(format!("invalid date '{}': {}", s, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let date = timestamp.date_naive();
        date >= self.start && date < self.end
    }
}

/// Per-scene acquisition metadata, every field exactly as delivered by the archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneMetadata {
    /// Mean solar zenith angle (degrees)
    pub sun_zenith: Option<f64>,
    /// Mean solar azimuth angle (degrees)
    pub sun_azimuth: Option<f64>,
    /// Mean viewing incidence zenith angle (degrees)
    pub sat_zenith: Option<f64>,
    /// Mean viewing incidence azimuth angle (degrees)
    pub sat_azimuth: Option<f64>,
    /// Exo-atmospheric solar irradiance per band (W/m²/µm)
    pub solar_irradiance: BTreeMap<Band, f64>,
    pub cloud_percentage: Option<f64>,
}

/// Optical scene with raw digital-number bands on the analysis grid
#[derive(Debug, Clone)]
pub struct Scene {
    /// Stable archive index, used to order same-day reductions
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub footprint: BoundingBox,
    pub transform: GeoTransform,
    pub bands: BTreeMap<Band, BandImage>,
    pub metadata: SceneMetadata,
}

impl Scene {
    /// Grid dimensions, taken from the first band
    pub fn dim(&self) -> (usize, usize) {
        self.bands
            .values()
            .next()
            .map(|b| b.dim())
            .unwrap_or((0, 0))
    }

    pub fn band(&self, band: Band) -> WqResult<&BandImage> {
        self.bands.get(&band).ok_or_else(|| WqError::MissingBand {
            scene: self.id.clone(),
            band,
        })
    }
}

/// Time-ordered set of scenes
#[derive(Debug, Clone, Default)]
pub struct SceneCollection {
    scenes: Vec<Scene>,
}

impl SceneCollection {
    /// Build a collection ordered by timestamp, ties broken by scene id
    pub fn from_scenes(mut scenes: Vec<Scene>) -> Self {
        scenes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self { scenes }
    }

    /// Scenes whose footprint intersects `bounds` and whose date lies in `range`
    pub fn filter(&self, bounds: &BoundingBox, range: &DateRange) -> Self {
        Self {
            scenes: self
                .scenes
                .iter()
                .filter(|s| s.footprint.intersects(bounds) && range.contains(&s.timestamp))
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scene> {
        self.scenes.iter()
    }

    pub fn as_slice(&self) -> &[Scene] {
        &self.scenes
    }
}

impl IntoIterator for SceneCollection {
    type Item = Scene;
    type IntoIter = std::vec::IntoIter<Scene>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenes.into_iter()
    }
}

/// Scene converted to remote-sensing reflectance (sr^-1)
#[derive(Debug, Clone)]
pub struct CorrectedScene {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub cloud_percentage: f64,
    pub transform: GeoTransform,
    pub reflectance: BTreeMap<Band, BandImage>,
    pub mask: ValidityMask,
}

/// One composite per calendar date, band values averaged over that day's scenes
#[derive(Debug, Clone)]
pub struct DailyComposite {
    pub date: NaiveDate,
    /// Midnight UTC of `date`
    pub timestamp: DateTime<Utc>,
    pub cloud_percentage: f64,
    pub transform: GeoTransform,
    pub reflectance: BTreeMap<Band, BandImage>,
    pub mask: ValidityMask,
    pub scene_count: usize,
}

impl DailyComposite {
    pub fn band(&self, band: Band) -> WqResult<&BandImage> {
        self.reflectance.get(&band).ok_or_else(|| WqError::MissingBand {
            scene: self.date.to_string(),
            band,
        })
    }
}

/// Water quality parameters the index engine produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaterParameter {
    Turbidity,
    Ndci,
    ChlorophyllA,
}

impl WaterParameter {
    pub const ALL: [WaterParameter; 3] = [
        WaterParameter::Turbidity,
        WaterParameter::Ndci,
        WaterParameter::ChlorophyllA,
    ];

    /// Output band name
    pub fn band_name(self) -> &'static str {
        match self {
            WaterParameter::Turbidity => "s2_turb",
            WaterParameter::Ndci => "NDCI",
            WaterParameter::ChlorophyllA => "s2_chl",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            WaterParameter::Turbidity => "FNU",
            WaterParameter::Ndci => "",
            WaterParameter::ChlorophyllA => "mg/m^3",
        }
    }

    /// Inclusive value range retained when charting a series
    pub fn chart_range(self) -> (f32, f32) {
        match self {
            WaterParameter::Turbidity => (0.0, 500.0),
            WaterParameter::Ndci => (-1.0, 1.0),
            WaterParameter::ChlorophyllA => (0.0, 70.0),
        }
    }
}

impl std::fmt::Display for WaterParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaterParameter::Turbidity => write!(f, "Turbidity"),
            WaterParameter::Ndci => write!(f, "NDCI"),
            WaterParameter::ChlorophyllA => write!(f, "Chlorophyll-a"),
        }
    }
}

impl FromStr for WaterParameter {
    type Err = WqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "turbidity" | "s2_turb" => Ok(WaterParameter::Turbidity),
            "ndci" => Ok(WaterParameter::Ndci),
            "chlorophyll-a" | "chlorophyll_a" | "chla" | "s2_chl" => Ok(WaterParameter::ChlorophyllA),
            other => Err(WqError::InvalidParameter(format!(
                "no processing defined for parameter '{}'",
                other
            ))),
        }
    }
}

/// Single-band index raster with inherited acquisition tags
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRaster {
    pub parameter: WaterParameter,
    /// Raw formula output; pixels outside `mask` keep their out-of-range value
    pub values: BandImage,
    pub mask: ValidityMask,
    pub transform: GeoTransform,
    pub timestamp: DateTime<Utc>,
    pub cloud_percentage: f64,
}

impl IndexRaster {
    pub fn value_at(&self, row: usize, col: usize) -> Option<f32> {
        match self.mask.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// (timestamp, scalar) sample of a region series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

/// Units of a backscatter raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackscatterScale {
    Linear,
    Decibel,
}

/// Ground-range radar scene holding the VV backscatter band
#[derive(Debug, Clone)]
pub struct RadarScene {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub footprint: BoundingBox,
    pub transform: GeoTransform,
    pub vv: BandImage,
    pub scale: BackscatterScale,
    pub polarizations: Vec<Polarization>,
    pub mode: AcquisitionMode,
    pub orbit_pass: OrbitPass,
}

/// Error types for water quality processing
#[derive(Debug, thiserror::Error)]
pub enum WqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scene {scene} is missing metadata field {field}")]
    MissingMetadata { scene: String, field: String },

    #[error("Scene {scene} is missing band {band}")]
    MissingBand { scene: String, band: Band },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    #[error("Degenerate histogram: {0}")]
    DegenerateHistogram(String),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for water quality operations
pub type WqResult<T> = Result<T, WqError>;
