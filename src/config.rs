//! Pipeline configuration loaded from JSON

use crate::core::atmospheric::AtmosphericParams;
use crate::core::indices::IndexParams;
use crate::core::series::SeriesParams;
use crate::core::water_mask::WaterMaskParams;
use crate::io::archive::RadarQuery;
use crate::types::{WqError, WqResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of every stage; missing sections fall back to their defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub atmospheric: AtmosphericParams,
    pub water_mask: WaterMaskParams,
    pub radar: RadarQuery,
    pub index: IndexParams,
    pub series: SeriesParams,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> WqResult<Self> {
        serde_json::from_str(json).map_err(|e| WqError::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> WqResult<Self> {
        log::info!("Loading pipeline configuration from {}", path.as_ref().display());
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }
}
