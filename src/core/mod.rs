//! Processing stages of the water quality pipeline

pub mod atmospheric;
pub mod indices;
pub mod mosaic;
pub mod pipeline;
pub mod region;
pub mod selection;
pub mod series;
pub mod speckle_filter;
pub mod stations;
pub mod water_mask;

// Re-export main types
pub use atmospheric::{AtmosphericCorrector, AtmosphericParams, ViewGeometry};
pub use indices::{IndexCollections, IndexEngine, IndexParams};
pub use mosaic::TemporalMosaicker;
pub use pipeline::{select_least_cloudy, AnalysisRequest, Orchestrator};
pub use region::{Polyline, Region};
pub use selection::{ActiveSelection, Ticket};
pub use series::{RegionSeriesExtractor, SeriesParams, TimeSeries};
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams};
pub use stations::{Observation, Station, StationRegistry};
pub use water_mask::{
    otsu_threshold, to_decibels, Histogram, WaterMask, WaterMaskParams, WaterMasker,
    WaterOccurrence,
};
