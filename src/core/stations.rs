//! In-situ monitoring stations used to compare satellite series with field samples

use crate::core::series::TimeSeries;
use crate::types::{TimeSeriesPoint, WaterParameter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single laboratory or probe measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub parameter: WaterParameter,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    /// Projected coordinates (m)
    pub x: f64,
    pub y: f64,
    pub observations: Vec<Observation>,
}

impl Station {
    fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }

    fn measures(&self, parameter: WaterParameter) -> bool {
        self.observations.iter().any(|o| o.parameter == parameter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRegistry {
    stations: Vec<Station>,
    /// Maximum distance between a clicked point and a station (m)
    pub search_radius_m: f64,
}

impl StationRegistry {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations,
            search_radius_m: 50.0,
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Observations of the nearest station within the search radius
    ///
    /// NDCI is never sampled in the field, so it always yields `None`, as
    /// does a point with no station close enough.
    pub fn nearest_observations(
        &self,
        x: f64,
        y: f64,
        parameter: WaterParameter,
    ) -> Option<(&Station, TimeSeries)> {
        if parameter == WaterParameter::Ndci {
            return None;
        }

        let station = self
            .stations
            .iter()
            .filter(|s| s.measures(parameter))
            .map(|s| (s, s.distance_to(x, y)))
            .filter(|&(_, d)| d <= self.search_radius_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)?;

        log::debug!("Nearest {} station to ({}, {}): {}", parameter, x, y, station.id);

        let points = station
            .observations
            .iter()
            .filter(|o| o.parameter == parameter)
            .map(|o| TimeSeriesPoint {
                timestamp: o.timestamp,
                value: o.value,
            })
            .collect();
        Some((station, TimeSeries::new(points)))
    }
}
