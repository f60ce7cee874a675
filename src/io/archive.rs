use crate::types::{
    AcquisitionMode, BoundingBox, DateRange, OrbitPass, Polarization, RadarScene, Scene,
    SceneCollection, WqResult,
};
use serde::{Deserialize, Serialize};

/// Source of optical (Sentinel-2 L1C) scenes
pub trait OpticalArchive: Send + Sync {
    /// Scenes intersecting `bounds` and acquired within `range`, time-ordered
    fn query(&self, bounds: &BoundingBox, range: &DateRange) -> WqResult<SceneCollection>;
}

/// Acquisition filter for radar scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarQuery {
    pub polarization: Polarization,
    pub mode: AcquisitionMode,
    pub orbit_pass: OrbitPass,
}

impl Default for RadarQuery {
    fn default() -> Self {
        Self {
            polarization: Polarization::VV,
            mode: AcquisitionMode::IW,
            orbit_pass: OrbitPass::Ascending,
        }
    }
}

impl RadarQuery {
    pub fn matches(&self, scene: &RadarScene) -> bool {
        scene.polarizations.contains(&self.polarization)
            && scene.mode == self.mode
            && scene.orbit_pass == self.orbit_pass
    }
}

/// Source of radar (Sentinel-1 GRD) scenes
pub trait RadarArchive: Send + Sync {
    fn query(
        &self,
        bounds: &BoundingBox,
        range: &DateRange,
        filter: &RadarQuery,
    ) -> WqResult<Vec<RadarScene>>;
}

/// Archive over scenes already loaded in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryArchive {
    optical: SceneCollection,
    radar: Vec<RadarScene>,
}

impl InMemoryArchive {
    pub fn new(optical: Vec<Scene>, radar: Vec<RadarScene>) -> Self {
        let mut radar = radar;
        radar.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self {
            optical: SceneCollection::from_scenes(optical),
            radar,
        }
    }

    pub fn optical(scenes: Vec<Scene>) -> Self {
        Self::new(scenes, Vec::new())
    }
}

impl OpticalArchive for InMemoryArchive {
    fn query(&self, bounds: &BoundingBox, range: &DateRange) -> WqResult<SceneCollection> {
        let scenes = self.optical.filter(bounds, range);
        log::debug!(
            "Optical query {} .. {}: {} of {} scenes",
            range.start,
            range.end,
            scenes.len(),
            self.optical.len()
        );
        Ok(scenes)
    }
}

impl RadarArchive for InMemoryArchive {
    fn query(
        &self,
        bounds: &BoundingBox,
        range: &DateRange,
        filter: &RadarQuery,
    ) -> WqResult<Vec<RadarScene>> {
        let scenes: Vec<RadarScene> = self
            .radar
            .iter()
            .filter(|s| s.footprint.intersects(bounds) && range.contains(&s.timestamp))
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        log::debug!(
            "Radar query {} .. {} ({} {:?} {:?}): {} scenes",
            range.start,
            range.end,
            filter.polarization,
            filter.mode,
            filter.orbit_pass,
            scenes.len()
        );
        Ok(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackscatterScale, GeoTransform};
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn radar(id: &str, day: u32, pass: OrbitPass, pols: Vec<Polarization>) -> RadarScene {
        RadarScene {
            id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2020, 5, day, 17, 0, 0).unwrap(),
            footprint: BoundingBox { min_x: 0.0, max_x: 100.0, min_y: 0.0, max_y: 100.0 },
            transform: GeoTransform::north_up(0.0, 100.0, 10.0),
            vv: Array2::zeros((10, 10)),
            scale: BackscatterScale::Decibel,
            polarizations: pols,
            mode: AcquisitionMode::IW,
            orbit_pass: pass,
        }
    }

    #[test]
    fn test_radar_filter() {
        let archive = InMemoryArchive::new(
            Vec::new(),
            vec![
                radar("asc", 3, OrbitPass::Ascending, vec![Polarization::VV, Polarization::VH]),
                radar("desc", 4, OrbitPass::Descending, vec![Polarization::VV]),
                radar("hh", 5, OrbitPass::Ascending, vec![Polarization::HH]),
                radar("late", 30, OrbitPass::Ascending, vec![Polarization::VV]),
            ],
        );
        let bounds = BoundingBox { min_x: 50.0, max_x: 60.0, min_y: 50.0, max_y: 60.0 };
        let range = DateRange::parse("2020-05-01", "2020-05-30").unwrap();

        let scenes = RadarArchive::query(&archive, &bounds, &range, &RadarQuery::default()).unwrap();
        let ids: Vec<&str> = scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["asc"]);

        let elsewhere = BoundingBox { min_x: 500.0, max_x: 600.0, min_y: 0.0, max_y: 10.0 };
        assert!(RadarArchive::query(&archive, &elsewhere, &range, &RadarQuery::default())
            .unwrap()
            .is_empty());
    }
}
