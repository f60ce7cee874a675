//! Synthetic Sentinel-1/2 scenes shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use minnow::types::{
    AcquisitionMode, BackscatterScale, Band, GeoTransform, OrbitPass, Polarization, RadarScene,
    Scene, SceneMetadata,
};
use minnow::Region;
use ndarray::Array2;
use std::collections::BTreeMap;

pub const ORIGIN_X: f64 = 500_000.0;
pub const ORIGIN_Y: f64 = 6_650_000.0;
pub const PIXEL: f64 = 10.0;
pub const DIMS: (usize, usize) = (8, 8);

/// Sentinel-2A exo-atmospheric irradiance, B1..B8A, B11, B12
pub const ESUN: [f64; 11] = [
    1884.69, 1959.72, 1823.24, 1512.06, 1424.64, 1287.61, 1162.08, 1041.63, 955.32, 245.59, 85.25,
];

/// L1C digital numbers of clear lake water, B1..B8A, B11, B12
pub const WATER_DN: [f32; 11] = [
    1400.0, 1150.0, 1000.0, 700.0, 650.0, 500.0, 480.0, 450.0, 420.0, 150.0, 100.0,
];

/// L1C digital numbers of a forested shore (positive NDVI)
pub const LAND_DN: [f32; 11] = [
    1300.0, 1100.0, 1050.0, 900.0, 1400.0, 2300.0, 2600.0, 2700.0, 2800.0, 1500.0, 800.0,
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn transform() -> GeoTransform {
    GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, PIXEL)
}

pub fn timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// Water everywhere except the last `land_cols` columns
pub fn optical_scene(id: &str, when: &str, cloud: f64, land_cols: usize) -> Scene {
    let mut bands = BTreeMap::new();
    let mut solar_irradiance = BTreeMap::new();
    for (i, band) in Band::ALL.iter().enumerate() {
        let image = Array2::from_shape_fn(DIMS, |(_, c)| {
            if c >= DIMS.1 - land_cols {
                LAND_DN[i]
            } else {
                WATER_DN[i]
            }
        });
        bands.insert(*band, image);
        solar_irradiance.insert(*band, ESUN[i]);
    }

    Scene {
        id: id.to_string(),
        timestamp: timestamp(when),
        footprint: transform().bounds(DIMS),
        transform: transform(),
        bands,
        metadata: SceneMetadata {
            sun_zenith: Some(40.0),
            sun_azimuth: Some(150.0),
            sat_zenith: Some(5.0),
            sat_azimuth: Some(100.0),
            solar_irradiance,
            cloud_percentage: Some(cloud),
        },
    }
}

/// VV backscatter in linear power
///
/// Open water (-22 dB, with sparse -21.5 dB shallows) fills the first
/// `water_cols` columns, land (-7 dB) the rest.
pub fn radar_scene(id: &str, when: &str, water_cols: usize) -> RadarScene {
    let vv = Array2::from_shape_fn(DIMS, |(r, c)| {
        let db: f32 = if c >= water_cols {
            -7.0
        } else if r % 3 == 2 && c % 4 == 1 {
            -21.5
        } else {
            -22.0
        };
        10f32.powf(db / 10.0)
    });
    RadarScene {
        id: id.to_string(),
        timestamp: timestamp(when),
        footprint: transform().bounds(DIMS),
        transform: transform(),
        vv,
        scale: BackscatterScale::Linear,
        polarizations: vec![Polarization::VV, Polarization::VH],
        mode: AcquisitionMode::IW,
        orbit_pass: OrbitPass::Ascending,
    }
}

/// Polygon covering the whole test grid
pub fn whole_lake() -> Region {
    let (w, h) = (DIMS.1 as f64 * PIXEL, DIMS.0 as f64 * PIXEL);
    Region::polygon(&[
        (ORIGIN_X, ORIGIN_Y - h),
        (ORIGIN_X + w, ORIGIN_Y - h),
        (ORIGIN_X + w, ORIGIN_Y),
        (ORIGIN_X, ORIGIN_Y),
    ])
    .expect("valid polygon")
}
