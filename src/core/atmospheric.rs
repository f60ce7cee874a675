use crate::io::dem::ElevationSource;
use crate::types::{
    Band, BandImage, CorrectedScene, Scene, SceneCollection, ValidityMask, WqError, WqResult,
};
use chrono::Datelike;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Atmospheric correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosphericParams {
    /// Divisor turning L1C digital numbers into TOA reflectance
    pub reflectance_scale: f64,
    /// Eccentricity of the Earth's orbit
    pub orbit_eccentricity: f64,
    /// Total column ozone (Dobson units)
    pub ozone_column_du: f64,
    /// Sea-level standard pressure (hPa)
    pub standard_pressure_hpa: f64,
    /// Refractive index of water for the Fresnel terms
    pub water_refractive_index: f64,
    /// Fresnel reflectance applied on the view path
    pub view_fresnel_reflectance: f64,
    /// Shorter SWIR reference band for aerosol extrapolation
    pub aerosol_short_band: Band,
    /// Longer SWIR reference band, also the extrapolation anchor
    pub aerosol_long_band: Band,
}

impl Default for AtmosphericParams {
    fn default() -> Self {
        Self {
            reflectance_scale: 10_000.0,
            orbit_eccentricity: 0.01673,
            ozone_column_du: 300.0,
            standard_pressure_hpa: 1013.25,
            water_refractive_index: 1.333,
            view_fresnel_reflectance: 1e-10, // near-nadir view, practically zero
            aerosol_short_band: Band::B11,
            aerosol_long_band: Band::B12,
        }
    }
}

/// Sun/sensor geometry of a scene, angles in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewGeometry {
    pub sun_zenith: f64,
    pub sun_azimuth: f64,
    pub view_zenith: f64,
    pub view_azimuth: f64,
}

impl ViewGeometry {
    /// Pull the mean angles out of scene metadata
    pub fn from_scene(scene: &Scene) -> WqResult<Self> {
        let meta = &scene.metadata;
        let require = |value: Option<f64>, field: &str| {
            value.ok_or_else(|| WqError::MissingMetadata {
                scene: scene.id.clone(),
                field: field.to_string(),
            })
        };

        Ok(Self {
            sun_zenith: require(meta.sun_zenith, "sun_zenith")?,
            sun_azimuth: require(meta.sun_azimuth, "sun_azimuth")?,
            view_zenith: require(meta.sat_zenith, "sat_zenith")?,
            view_azimuth: require(meta.sat_azimuth, "sat_azimuth")?,
        })
    }

    pub fn cos_sun_zenith(&self) -> f64 {
        self.sun_zenith.to_radians().cos()
    }

    pub fn cos_view_zenith(&self) -> f64 {
        self.view_zenith.to_radians().cos()
    }

    /// Two-way path length through the atmosphere
    pub fn airmass(&self) -> f64 {
        1.0 / self.cos_sun_zenith() + 1.0 / self.cos_view_zenith()
    }

    fn cos_relative_azimuth(&self) -> f64 {
        (self.view_azimuth - self.sun_azimuth).to_radians().cos()
    }
}

/// Converts L1C digital numbers into remote-sensing reflectance over water
///
/// Each physical step is exposed on its own so intermediate rasters
/// (Rayleigh radiance, ozone transmittance, aerosol epsilon, ...) can be
/// checked in isolation.
pub struct AtmosphericCorrector {
    params: AtmosphericParams,
}

impl AtmosphericCorrector {
    /// Create a corrector with default parameters
    pub fn new() -> Self {
        Self {
            params: AtmosphericParams::default(),
        }
    }

    /// Create a corrector with custom parameters
    pub fn with_params(params: AtmosphericParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AtmosphericParams {
        &self.params
    }

    /// Rescale digital numbers to TOA reflectance
    pub fn toa_reflectance(&self, digital_numbers: &BandImage) -> BandImage {
        let scale = self.params.reflectance_scale as f32;
        digital_numbers.mapv(|dn| dn / scale)
    }

    /// Earth-Sun distance factor (AU) for a day of year
    pub fn earth_sun_distance(&self, day_of_year: u32) -> f64 {
        1.0 - self.params.orbit_eccentricity * (2.0 * PI * day_of_year as f64 / 365.0).cos()
    }

    /// TOA radiance from TOA reflectance
    pub fn toa_radiance(
        &self,
        reflectance: &BandImage,
        esun: f64,
        cos_sun_zenith: f64,
        distance: f64,
    ) -> BandImage {
        let factor = (esun * cos_sun_zenith / (PI * distance * distance)) as f32;
        reflectance.mapv(|rho| rho * factor)
    }

    /// Two-way ozone transmittance of a band
    pub fn ozone_transmittance(&self, band: Band, geometry: &ViewGeometry) -> f64 {
        let tau_oz = band.ozone_coefficient() * self.params.ozone_column_du / 1000.0;
        (-tau_oz * geometry.airmass()).exp()
    }

    /// Surface pressure (hPa) from elevation (m), barometric formula
    pub fn surface_pressure(&self, elevation: &BandImage) -> BandImage {
        elevation.mapv(|h| {
            let p = 101_325.0 * (1.0 - 2.25577e-5 * h as f64).powf(5.25588) * 0.01;
            p as f32
        })
    }

    /// Rayleigh optical depth per pixel for a band
    pub fn rayleigh_optical_depth(&self, pressure: &BandImage, band: Band) -> BandImage {
        let lambda = band.center_wavelength_nm() / 1000.0; // micrometres
        let spectral = 0.008569
            * lambda.powi(-4)
            * (1.0 + 0.0113 * lambda.powi(-2) + 0.00013 * lambda.powi(-4));
        let p0 = self.params.standard_pressure_hpa;
        pressure.mapv(|p| (p as f64 / p0 * spectral) as f32)
    }

    /// Unpolarised Fresnel reflectance of the air-water interface
    pub fn fresnel_reflectance(&self, incidence_deg: f64) -> f64 {
        let n = self.params.water_refractive_index;
        let theta_i = incidence_deg.to_radians();
        if theta_i.abs() < 1e-6 {
            let r = (n - 1.0) / (n + 1.0);
            return r * r;
        }

        let theta_t = (theta_i.sin() / n).asin();
        let r_s = ((theta_i - theta_t).sin() / (theta_i + theta_t).sin()).powi(2);
        let r_p = ((theta_i - theta_t).tan() / (theta_i + theta_t).tan()).powi(2);
        0.5 * (r_s + r_p)
    }

    /// Rayleigh phase function including sea-surface reflected paths
    pub fn rayleigh_phase(&self, geometry: &ViewGeometry) -> f64 {
        let cs = geometry.cos_sun_zenith();
        let ss = geometry.sun_zenith.to_radians().sin();
        let cv = geometry.cos_view_zenith();
        let sv = geometry.view_zenith.to_radians().sin();
        let cphi = geometry.cos_relative_azimuth();

        // Scattering angles of the direct (backward) and surface-reflected (forward) paths
        let cos_backward = (-cs * cv - ss * sv * cphi).clamp(-1.0, 1.0);
        let cos_forward = (cs * cv - ss * sv * cphi).clamp(-1.0, 1.0);

        let phase_backward = 0.75 * (1.0 + cos_backward * cos_backward);
        let phase_forward = 0.75 * (1.0 + cos_forward * cos_forward);

        let reflectance =
            self.fresnel_reflectance(geometry.sun_zenith) + self.params.view_fresnel_reflectance;
        phase_backward + reflectance * phase_forward
    }

    /// Rayleigh path radiance
    pub fn rayleigh_radiance(
        &self,
        esun: f64,
        optical_depth: &BandImage,
        phase: f64,
        cos_view_zenith: f64,
    ) -> BandImage {
        let factor = (esun * phase / (4.0 * PI * cos_view_zenith)) as f32;
        optical_depth.mapv(|tau| tau * factor)
    }

    /// Aerosol epsilon from the log-ratio of the two SWIR reference bands
    pub fn aerosol_epsilon(
        &self,
        short_radiance: &BandImage,
        short_esun: f64,
        long_radiance: &BandImage,
        long_esun: f64,
    ) -> BandImage {
        let span = self.params.aerosol_long_band.center_wavelength_nm()
            - self.params.aerosol_short_band.center_wavelength_nm();
        Zip::from(short_radiance)
            .and(long_radiance)
            .map_collect(|&short, &long| {
                let ratio_long = (long as f64 / long_esun).ln();
                let ratio_short = (short as f64 / short_esun).ln();
                ((ratio_long - ratio_short) / span) as f32
            })
    }

    /// Aerosol path radiance extrapolated from the long reference band
    pub fn aerosol_radiance(
        &self,
        long_radiance: &BandImage,
        long_esun: f64,
        band_esun: f64,
        epsilon: &BandImage,
        band: Band,
    ) -> BandImage {
        let relative_wavelength =
            band.center_wavelength_nm() / self.params.aerosol_long_band.center_wavelength_nm();
        let irradiance_ratio = band_esun / long_esun;
        Zip::from(long_radiance)
            .and(epsilon)
            .map_collect(|&radiance, &eps| {
                (radiance as f64 * irradiance_ratio * (-(eps as f64) * relative_wavelength).exp())
                    as f32
            })
    }

    /// Diffuse transmittance on the sensor path
    pub fn diffuse_transmittance(&self, optical_depth: &BandImage, cos_view_zenith: f64) -> BandImage {
        optical_depth.mapv(|tau| (-(tau as f64) / 2.0 / cos_view_zenith).exp() as f32)
    }

    /// Water-leaving reflectance from water-leaving radiance
    pub fn water_leaving_reflectance(
        &self,
        radiance: &BandImage,
        esun: f64,
        cos_sun_zenith: f64,
        distance: f64,
    ) -> BandImage {
        let factor = (PI * distance * distance / (esun * cos_sun_zenith)) as f32;
        radiance.mapv(|lw| lw * factor)
    }

    /// Keep pixels with positive coastal-aerosol reflectance and negative NDVI
    pub fn land_cloud_mask(
        &self,
        coastal_reflectance: &BandImage,
        nir: &BandImage,
        red: &BandImage,
    ) -> ValidityMask {
        Zip::from(coastal_reflectance)
            .and(nir)
            .and(red)
            .map_collect(|&rrs, &nir, &red| {
                let ndvi = (nir - red) / (nir + red);
                rrs.is_finite() && rrs > 0.0 && ndvi.is_finite() && ndvi < 0.0
            })
    }

    /// Correct a single scene
    pub fn correct(&self, scene: &Scene, elevation: &BandImage) -> WqResult<CorrectedScene> {
        log::debug!("Correcting scene {}", scene.id);

        let geometry = ViewGeometry::from_scene(scene)?;
        let cloud_percentage = scene.metadata.cloud_percentage.ok_or_else(|| {
            WqError::MissingMetadata {
                scene: scene.id.clone(),
                field: "cloud_percentage".to_string(),
            }
        })?;

        let mut esun = BTreeMap::new();
        for band in Band::ALL {
            let value = scene.metadata.solar_irradiance.get(&band).copied().ok_or_else(|| {
                WqError::MissingMetadata {
                    scene: scene.id.clone(),
                    field: format!("solar_irradiance_{}", band),
                }
            })?;
            esun.insert(band, value);
            scene.band(band)?;
        }

        let dims = scene.dim();
        if elevation.dim() != dims {
            return Err(WqError::GridMismatch(format!(
                "elevation {:?} does not match scene {} grid {:?}",
                elevation.dim(),
                scene.id,
                dims
            )));
        }

        let distance = self.earth_sun_distance(scene.timestamp.ordinal());
        let cos_sun = geometry.cos_sun_zenith();
        let cos_view = geometry.cos_view_zenith();
        let pressure = self.surface_pressure(elevation);
        let phase = self.rayleigh_phase(&geometry);
        log::debug!(
            "Scene {}: d={:.5} AU, Rayleigh phase={:.4}, airmass={:.3}",
            scene.id,
            distance,
            phase,
            geometry.airmass()
        );

        // Rayleigh-corrected radiance and Rayleigh depth for every input band
        let mut rayleigh_corrected = BTreeMap::new();
        let mut optical_depths = BTreeMap::new();
        for band in Band::ALL {
            let esun_b = esun[&band];
            let toa = self.toa_radiance(&self.toa_reflectance(scene.band(band)?), esun_b, cos_sun, distance);
            let ozone = self.ozone_transmittance(band, &geometry) as f32;
            let tau_r = self.rayleigh_optical_depth(&pressure, band);
            let rayleigh = self.rayleigh_radiance(esun_b, &tau_r, phase, cos_view);

            let corrected = Zip::from(&toa)
                .and(&rayleigh)
                .map_collect(|&lt, &lr| lt / ozone - lr);
            rayleigh_corrected.insert(band, corrected);
            optical_depths.insert(band, tau_r);
        }

        let short = self.params.aerosol_short_band;
        let long = self.params.aerosol_long_band;
        let epsilon = self.aerosol_epsilon(
            &rayleigh_corrected[&short],
            esun[&short],
            &rayleigh_corrected[&long],
            esun[&long],
        );

        let mut reflectance = BTreeMap::new();
        for band in Band::SURFACE {
            let aerosol = self.aerosol_radiance(
                &rayleigh_corrected[&long],
                esun[&long],
                esun[&band],
                &epsilon,
                band,
            );
            let transmittance = self.diffuse_transmittance(&optical_depths[&band], cos_view);
            let water_leaving = Zip::from(&rayleigh_corrected[&band])
                .and(&aerosol)
                .and(&transmittance)
                .map_collect(|&lrc, &la, &t| (lrc - la) / t);
            let rho_w = self.water_leaving_reflectance(&water_leaving, esun[&band], cos_sun, distance);
            let rrs = rho_w.mapv(|rho| rho / PI as f32);
            reflectance.insert(band, rrs);
        }

        let mask = self.land_cloud_mask(
            &reflectance[&Band::B1],
            scene.band(Band::B8A)?,
            scene.band(Band::B4)?,
        );
        log::debug!(
            "Scene {}: {} of {} pixels kept after land/cloud masking",
            scene.id,
            mask.iter().filter(|&&v| v).count(),
            mask.len()
        );

        Ok(CorrectedScene {
            id: scene.id.clone(),
            timestamp: scene.timestamp,
            cloud_percentage,
            transform: scene.transform,
            reflectance,
            mask,
        })
    }

    /// Correct every scene of a collection, skipping scenes that cannot be corrected
    pub fn correct_collection(
        &self,
        scenes: &SceneCollection,
        elevation: &dyn ElevationSource,
    ) -> Vec<CorrectedScene> {
        log::info!("Applying atmospheric correction to {} scenes", scenes.len());

        let correct_one = |scene: &Scene| -> Option<CorrectedScene> {
            match elevation
                .elevation_for(scene)
                .and_then(|dem| self.correct(scene, &dem))
            {
                Ok(corrected) => Some(corrected),
                Err(e) => {
                    log::warn!("Skipping scene {}: {}", scene.id, e);
                    None
                }
            }
        };

        #[cfg(feature = "parallel")]
        let corrected: Vec<CorrectedScene> = {
            use rayon::prelude::*;
            scenes.as_slice().par_iter().filter_map(correct_one).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let corrected: Vec<CorrectedScene> = scenes.iter().filter_map(correct_one).collect();

        log::info!(
            "Atmospheric correction completed: {} corrected, {} skipped",
            corrected.len(),
            scenes.len() - corrected.len()
        );
        corrected
    }
}

impl Default for AtmosphericCorrector {
    fn default() -> Self {
        Self::new()
    }
}
