use crate::types::{Band, BandImage, CorrectedScene, DailyComposite, ValidityMask, WqError, WqResult};
use chrono::{DateTime, NaiveDate, Utc};
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;

/// Merges same-day corrected scenes into daily composites
pub struct TemporalMosaicker;

impl TemporalMosaicker {
    pub fn new() -> Self {
        Self
    }

    /// Calendar date (UTC) a scene belongs to
    pub fn date_key(timestamp: &DateTime<Utc>) -> NaiveDate {
        timestamp.date_naive()
    }

    /// Band-wise mean of every group of scenes sharing a date key
    ///
    /// Scenes are reduced in scene-id order, so the same input set always
    /// yields bit-identical composites whatever order it arrives in. Only
    /// valid pixels contribute to the mean; a composite pixel is valid when
    /// at least one of its scenes is. The earliest acquisition of a date
    /// fixes the composite's grid and tags; scenes that do not fit that grid
    /// are dropped from the composite.
    pub fn mosaic(&self, scenes: &[CorrectedScene]) -> Vec<DailyComposite> {
        let mut groups: BTreeMap<NaiveDate, Vec<&CorrectedScene>> = BTreeMap::new();
        for scene in scenes {
            groups
                .entry(Self::date_key(&scene.timestamp))
                .or_default()
                .push(scene);
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.id.cmp(&b.id));
        }
        log::info!(
            "Mosaicking {} scenes into {} daily composites",
            scenes.len(),
            groups.len()
        );

        let groups: Vec<(NaiveDate, Vec<&CorrectedScene>)> = groups.into_iter().collect();

        #[cfg(feature = "parallel")]
        let composites: Vec<DailyComposite> = {
            use rayon::prelude::*;
            groups
                .par_iter()
                .filter_map(|(date, group)| self.reduce_group(*date, group))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let composites: Vec<DailyComposite> = groups
            .iter()
            .filter_map(|(date, group)| self.reduce_group(*date, group))
            .collect();

        composites
    }

    /// Earliest acquisition of a group, ties broken by scene id
    fn reference<'a>(group: &[&'a CorrectedScene]) -> Option<&'a CorrectedScene> {
        group
            .iter()
            .copied()
            .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
    }

    /// Check that a scene carries every surface band on the reference grid
    fn check_grid(scene: &CorrectedScene, reference: &CorrectedScene) -> WqResult<()> {
        let dims = reference.mask.dim();
        if scene.transform != reference.transform || scene.mask.dim() != dims {
            return Err(WqError::GridMismatch(format!(
                "scene {} does not share the grid of {}",
                scene.id, reference.id
            )));
        }
        for band in Band::SURFACE {
            let values = scene.reflectance.get(&band).ok_or_else(|| WqError::MissingBand {
                scene: scene.id.clone(),
                band,
            })?;
            if values.dim() != dims {
                return Err(WqError::GridMismatch(format!(
                    "band {} of scene {} is {:?}, expected {:?}",
                    band,
                    scene.id,
                    values.dim(),
                    dims
                )));
            }
        }
        Ok(())
    }

    fn reduce_group(&self, date: NaiveDate, group: &[&CorrectedScene]) -> Option<DailyComposite> {
        let reference = Self::reference(group)?;
        let dims = reference.mask.dim();

        let usable: Vec<&CorrectedScene> = group
            .iter()
            .copied()
            .filter(|scene| match Self::check_grid(scene, reference) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Leaving scene out of the {} composite: {}", date, e);
                    false
                }
            })
            .collect();
        if usable.is_empty() {
            return None;
        }

        let mut mask: ValidityMask = Array2::from_elem(dims, false);
        for scene in &usable {
            Zip::from(&mut mask).and(&scene.mask).for_each(|m, &v| *m |= v);
        }

        let mut reflectance = BTreeMap::new();
        for band in Band::SURFACE {
            let mut mean = Array2::<f64>::zeros(dims);
            let mut count = Array2::<u32>::zeros(dims);
            for scene in &usable {
                // Presence checked in check_grid
                let Some(values) = scene.reflectance.get(&band) else {
                    continue;
                };
                // Incremental mean keeps N copies of v exactly equal to v
                Zip::from(&mut mean)
                    .and(&mut count)
                    .and(values)
                    .and(&scene.mask)
                    .for_each(|m, k, &x, &valid| {
                        if valid {
                            *k += 1;
                            *m += (x as f64 - *m) / *k as f64;
                        }
                    });
            }

            let band_mean: BandImage = Zip::from(&mean)
                .and(&count)
                .map_collect(|&m, &k| if k > 0 { m as f32 } else { f32::NAN });
            reflectance.insert(band, band_mean);
        }

        log::debug!(
            "Composite {}: {} of {} scenes",
            date,
            usable.len(),
            group.len()
        );

        Some(DailyComposite {
            date,
            timestamp: date.and_time(chrono::NaiveTime::MIN).and_utc(),
            cloud_percentage: reference.cloud_percentage,
            transform: reference.transform,
            reflectance,
            mask,
            scene_count: usable.len(),
        })
    }
}

impl Default for TemporalMosaicker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;

    fn scene(id: &str, timestamp: &str, value: f32, cloud: f64) -> CorrectedScene {
        let reflectance = Band::SURFACE
            .iter()
            .map(|&b| (b, Array2::from_elem((3, 3), value)))
            .collect();
        CorrectedScene {
            id: id.to_string(),
            timestamp: DateTime::parse_from_rfc3339(timestamp).unwrap().with_timezone(&Utc),
            cloud_percentage: cloud,
            transform: GeoTransform::north_up(0.0, 0.0, 10.0),
            reflectance,
            mask: Array2::from_elem((3, 3), true),
        }
    }

    #[test]
    fn test_identical_scenes_give_exact_value() {
        let value = 0.0137f32;
        let scenes: Vec<CorrectedScene> = (0..7)
            .map(|i| scene(&format!("s{}", i), "2021-06-21T10:50:00Z", value, 5.0))
            .collect();

        let composites = TemporalMosaicker::new().mosaic(&scenes);
        assert_eq!(composites.len(), 1);
        assert_eq!(composites[0].scene_count, 7);
        for band in Band::SURFACE {
            assert!(composites[0].reflectance[&band].iter().all(|&v| v == value));
        }
    }

    #[test]
    fn test_groups_by_date_and_tags_midnight() {
        let scenes = vec![
            scene("b", "2021-06-21T10:50:00Z", 0.02, 30.0),
            scene("a", "2021-06-21T10:50:20Z", 0.04, 10.0),
            scene("c", "2021-06-24T10:40:00Z", 0.01, 2.0),
        ];

        let composites = TemporalMosaicker::new().mosaic(&scenes);
        assert_eq!(composites.len(), 2);
        assert_eq!(composites[0].date, NaiveDate::from_ymd_opt(2021, 6, 21).unwrap());
        assert_eq!(
            composites[0].timestamp,
            DateTime::parse_from_rfc3339("2021-06-21T00:00:00Z").unwrap().with_timezone(&Utc)
        );
        // Tags come from the earliest acquisition, not the first id
        assert_eq!(composites[0].cloud_percentage, 30.0);
        assert!((composites[0].reflectance[&Band::B2][[1, 1]] - 0.03).abs() < 1e-7);
        assert_eq!(composites[1].scene_count, 1);
    }

    #[test]
    fn test_order_independent() {
        let a = scene("a", "2021-06-21T10:50:00Z", 0.0123, 1.0);
        let b = scene("b", "2021-06-21T10:50:10Z", 0.0456, 1.0);
        let c = scene("c", "2021-06-21T10:50:20Z", 0.0789, 1.0);

        let mosaicker = TemporalMosaicker::new();
        let forward = mosaicker.mosaic(&[a.clone(), b.clone(), c.clone()]);
        let backward = mosaicker.mosaic(&[c, a, b]);
        let bits = |m: &DailyComposite| -> Vec<u32> {
            m.reflectance[&Band::B3].iter().map(|v| v.to_bits()).collect()
        };
        assert_eq!(bits(&forward[0]), bits(&backward[0]));
    }

    #[test]
    fn test_invalid_pixels_are_excluded_from_mean() {
        let a = scene("a", "2021-06-21T10:50:00Z", 0.02, 1.0);
        let mut b = scene("b", "2021-06-21T10:50:10Z", 0.08, 1.0);
        b.mask[[0, 0]] = false;
        let mut c = scene("c", "2021-06-21T10:50:20Z", 0.08, 1.0);
        c.mask.fill(false);
        let mut a_masked = a.clone();
        a_masked.mask[[2, 2]] = false;
        b.mask[[2, 2]] = false;

        let composite = &TemporalMosaicker::new().mosaic(&[a_masked, b, c])[0];
        assert!((composite.reflectance[&Band::B1][[0, 0]] - 0.02).abs() < 1e-7);
        assert!((composite.reflectance[&Band::B1][[1, 1]] - 0.05).abs() < 1e-7);
        assert!(!composite.mask[[2, 2]]);
        assert!(composite.reflectance[&Band::B1][[2, 2]].is_nan());
    }

    #[test]
    fn test_tag_tie_broken_by_id() {
        let scenes = vec![
            scene("b", "2021-06-21T10:50:00Z", 0.02, 30.0),
            scene("a", "2021-06-21T10:50:00Z", 0.04, 10.0),
        ];
        let composites = TemporalMosaicker::new().mosaic(&scenes);
        assert_eq!(composites[0].cloud_percentage, 10.0);
    }

    #[test]
    fn test_off_grid_scene_is_left_out() {
        let a = scene("a", "2021-06-21T10:50:00Z", 0.02, 1.0);
        let mut b = scene("b", "2021-06-21T10:50:10Z", 0.08, 1.0);
        b.transform = GeoTransform::north_up(40.0, 0.0, 10.0);
        let mut c = scene("c", "2021-06-21T10:50:20Z", 0.08, 1.0);
        c.reflectance.remove(&Band::B5);
        let d = scene("d", "2021-06-26T10:40:00Z", 0.01, 2.0);

        let composites = TemporalMosaicker::new().mosaic(&[a, b, c, d]);
        assert_eq!(composites.len(), 2);
        assert_eq!(composites[0].scene_count, 1);
        assert_eq!(composites[0].transform, GeoTransform::north_up(0.0, 0.0, 10.0));
        assert!(composites[0].reflectance[&Band::B3].iter().all(|&v| v == 0.02));
        assert_eq!(composites[1].scene_count, 1);
        assert!(TemporalMosaicker::new().mosaic(&[]).is_empty());
    }
}
