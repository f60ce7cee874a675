//! Sentinel-2 L1C product and tile metadata (MTD_MSIL1C.xml / MTD_TL.xml)

use crate::types::{Band, SceneMetadata, WqError, WqResult};
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Band whose mean viewing angles stand in for the whole tile
const VIEWING_ANGLE_BAND_ID: u8 = 4;

#[derive(Debug, Deserialize)]
struct ProductRoot {
    #[serde(rename = "n1:General_Info", alias = "General_Info")]
    general_info: ProductGeneralInfo,
    #[serde(rename = "n1:Quality_Indicators_Info", alias = "Quality_Indicators_Info", default)]
    quality: Option<ProductQuality>,
}

#[derive(Debug, Deserialize)]
struct ProductGeneralInfo {
    #[serde(rename = "Product_Image_Characteristics")]
    image_characteristics: ImageCharacteristics,
}

#[derive(Debug, Deserialize)]
struct ImageCharacteristics {
    #[serde(rename = "Reflectance_Conversion")]
    reflectance_conversion: ReflectanceConversion,
}

#[derive(Debug, Deserialize)]
struct ReflectanceConversion {
    #[serde(rename = "Solar_Irradiance_List")]
    solar_irradiance_list: SolarIrradianceList,
}

#[derive(Debug, Deserialize)]
struct SolarIrradianceList {
    #[serde(rename = "SOLAR_IRRADIANCE", default)]
    values: Vec<SolarIrradiance>,
}

#[derive(Debug, Deserialize)]
struct SolarIrradiance {
    #[serde(rename = "@bandId")]
    band_id: u8,
    #[serde(rename = "$text")]
    value: f64,
}

#[derive(Debug, Deserialize)]
struct ProductQuality {
    #[serde(rename = "Cloud_Coverage_Assessment", default)]
    cloud_coverage: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TileRoot {
    #[serde(rename = "n1:General_Info", alias = "General_Info")]
    general_info: TileGeneralInfo,
    #[serde(rename = "n1:Geometric_Info", alias = "Geometric_Info")]
    geometric_info: GeometricInfo,
    #[serde(rename = "n1:Quality_Indicators_Info", alias = "Quality_Indicators_Info", default)]
    quality: Option<TileQuality>,
}

/// Text content of an element that also carries attributes
#[derive(Debug, Deserialize)]
struct Text<T> {
    #[serde(rename = "$text")]
    value: T,
}

#[derive(Debug, Deserialize)]
struct TileGeneralInfo {
    #[serde(rename = "TILE_ID")]
    tile_id: Text<String>,
    #[serde(rename = "SENSING_TIME", default)]
    sensing_time: Option<Text<String>>,
}

#[derive(Debug, Deserialize)]
struct GeometricInfo {
    #[serde(rename = "Tile_Angles")]
    tile_angles: TileAngles,
}

#[derive(Debug, Deserialize)]
struct TileAngles {
    #[serde(rename = "Mean_Sun_Angle", default)]
    mean_sun_angle: Option<AnglePair>,
    #[serde(rename = "Mean_Viewing_Incidence_Angle_List", default)]
    mean_viewing: Option<ViewingAngleList>,
}

#[derive(Debug, Deserialize)]
struct AnglePair {
    #[serde(rename = "ZENITH_ANGLE")]
    zenith: Text<f64>,
    #[serde(rename = "AZIMUTH_ANGLE")]
    azimuth: Text<f64>,
}

#[derive(Debug, Deserialize)]
struct ViewingAngleList {
    #[serde(rename = "Mean_Viewing_Incidence_Angle", default)]
    angles: Vec<ViewingAngle>,
}

#[derive(Debug, Deserialize)]
struct ViewingAngle {
    #[serde(rename = "@bandId")]
    band_id: u8,
    #[serde(rename = "ZENITH_ANGLE")]
    zenith: Text<f64>,
    #[serde(rename = "AZIMUTH_ANGLE")]
    azimuth: Text<f64>,
}

#[derive(Debug, Deserialize)]
struct TileQuality {
    #[serde(rename = "Image_Content_QI", default)]
    image_content: Option<ImageContentQi>,
}

#[derive(Debug, Deserialize)]
struct ImageContentQi {
    #[serde(rename = "CLOUDY_PIXEL_PERCENTAGE", default)]
    cloudy_pixel_percentage: Option<f64>,
}

/// Product-level metadata relevant to atmospheric correction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductMetadata {
    pub solar_irradiance: BTreeMap<Band, f64>,
    pub cloud_coverage: Option<f64>,
}

/// Tile-level acquisition geometry and cloud statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileMetadata {
    pub tile_id: String,
    pub sensing_time: Option<DateTime<Utc>>,
    pub sun_zenith: Option<f64>,
    pub sun_azimuth: Option<f64>,
    pub view_zenith: Option<f64>,
    pub view_azimuth: Option<f64>,
    pub cloudy_pixel_percentage: Option<f64>,
}

/// Parse MTD_MSIL1C.xml
pub fn parse_product_metadata(xml: &str) -> WqResult<ProductMetadata> {
    let root: ProductRoot =
        from_str(xml).map_err(|e| WqError::XmlParsing(format!("product metadata: {}", e)))?;

    let solar_irradiance = root
        .general_info
        .image_characteristics
        .reflectance_conversion
        .solar_irradiance_list
        .values
        .into_iter()
        .filter_map(|s| Band::from_s2_band_id(s.band_id).map(|band| (band, s.value)))
        .collect::<BTreeMap<_, _>>();
    log::debug!("Parsed solar irradiance for {} bands", solar_irradiance.len());

    Ok(ProductMetadata {
        solar_irradiance,
        cloud_coverage: root.quality.and_then(|q| q.cloud_coverage),
    })
}

/// Parse MTD_TL.xml
pub fn parse_tile_metadata(xml: &str) -> WqResult<TileMetadata> {
    let root: TileRoot =
        from_str(xml).map_err(|e| WqError::XmlParsing(format!("tile metadata: {}", e)))?;

    let sensing_time = match root.general_info.sensing_time.map(|t| t.value) {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(s.trim())
                .map_err(|e| WqError::XmlParsing(format!("invalid SENSING_TIME '{}': {}", s, e)))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let angles = root.geometric_info.tile_angles;
    let viewing = angles
        .mean_viewing
        .and_then(|list| list.angles.into_iter().find(|a| a.band_id == VIEWING_ANGLE_BAND_ID));

    Ok(TileMetadata {
        tile_id: root.general_info.tile_id.value.trim().to_string(),
        sensing_time,
        sun_zenith: angles.mean_sun_angle.as_ref().map(|a| a.zenith.value),
        sun_azimuth: angles.mean_sun_angle.as_ref().map(|a| a.azimuth.value),
        view_zenith: viewing.as_ref().map(|a| a.zenith.value),
        view_azimuth: viewing.as_ref().map(|a| a.azimuth.value),
        cloudy_pixel_percentage: root
            .quality
            .and_then(|q| q.image_content)
            .and_then(|c| c.cloudy_pixel_percentage),
    })
}

/// Combine product and tile metadata; the tile's cloud percentage wins
pub fn scene_metadata(product: &ProductMetadata, tile: &TileMetadata) -> SceneMetadata {
    SceneMetadata {
        sun_zenith: tile.sun_zenith,
        sun_azimuth: tile.sun_azimuth,
        sat_zenith: tile.view_zenith,
        sat_azimuth: tile.view_azimuth,
        solar_irradiance: product.solar_irradiance.clone(),
        cloud_percentage: tile.cloudy_pixel_percentage.or(product.cloud_coverage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:General_Info>
    <TILE_ID metadataLevel="Brief">S2A_OPER_MSI_L1C_TL_VGS2_20210621T140306_A031338_T32VNM_N03.00</TILE_ID>
    <SENSING_TIME metadataLevel="Standard">2021-06-21T10:56:21.024Z</SENSING_TIME>
  </n1:General_Info>
  <n1:Geometric_Info>
    <Tile_Angles>
      <Mean_Sun_Angle>
        <ZENITH_ANGLE unit="deg">37.3</ZENITH_ANGLE>
        <AZIMUTH_ANGLE unit="deg">171.2</AZIMUTH_ANGLE>
      </Mean_Sun_Angle>
      <Mean_Viewing_Incidence_Angle_List>
        <Mean_Viewing_Incidence_Angle bandId="3">
          <ZENITH_ANGLE unit="deg">4.1</ZENITH_ANGLE>
          <AZIMUTH_ANGLE unit="deg">101.0</AZIMUTH_ANGLE>
        </Mean_Viewing_Incidence_Angle>
        <Mean_Viewing_Incidence_Angle bandId="4">
          <ZENITH_ANGLE unit="deg">4.2</ZENITH_ANGLE>
          <AZIMUTH_ANGLE unit="deg">102.5</AZIMUTH_ANGLE>
        </Mean_Viewing_Incidence_Angle>
      </Mean_Viewing_Incidence_Angle_List>
    </Tile_Angles>
  </n1:Geometric_Info>
  <n1:Quality_Indicators_Info metadataLevel="Standard">
    <Image_Content_QI>
      <CLOUDY_PIXEL_PERCENTAGE>8.41</CLOUDY_PIXEL_PERCENTAGE>
    </Image_Content_QI>
  </n1:Quality_Indicators_Info>
</n1:Level-1C_Tile_ID>"#;

    #[test]
    fn test_tile_metadata() {
        let tile = parse_tile_metadata(TILE_XML).unwrap();
        assert!(tile.tile_id.ends_with("T32VNM_N03.00"));
        assert_eq!(tile.sun_zenith, Some(37.3));
        assert_eq!(tile.sun_azimuth, Some(171.2));
        assert_eq!(tile.view_zenith, Some(4.2));
        assert_eq!(tile.view_azimuth, Some(102.5));
        assert_eq!(tile.cloudy_pixel_percentage, Some(8.41));
        assert_eq!(
            tile.sensing_time.map(|t| t.timestamp()),
            Some(DateTime::parse_from_rfc3339("2021-06-21T10:56:21Z").unwrap().timestamp())
        );
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(matches!(
            parse_tile_metadata("<n1:Level-1C_Tile_ID><oops"),
            Err(WqError::XmlParsing(_))
        ));
    }
}
