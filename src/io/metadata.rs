//! Landsat Collection 2 Level-2 MTL (XML) metadata

use crate::core::reflectance::{ReflectanceParams, LANDSAT_C2_VALID_MAX, LANDSAT_C2_VALID_MIN};
use crate::io::scene::BandSpec;
use crate::types::{LandCoverError, LandCoverResult};
use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

const PRODUCT_CONTENTS: &str = "PRODUCT_CONTENTS";
const IMAGE_ATTRIBUTES: &str = "IMAGE_ATTRIBUTES";
const SURFACE_REFLECTANCE: &str = "LEVEL2_SURFACE_REFLECTANCE_PARAMETERS";

/// Scene-level metadata needed to calibrate a Level-2 product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneMetadata {
    pub product_id: String,
    pub spacecraft: String,
    pub acquisition_date: NaiveDate,
    pub cloud_cover: Option<f64>,
    /// Band number to file name
    pub band_files: BTreeMap<u8, String>,
    /// Band number to (multiplicative, additive) reflectance rescaling
    pub reflectance_rescaling: BTreeMap<u8, (f64, f64)>,
}

impl SceneMetadata {
    pub fn from_file<P: AsRef<Path>>(path: P) -> LandCoverResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::info!("Reading scene metadata from {}", path.as_ref().display());
        Self::from_xml(&content)
    }

    /// Parse the MTL XML document.
    ///
    /// Each field is read from its own group. Level-1 groups repeat the product
    /// id and the rescaling keys with top-of-atmosphere values, so only
    /// `PRODUCT_CONTENTS`, `IMAGE_ATTRIBUTES` and
    /// `LEVEL2_SURFACE_REFLECTANCE_PARAMETERS` are consulted.
    pub fn from_xml(xml: &str) -> LandCoverResult<Self> {
        let groups = group_elements(xml)?;
        let empty = BTreeMap::new();
        let group = |name: &str| groups.get(name).unwrap_or(&empty);
        let contents = group(PRODUCT_CONTENTS);
        let attributes = group(IMAGE_ATTRIBUTES);
        let surface = group(SURFACE_REFLECTANCE);

        let required = |fields: &BTreeMap<String, String>, section: &str, key: &str| {
            fields.get(key).cloned().ok_or_else(|| {
                LandCoverError::XmlParsing(format!("missing element <{}> in <{}>", key, section))
            })
        };

        let product_id = required(contents, PRODUCT_CONTENTS, "LANDSAT_PRODUCT_ID")?;
        let spacecraft = required(attributes, IMAGE_ATTRIBUTES, "SPACECRAFT_ID")?;
        let date = required(attributes, IMAGE_ATTRIBUTES, "DATE_ACQUIRED")?;
        let acquisition_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
            LandCoverError::XmlParsing(format!("invalid DATE_ACQUIRED '{}': {}", date, e))
        })?;
        let cloud_cover = attributes.get("CLOUD_COVER").and_then(|v| v.parse().ok());

        let band_files = contents
            .iter()
            .filter_map(|(key, value)| band_suffix(key, "FILE_NAME_BAND_").map(|b| (b, value.clone())))
            .collect::<BTreeMap<_, _>>();

        let mut mult = BTreeMap::new();
        let mut add = BTreeMap::new();
        for (key, value) in surface {
            if let Some(band) = band_suffix(key, "REFLECTANCE_MULT_BAND_") {
                mult.insert(band, parse_number(key, value)?);
            } else if let Some(band) = band_suffix(key, "REFLECTANCE_ADD_BAND_") {
                add.insert(band, parse_number(key, value)?);
            }
        }
        let reflectance_rescaling = mult
            .into_iter()
            .filter_map(|(band, m)| add.get(&band).map(|&a| (band, (m, a))))
            .collect::<BTreeMap<_, _>>();

        log::debug!(
            "{} ({}, {}): {} band files, {} rescaled bands",
            product_id,
            spacecraft,
            acquisition_date,
            band_files.len(),
            reflectance_rescaling.len()
        );

        Ok(Self {
            product_id,
            spacecraft,
            acquisition_date,
            cloud_cover,
            band_files,
            reflectance_rescaling,
        })
    }

    /// Calibration parameters for each requested band, in order.
    pub fn reflectance_params(&self, bands: &[BandSpec]) -> LandCoverResult<Vec<ReflectanceParams>> {
        bands
            .iter()
            .map(|spec| {
                let (scale, offset) =
                    self.reflectance_rescaling.get(&spec.number).ok_or_else(|| {
                        LandCoverError::XmlParsing(format!(
                            "no REFLECTANCE_MULT/ADD for band {} ({})",
                            spec.number, spec.name
                        ))
                    })?;
                let params = ReflectanceParams {
                    valid_min: LANDSAT_C2_VALID_MIN,
                    valid_max: LANDSAT_C2_VALID_MAX,
                    scale: *scale,
                    offset: *offset,
                };
                params.validate()?;
                Ok(params)
            })
            .collect()
    }
}

/// Leaf element text grouped by the top-level group it sits in (the root's child)
fn group_elements(xml: &str) -> LandCoverResult<BTreeMap<String, BTreeMap<String, String>>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut groups: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::Text(ref e)) => {
                // leaves directly under the root have no group
                if let [_, group, .., tag] = path.as_slice() {
                    let text = e
                        .unescape()
                        .map_err(|err| LandCoverError::XmlParsing(format!("in <{}>: {}", tag, err)))?;
                    groups
                        .entry(group.clone())
                        .or_default()
                        .insert(tag.clone(), text.trim().to_string());
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LandCoverError::XmlParsing(format!(
                    "XML parsing error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if !path.is_empty() {
        return Err(LandCoverError::XmlParsing("unexpected end of document".to_string()));
    }
    Ok(groups)
}

fn band_suffix(key: &str, prefix: &str) -> Option<u8> {
    key.strip_prefix(prefix)?.parse().ok()
}

fn parse_number(key: &str, value: &str) -> LandCoverResult<f64> {
    value
        .parse()
        .map_err(|_| LandCoverError::XmlParsing(format!("{} is not a number: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<LANDSAT_METADATA_FILE>
  <PRODUCT_CONTENTS>
    <LANDSAT_PRODUCT_ID>LC08_L2SP_042034_20210601_20210608_02_T1</LANDSAT_PRODUCT_ID>
    <FILE_NAME_BAND_4>LC08_L2SP_042034_20210601_20210608_02_T1_SR_B4.TIF</FILE_NAME_BAND_4>
    <FILE_NAME_BAND_5>LC08_L2SP_042034_20210601_20210608_02_T1_SR_B5.TIF</FILE_NAME_BAND_5>
  </PRODUCT_CONTENTS>
  <IMAGE_ATTRIBUTES>
    <SPACECRAFT_ID>LANDSAT_8</SPACECRAFT_ID>
    <DATE_ACQUIRED>2021-06-01</DATE_ACQUIRED>
    <CLOUD_COVER>0.05</CLOUD_COVER>
  </IMAGE_ATTRIBUTES>
  <LEVEL2_SURFACE_REFLECTANCE_PARAMETERS>
    <REFLECTANCE_MULT_BAND_4>2.75E-05</REFLECTANCE_MULT_BAND_4>
    <REFLECTANCE_ADD_BAND_4>-0.200000</REFLECTANCE_ADD_BAND_4>
    <REFLECTANCE_MULT_BAND_5>2.75E-05</REFLECTANCE_MULT_BAND_5>
    <REFLECTANCE_ADD_BAND_5>-0.200000</REFLECTANCE_ADD_BAND_5>
  </LEVEL2_SURFACE_REFLECTANCE_PARAMETERS>
  <LEVEL1_PROCESSING_RECORD>
    <LANDSAT_PRODUCT_ID>LC08_L1TP_042034_20210601_20210608_02_T1</LANDSAT_PRODUCT_ID>
    <FILE_NAME_BAND_4>LC08_L1TP_042034_20210601_20210608_02_T1_B4.TIF</FILE_NAME_BAND_4>
  </LEVEL1_PROCESSING_RECORD>
  <LEVEL1_RADIOMETRIC_RESCALING>
    <REFLECTANCE_MULT_BAND_4>2.0000E-05</REFLECTANCE_MULT_BAND_4>
    <REFLECTANCE_ADD_BAND_4>-0.100000</REFLECTANCE_ADD_BAND_4>
    <REFLECTANCE_MULT_BAND_5>2.0000E-05</REFLECTANCE_MULT_BAND_5>
    <REFLECTANCE_ADD_BAND_5>-0.100000</REFLECTANCE_ADD_BAND_5>
  </LEVEL1_RADIOMETRIC_RESCALING>
</LANDSAT_METADATA_FILE>
"#;

    #[test]
    fn test_parse_mtl() {
        let meta = SceneMetadata::from_xml(MTL).unwrap();
        assert_eq!(meta.spacecraft, "LANDSAT_8");
        assert_eq!(meta.acquisition_date, NaiveDate::from_ymd_opt(2021, 6, 1).unwrap());
        assert_eq!(meta.cloud_cover, Some(0.05));
        assert!(meta.band_files[&4].ends_with("_SR_B4.TIF"));
        assert_eq!(meta.reflectance_rescaling[&5], (2.75e-5, -0.2));
    }

    #[test]
    fn test_level1_groups_do_not_override_surface_reflectance() {
        let meta = SceneMetadata::from_xml(MTL).unwrap();
        assert_eq!(meta.product_id, "LC08_L2SP_042034_20210601_20210608_02_T1");
        assert_eq!(meta.reflectance_rescaling[&4], (2.75e-5, -0.2));
        assert_eq!(meta.band_files[&4], "LC08_L2SP_042034_20210601_20210608_02_T1_SR_B4.TIF");

        let params = meta.reflectance_params(&[BandSpec::new("red", 4)]).unwrap();
        assert_eq!((params[0].scale, params[0].offset), (2.75e-5, -0.2));

        // without the Level-2 group the Level-1 factors must not be picked up
        let start = MTL.find("  <LEVEL2_SURFACE_REFLECTANCE_PARAMETERS>").unwrap();
        let end = MTL.find("  <LEVEL1_PROCESSING_RECORD>").unwrap();
        let level1_only = format!("{}{}", &MTL[..start], &MTL[end..]);
        let meta = SceneMetadata::from_xml(&level1_only).unwrap();
        assert!(meta.reflectance_rescaling.is_empty());
    }

    #[test]
    fn test_reflectance_params_follow_band_order() {
        let meta = SceneMetadata::from_xml(MTL).unwrap();
        let bands = vec![BandSpec::new("nir", 5), BandSpec::new("red", 4)];
        let params = meta.reflectance_params(&bands).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].valid_min, LANDSAT_C2_VALID_MIN);
        assert_eq!(params[1].scale, 2.75e-5);

        let missing = vec![BandSpec::new("blue", 2)];
        assert!(matches!(
            meta.reflectance_params(&missing),
            Err(LandCoverError::XmlParsing(_))
        ));
    }

    #[test]
    fn test_missing_or_malformed() {
        let no_date = MTL.replace("<DATE_ACQUIRED>2021-06-01</DATE_ACQUIRED>", "");
        assert!(matches!(
            SceneMetadata::from_xml(&no_date),
            Err(LandCoverError::XmlParsing(_))
        ));

        let bad_number = MTL.replace("2.75E-05</REFLECTANCE_MULT_BAND_4>", "abc</REFLECTANCE_MULT_BAND_4>");
        assert!(SceneMetadata::from_xml(&bad_number).is_err());

        assert!(SceneMetadata::from_xml("<LANDSAT_METADATA_FILE><A>1</B>").is_err());
    }
}
