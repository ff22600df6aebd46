//! GeoJSON training sites and study-area boundaries

use crate::core::extract::TrainingSite;
use crate::types::{LandCoverError, LandCoverResult};
use geo::{Geometry, MultiPolygon, Polygon};
use geojson::{Feature, GeoJson};
use serde_json::Value as JsonValue;
use std::path::Path;

fn features(geojson: GeoJson) -> Vec<Feature> {
    match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![Feature {
            bbox: None,
            geometry: Some(g),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    }
}

fn label_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse labeled training sites from GeoJSON text.
///
/// Each feature's `label_property` supplies its class; numbers are used as
/// their decimal text. Features lacking a geometry, a usable label or a
/// point/polygon geometry are skipped with a warning.
pub fn parse_training_sites(text: &str, label_property: &str) -> LandCoverResult<Vec<TrainingSite>> {
    let geojson: GeoJson = text.parse()?;
    let mut sites = Vec::new();
    let mut skipped = 0usize;

    for (i, feature) in features(geojson).into_iter().enumerate() {
        let Some(label) = feature.property(label_property).and_then(label_of) else {
            log::warn!("Feature {} has no usable '{}' property, skipped", i, label_property);
            skipped += 1;
            continue;
        };
        let Some(geometry) = feature.geometry else {
            log::warn!("Feature {} ({}) has no geometry, skipped", i, label);
            skipped += 1;
            continue;
        };
        let geometry = Geometry::<f64>::try_from(geometry)?;
        match geometry {
            Geometry::Point(_)
            | Geometry::MultiPoint(_)
            | Geometry::Polygon(_)
            | Geometry::MultiPolygon(_) => sites.push(TrainingSite { geometry, label }),
            other => {
                log::warn!("Feature {} ({}) has unsupported geometry {:?}, skipped", i, label, other);
                skipped += 1;
            }
        }
    }

    log::info!("Parsed {} training sites ({} skipped)", sites.len(), skipped);
    Ok(sites)
}

pub fn read_training_sites<P: AsRef<Path>>(
    path: P,
    label_property: &str,
) -> LandCoverResult<Vec<TrainingSite>> {
    log::info!("Reading training sites from {}", path.as_ref().display());
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_training_sites(&text, label_property)
}

/// Merge every polygon in a GeoJSON document into one study-area boundary.
pub fn parse_study_area(text: &str) -> LandCoverResult<Geometry<f64>> {
    let geojson: GeoJson = text.parse()?;
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for feature in features(geojson) {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        match Geometry::<f64>::try_from(geometry)? {
            Geometry::Polygon(p) => polygons.push(p),
            Geometry::MultiPolygon(mp) => polygons.extend(mp.0),
            other => log::warn!("Ignoring non-polygon study-area geometry {:?}", other),
        }
    }
    if polygons.is_empty() {
        return Err(LandCoverError::GeoJson(
            "study area contains no polygon".to_string(),
        ));
    }
    log::debug!("Study area made of {} polygons", polygons.len());
    Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
}

pub fn read_study_area<P: AsRef<Path>>(path: P) -> LandCoverResult<Geometry<f64>> {
    log::info!("Reading study area from {}", path.as_ref().display());
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_study_area(&text)
}
