use crate::core::dataset::TrainingSet;
use crate::core::mask::{area_contains, pixel_window};
use crate::types::{ClassLabelMapping, LandCoverError, LandCoverResult, ReflectanceRaster};
use geo::{BoundingRect, Geometry, Point};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A ground-truth geometry with its land-cover label
#[derive(Debug, Clone)]
pub struct TrainingSite {
    pub geometry: Geometry<f64>,
    pub label: String,
}

impl TrainingSite {
    pub fn new(geometry: impl Into<Geometry<f64>>, label: impl Into<String>) -> Self {
        Self {
            geometry: geometry.into(),
            label: label.into(),
        }
    }
}

/// Training sample extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractParams {
    /// Feature property holding the class label in training files
    pub label_property: String,
    /// Keep at most this many rows per class (first encountered win)
    pub max_rows_per_class: Option<usize>,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            label_property: "class".to_string(),
            max_rows_per_class: None,
        }
    }
}

/// Samples a corrected raster at labeled training sites
pub struct FeatureExtractor {
    params: ExtractParams,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(ExtractParams::default())
    }
}

impl FeatureExtractor {
    pub fn new(params: ExtractParams) -> Self {
        Self { params }
    }

    /// Pair every covered pixel's band vector with its site's label.
    ///
    /// Polygon sites contribute one row per pixel whose center lies inside the
    /// polygon, point sites one row for the pixel containing the point. Rows
    /// with a no-data band are dropped. The class mapping is built from the
    /// surviving rows only.
    pub fn extract(
        &self,
        raster: &ReflectanceRaster,
        sites: &[TrainingSite],
    ) -> LandCoverResult<TrainingSet> {
        log::info!("Extracting training samples from {} sites", sites.len());

        let bands = raster.band_count();
        let mut values: Vec<f32> = Vec::new();
        let mut row_labels: Vec<&str> = Vec::new();
        let mut per_label: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dropped = 0usize;
        let mut capped = 0usize;

        for (i, site) in sites.iter().enumerate() {
            let pixels = Self::covered_pixels(raster, &site.geometry);
            if pixels.is_empty() {
                log::warn!("Training site {} ({}) covers no raster pixel", i, site.label);
                continue;
            }
            for (row, col) in pixels {
                match raster.pixel(row, col) {
                    Some(pixel) if !raster.pixel_has_nodata(row, col) => {
                        let taken = per_label.entry(site.label.as_str()).or_insert(0);
                        if self.params.max_rows_per_class.is_some_and(|max| *taken >= max) {
                            capped += 1;
                            continue;
                        }
                        *taken += 1;
                        values.extend(pixel.iter().copied());
                        row_labels.push(site.label.as_str());
                    }
                    _ => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            log::warn!("Dropped {} training pixels with no-data bands", dropped);
        }
        if capped > 0 {
            log::info!("Skipped {} pixels over the per-class row limit", capped);
        }
        if row_labels.is_empty() {
            return Err(LandCoverError::EmptyTrainingSet(format!(
                "no valid pixels under {} training sites ({} dropped as no-data)",
                sites.len(),
                dropped
            )));
        }

        let classes = ClassLabelMapping::from_labels(row_labels.iter().copied())?;
        if classes.len() < 2 {
            return Err(LandCoverError::EmptyTrainingSet(format!(
                "only {} distinct class label(s) remain: {:?}",
                classes.len(),
                classes.labels()
            )));
        }
        let codes = row_labels
            .iter()
            .map(|l| {
                classes.code(l).ok_or_else(|| {
                    LandCoverError::Processing(format!("label {} missing from mapping", l))
                })
            })
            .collect::<LandCoverResult<Vec<_>>>()?;

        let features = Array2::from_shape_vec((codes.len(), bands), values)
            .map_err(|e| LandCoverError::Processing(format!("Shape error: {}", e)))?;
        let set = TrainingSet::new(features, codes, classes, raster.band_names().to_vec())?;

        log::info!(
            "Extracted {} training rows over {} classes",
            set.len(),
            set.classes().len()
        );
        for ((_, label), count) in set.classes().iter().zip(set.class_counts()) {
            log::debug!("  {}: {} rows", label, count);
        }
        for (name, (lo, hi)) in set.feature_names().iter().zip(set.feature_stats()) {
            log::debug!("  {} reflectance range: {:.4} to {:.4}", name, lo, hi);
        }
        Ok(set)
    }

    /// Pixels (row, col) covered by a site geometry, in row-major order per part
    fn covered_pixels(raster: &ReflectanceRaster, geometry: &Geometry<f64>) -> Vec<(usize, usize)> {
        match geometry {
            Geometry::Point(p) => Self::point_pixel(raster, p).into_iter().collect(),
            Geometry::MultiPoint(mp) => mp.iter().filter_map(|p| Self::point_pixel(raster, p)).collect(),
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) => {
                let Some(rect) = geometry.bounding_rect() else {
                    return Vec::new();
                };
                let transform = raster.geo_transform();
                let Some((r0, c0, rows, cols)) =
                    pixel_window(transform, raster.rows(), raster.cols(), &rect)
                else {
                    return Vec::new();
                };
                let mut pixels = Vec::new();
                for row in r0..r0 + rows {
                    for col in c0..c0 + cols {
                        let (x, y) = transform.pixel_center(row, col);
                        if area_contains(geometry, x, y) {
                            pixels.push((row, col));
                        }
                    }
                }
                pixels
            }
            other => {
                log::warn!("Unsupported training geometry type: {:?}", other);
                Vec::new()
            }
        }
    }

    fn point_pixel(raster: &ReflectanceRaster, point: &Point<f64>) -> Option<(usize, usize)> {
        raster.locate(point.x(), point.y())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, Raster};
    use geo::{polygon, MultiPoint, Rect};
    use ndarray::Array3;

    /// 4x4 two-band raster over map square (0,0)-(4,4); value = 10*row + col (+100 for band 1)
    fn raster() -> ReflectanceRaster {
        let data = Array3::from_shape_fn((2, 4, 4), |(b, r, c)| (b * 100 + r * 10 + c) as f32);
        Raster::new(data, vec!["red".to_string(), "nir".to_string()])
            .unwrap()
            .with_geo_transform(GeoTransform::north_up(0.0, 4.0, 1.0, -1.0))
    }

    #[test]
    fn test_single_pixel_polygon_round_trip() {
        let r = raster();
        let site = TrainingSite::new(Rect::new((1.0, 2.0), (2.0, 3.0)), "urban");
        let point = TrainingSite::new(Point::new(3.5, 0.5), "water");

        let set = FeatureExtractor::default().extract(&r, &[site, point]).unwrap();
        assert_eq!(set.len(), 2);
        // map (1.5, 2.5) is row 1, col 1
        assert_eq!(set.row(0).to_vec(), r.pixel(1, 1).unwrap().to_vec());
        assert_eq!(set.classes().label(set.labels()[0]), Some("urban"));
        assert_eq!(set.row(1).to_vec(), vec![33.0, 133.0]);
        assert_eq!(set.classes().label(set.labels()[1]), Some("water"));
    }

    #[test]
    fn test_polygon_rows_keep_their_labels() {
        let r = raster();
        let veg = TrainingSite::new(
            polygon![(x: 0.0, y: 2.0), (x: 2.0, y: 2.0), (x: 2.0, y: 4.0), (x: 0.0, y: 4.0)],
            "vegetation",
        );
        let water = TrainingSite::new(
            MultiPoint::from(vec![(2.5, 0.5), (3.5, 0.5), (10.0, 10.0)]),
            "water",
        );
        let set = FeatureExtractor::default().extract(&r, &[veg, water]).unwrap();

        assert_eq!(set.len(), 6);
        assert_eq!(set.class_counts(), vec![4, 2]);
        for i in 0..set.len() {
            let red = set.row(i)[0];
            let label = set.classes().label(set.labels()[i]).unwrap();
            // vegetation covers rows 0-1 / cols 0-1, water sits on row 3
            if label == "vegetation" {
                assert!(red < 20.0 && (red as usize % 10) < 2);
            } else {
                assert!(red >= 30.0);
            }
        }
    }

    #[test]
    fn test_rows_per_class_capped() {
        let r = raster();
        let everything = TrainingSite::new(Rect::new((0.0, 0.0), (4.0, 2.0)), "low");
        let top = TrainingSite::new(Rect::new((0.0, 2.0), (4.0, 4.0)), "high");
        let extractor = FeatureExtractor::new(ExtractParams {
            max_rows_per_class: Some(3),
            ..ExtractParams::default()
        });
        let set = extractor.extract(&r, &[everything, top]).unwrap();
        assert_eq!(set.class_counts(), vec![3, 3]);
        // first rows in row-major order are kept
        assert_eq!(set.row(0)[0], 20.0);
    }

    #[test]
    fn test_nodata_rows_dropped() {
        let mut data = Array3::from_elem((2, 2, 2), 5.0f32);
        data[[1, 0, 0]] = f32::NAN;
        let r = Raster::new(data, vec!["red".to_string(), "nir".to_string()])
            .unwrap()
            .with_geo_transform(GeoTransform::north_up(0.0, 2.0, 1.0, -1.0));
        let sites = vec![
            TrainingSite::new(Point::new(0.5, 1.5), "a"),
            TrainingSite::new(Point::new(1.5, 1.5), "a"),
            TrainingSite::new(Point::new(1.5, 0.5), "b"),
        ];
        let set = FeatureExtractor::default().extract(&r, &sites).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.features().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_empty_or_single_class_fails() {
        let r = raster();
        let outside = vec![TrainingSite::new(Point::new(50.0, 50.0), "a")];
        assert!(matches!(
            FeatureExtractor::default().extract(&r, &outside),
            Err(LandCoverError::EmptyTrainingSet(_))
        ));

        let one_class = vec![
            TrainingSite::new(Point::new(0.5, 0.5), "a"),
            TrainingSite::new(Point::new(1.5, 0.5), "a"),
        ];
        assert!(matches!(
            FeatureExtractor::default().extract(&r, &one_class),
            Err(LandCoverError::EmptyTrainingSet(_))
        ));
    }
}
