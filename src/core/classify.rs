use crate::core::tree::{DecisionTree, TreeNode};
use crate::parallel::{self, *};
use crate::types::{
    ClassCode, ClassLabelMapping, GeoTransform, LandCoverError, LandCoverResult, ReflectanceRaster,
    CLASS_NODATA,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Classification parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyParams {
    /// Rows per work unit; each chunk owns a disjoint band of output rows
    pub chunk_rows: usize,
}

impl Default for ClassifyParams {
    fn default() -> Self {
        Self { chunk_rows: 256 }
    }
}

/// Per-class share of a classified map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassArea {
    pub code: ClassCode,
    pub label: String,
    pub pixels: usize,
    /// Fraction of classified (non-no-data) pixels
    pub fraction: f64,
    /// Area in squared map units
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassStatistics {
    pub classes: Vec<ClassArea>,
    pub nodata_pixels: usize,
}

/// Single-band map of class codes, `CLASS_NODATA` where no class applies
#[derive(Debug, Clone)]
pub struct ClassifiedRaster {
    codes: Array2<ClassCode>,
    classes: ClassLabelMapping,
    geo_transform: GeoTransform,
}

impl ClassifiedRaster {
    pub fn new(
        codes: Array2<ClassCode>,
        classes: ClassLabelMapping,
        geo_transform: GeoTransform,
    ) -> LandCoverResult<Self> {
        if let Some(bad) = codes
            .iter()
            .find(|&&c| c != CLASS_NODATA && c as usize >= classes.len())
        {
            return Err(LandCoverError::InvalidRaster(format!(
                "class code {} outside mapping of {} classes",
                bad,
                classes.len()
            )));
        }
        Ok(Self {
            codes,
            classes,
            geo_transform,
        })
    }

    pub fn codes(&self) -> &Array2<ClassCode> {
        &self.codes
    }

    pub fn classes(&self) -> &ClassLabelMapping {
        &self.classes
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.geo_transform
    }

    pub fn rows(&self) -> usize {
        self.codes.nrows()
    }

    pub fn cols(&self) -> usize {
        self.codes.ncols()
    }

    /// Class code at a pixel, `None` for no-data or out-of-grid
    pub fn get(&self, row: usize, col: usize) -> Option<ClassCode> {
        self.codes
            .get((row, col))
            .copied()
            .filter(|&c| c != CLASS_NODATA)
    }

    pub fn label_at(&self, row: usize, col: usize) -> Option<&str> {
        self.get(row, col).and_then(|c| self.classes.label(c))
    }

    pub fn nodata_count(&self) -> usize {
        self.codes.iter().filter(|&&c| c == CLASS_NODATA).count()
    }

    /// Pixel counts, fractions and areas per class in code order.
    pub fn class_statistics(&self) -> ClassStatistics {
        let mut counts = vec![0usize; self.classes.len()];
        let mut nodata_pixels = 0;
        for &c in self.codes.iter() {
            match counts.get_mut(c as usize) {
                Some(n) if c != CLASS_NODATA => *n += 1,
                _ => nodata_pixels += 1,
            }
        }
        let classified: usize = counts.iter().sum();
        let pixel_area = self.geo_transform.pixel_area();

        let classes = self
            .classes
            .iter()
            .zip(counts)
            .map(|((code, label), pixels)| ClassArea {
                code,
                label: label.to_string(),
                pixels,
                fraction: if classified > 0 {
                    pixels as f64 / classified as f64
                } else {
                    0.0
                },
                area: pixels as f64 * pixel_area,
            })
            .collect();
        ClassStatistics {
            classes,
            nodata_pixels,
        }
    }
}

/// Applies a trained tree to every pixel of a corrected raster
pub struct TreeClassifier {
    params: ClassifyParams,
}

impl Default for TreeClassifier {
    fn default() -> Self {
        Self::new(ClassifyParams::default())
    }
}

impl TreeClassifier {
    pub fn new(params: ClassifyParams) -> Self {
        Self { params }
    }

    /// Classify every pixel. Band names must equal the tree's features, in order.
    pub fn classify(
        &self,
        raster: &ReflectanceRaster,
        tree: &DecisionTree,
    ) -> LandCoverResult<ClassifiedRaster> {
        tree.validate_features(raster.band_names())?;

        let (_, rows, cols) = raster.dim();
        log::info!(
            "Classifying {}x{} pixels with a {}-leaf tree",
            rows,
            cols,
            tree.leaf_count()
        );

        let data = raster.data();
        let root = tree.root();
        let chunks = parallel::row_chunks(rows, self.params.chunk_rows);
        log::debug!(
            "Processing {} chunks of up to {} rows",
            chunks.len(),
            self.params.chunk_rows
        );

        let classified: Vec<Vec<ClassCode>> = chunks
            .into_par_iter()
            .map(|(start, len)| {
                let mut out = Vec::with_capacity(len * cols);
                for row in start..start + len {
                    for col in 0..cols {
                        let leaf = root.walk(|f| {
                            let v = data[[f, row, col]];
                            (!raster.is_nodata(v)).then_some(v)
                        });
                        out.push(match leaf {
                            Some(TreeNode::Leaf { class, .. }) => *class,
                            _ => CLASS_NODATA,
                        });
                    }
                }
                out
            })
            .collect();

        let flat: Vec<ClassCode> = classified.into_iter().flatten().collect();
        let codes = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| LandCoverError::Processing(format!("Shape error: {}", e)))?;
        let result = ClassifiedRaster::new(codes, tree.classes().clone(), *raster.geo_transform())?;

        log::info!(
            "Classification complete: {} no-data pixels",
            result.nodata_count()
        );
        Ok(result)
    }
}
