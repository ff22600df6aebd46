//! Labeled feature vectors used to train and assess trees

use crate::types::{ClassCode, ClassLabelMapping, LandCoverError, LandCoverResult};
use ndarray::{Array2, ArrayView1};

/// Training (or validation) samples: one row per pixel, one column per band.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    features: Array2<f32>,
    labels: Vec<ClassCode>,
    classes: ClassLabelMapping,
    feature_names: Vec<String>,
}

impl TrainingSet {
    pub fn new(
        features: Array2<f32>,
        labels: Vec<ClassCode>,
        classes: ClassLabelMapping,
        feature_names: Vec<String>,
    ) -> LandCoverResult<Self> {
        let (rows, cols) = features.dim();
        if labels.len() != rows {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "{} labels for {} feature rows",
                labels.len(),
                rows
            )));
        }
        if feature_names.len() != cols {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "{} feature names for {} feature columns",
                feature_names.len(),
                cols
            )));
        }
        if let Some(bad) = labels.iter().find(|&&c| c as usize >= classes.len()) {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "class code {} outside mapping of {} classes",
                bad,
                classes.len()
            )));
        }
        Ok(Self {
            features,
            labels,
            classes,
            feature_names,
        })
    }

    /// Build from row vectors and label names; the mapping is derived from the labels.
    pub fn from_rows<S: AsRef<str>>(
        rows: &[Vec<f32>],
        labels: &[S],
        feature_names: Vec<String>,
    ) -> LandCoverResult<Self> {
        if rows.len() != labels.len() {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "{} labels for {} feature rows",
                labels.len(),
                rows.len()
            )));
        }
        let width = feature_names.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "row {} has {} features, expected {}",
                i,
                row.len(),
                width
            )));
        }

        let classes = ClassLabelMapping::from_labels(labels.iter().map(|l| l.as_ref()))?;
        let codes = labels
            .iter()
            .map(|l| {
                classes.code(l.as_ref()).ok_or_else(|| {
                    LandCoverError::InvalidTrainingData(format!("unmapped label {}", l.as_ref()))
                })
            })
            .collect::<LandCoverResult<Vec<_>>>()?;

        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let features = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| LandCoverError::InvalidTrainingData(format!("Shape error: {}", e)))?;
        Self::new(features, codes, classes, feature_names)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.features.row(index)
    }

    pub fn labels(&self) -> &[ClassCode] {
        &self.labels
    }

    pub fn classes(&self) -> &ClassLabelMapping {
        &self.classes
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Number of rows per class code
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for &c in &self.labels {
            counts[c as usize] += 1;
        }
        counts
    }

    /// Number of classes with at least one row
    pub fn distinct_labels(&self) -> usize {
        self.class_counts().iter().filter(|&&n| n > 0).count()
    }

    /// (min, max) of every feature column, NaN-free
    pub fn feature_stats(&self) -> Vec<(f32, f32)> {
        self.features
            .columns()
            .into_iter()
            .map(|col| {
                col.iter()
                    .filter(|v| !v.is_nan())
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
            })
            .collect()
    }
}
