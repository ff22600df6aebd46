//! Confusion matrix and agreement measures for a tree against labeled samples

use crate::core::dataset::TrainingSet;
use crate::core::tree::DecisionTree;
use crate::types::{ClassCode, ClassLabelMapping, LandCoverError, LandCoverResult};
use ndarray::Array2;
use std::fmt;

/// Rows are reference classes, columns predicted classes
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    matrix: Array2<usize>,
    classes: ClassLabelMapping,
    /// Samples the tree could not classify (NaN on the walked path)
    unclassified: usize,
}

impl ConfusionMatrix {
    /// Tally reference against predicted codes; both share `classes`.
    pub fn from_codes(
        reference: &[ClassCode],
        predicted: &[Option<ClassCode>],
        classes: ClassLabelMapping,
    ) -> LandCoverResult<Self> {
        if reference.len() != predicted.len() {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "{} reference labels for {} predictions",
                reference.len(),
                predicted.len()
            )));
        }
        let n = classes.len();
        let mut matrix = Array2::zeros((n, n));
        let mut unclassified = 0;
        for (&r, p) in reference.iter().zip(predicted) {
            let Some(p) = *p else {
                unclassified += 1;
                continue;
            };
            if r as usize >= n || p as usize >= n {
                return Err(LandCoverError::InvalidTrainingData(format!(
                    "class code ({}, {}) outside mapping of {} classes",
                    r, p, n
                )));
            }
            matrix[[r as usize, p as usize]] += 1;
        }
        Ok(Self {
            matrix,
            classes,
            unclassified,
        })
    }

    /// Evaluate `tree` on labeled samples.
    ///
    /// The samples' labels are translated into the tree's class mapping, so an
    /// independent validation set with its own mapping can be used. Samples
    /// whose label the tree never saw are rejected.
    pub fn evaluate(tree: &DecisionTree, samples: &TrainingSet) -> LandCoverResult<Self> {
        tree.validate_features(samples.feature_names())?;

        let mut reference = Vec::with_capacity(samples.len());
        for &code in samples.labels() {
            let label = samples.classes().label(code).unwrap_or_default();
            let mapped = tree.classes().code(label).ok_or_else(|| {
                LandCoverError::InvalidTrainingData(format!(
                    "label '{}' was not part of the trained classes",
                    label
                ))
            })?;
            reference.push(mapped);
        }
        let predicted: Vec<Option<ClassCode>> = samples
            .features()
            .rows()
            .into_iter()
            .map(|row| tree.predict(&row.to_vec()))
            .collect();

        let cm = Self::from_codes(&reference, &predicted, tree.classes().clone())?;
        log::info!(
            "Accuracy on {} samples: overall {:.4}, kappa {:.4}",
            cm.total(),
            cm.overall_accuracy(),
            cm.kappa()
        );
        Ok(cm)
    }

    pub fn matrix(&self) -> &Array2<usize> {
        &self.matrix
    }

    pub fn classes(&self) -> &ClassLabelMapping {
        &self.classes
    }

    pub fn unclassified(&self) -> usize {
        self.unclassified
    }

    /// Number of tallied samples
    pub fn total(&self) -> usize {
        self.matrix.sum()
    }

    pub fn overall_accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.matrix.diag().sum() as f64 / total as f64
    }

    /// Cohen's kappa; 0 when chance agreement is total
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let observed = self.overall_accuracy();
        let expected: f64 = (0..self.classes.len())
            .map(|i| {
                let row = self.matrix.row(i).sum() as f64;
                let col = self.matrix.column(i).sum() as f64;
                row * col
            })
            .sum::<f64>()
            / (total * total);
        if (1.0 - expected).abs() < f64::EPSILON {
            return 0.0;
        }
        (observed - expected) / (1.0 - expected)
    }

    /// Correct / reference total per class (recall); `None` for classes with no reference samples
    pub fn producers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|i| {
                let row = self.matrix.row(i).sum();
                (row > 0).then(|| self.matrix[[i, i]] as f64 / row as f64)
            })
            .collect()
    }

    /// Correct / predicted total per class (precision); `None` for never-predicted classes
    pub fn users_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|i| {
                let col = self.matrix.column(i).sum();
                (col > 0).then(|| self.matrix[[i, i]] as f64 / col as f64)
            })
            .collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .labels()
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(8);
        write!(f, "{:>width$}", "", width = width)?;
        for label in self.classes.labels() {
            write!(f, " {:>width$}", label, width = width)?;
        }
        writeln!(f)?;
        for (i, label) in self.classes.labels().iter().enumerate() {
            write!(f, "{:>width$}", label, width = width)?;
            for n in self.matrix.row(i) {
                write!(f, " {:>width$}", n, width = width)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "overall accuracy: {:.4}", self.overall_accuracy())?;
        write!(f, "kappa: {:.4}", self.kappa())
    }
}
