//! Python bindings

use crate::core::classify::TreeClassifier;
use crate::core::reflectance::{ReflectanceCorrector, ReflectanceParams};
use crate::core::train::{DecisionTreeTrainer, SplitCriterion, TreeParams};
use crate::core::tree::DecisionTree;
use crate::io::model::{tree_from_json, tree_to_json};
use crate::io::scene::LANDSAT_FILL;
use crate::types::{LandCoverError, Raster};
use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::prelude::*;

fn to_py_err(e: LandCoverError) -> PyErr {
    match e {
        LandCoverError::Io(_) | LandCoverError::Processing(_) | LandCoverError::Unsupported(_) => {
            PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e)),
    }
}

fn default_band_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("band{}", i)).collect()
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(correct_reflectance, m)?)?;
    m.add_function(wrap_pyfunction!(train_tree, m)?)?;
    m.add_class::<PyDecisionTree>()?;
    Ok(())
}

/// Convert a (band, row, col) array of raw digital numbers to percent reflectance.
#[pyfunction]
#[pyo3(signature = (raw, valid_min=None, valid_max=None, scale=None, offset=None))]
fn correct_reflectance<'py>(
    py: Python<'py>,
    raw: PyReadonlyArray3<u16>,
    valid_min: Option<f64>,
    valid_max: Option<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
) -> PyResult<&'py PyArray3<f32>> {
    let defaults = ReflectanceParams::default();
    let params = ReflectanceParams {
        valid_min: valid_min.unwrap_or(defaults.valid_min),
        valid_max: valid_max.unwrap_or(defaults.valid_max),
        scale: scale.unwrap_or(defaults.scale),
        offset: offset.unwrap_or(defaults.offset),
    };
    let data = raw.as_array().to_owned();
    let names = default_band_names(data.dim().0);
    let raster = Raster::new(data, names)
        .map_err(to_py_err)?
        .with_nodata(Some(LANDSAT_FILL));

    let corrector = ReflectanceCorrector::new(params).map_err(to_py_err)?;
    let corrected = py.allow_threads(|| corrector.correct(&raster)).map_err(to_py_err)?;
    Ok(corrected.into_data().into_pyarray(py))
}

/// Grow a decision tree from a (rows, features) array and one label per row.
#[pyfunction]
#[pyo3(signature = (features, labels, band_names, criterion="gini", max_depth=None, min_samples_split=2, min_samples_leaf=1))]
fn train_tree(
    py: Python<'_>,
    features: PyReadonlyArray2<f32>,
    labels: Vec<String>,
    band_names: Vec<String>,
    criterion: &str,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
) -> PyResult<PyDecisionTree> {
    let params = TreeParams {
        criterion: criterion.parse::<SplitCriterion>().map_err(to_py_err)?,
        max_depth,
        min_samples_split,
        min_samples_leaf,
    };
    let rows: Vec<Vec<f32>> = features
        .as_array()
        .rows()
        .into_iter()
        .map(|r| r.to_vec())
        .collect();

    let trainer = DecisionTreeTrainer::new(params);
    let tree = py
        .allow_threads(|| trainer.fit_rows(&rows, &labels, band_names))
        .map_err(to_py_err)?;
    Ok(PyDecisionTree { inner: tree })
}

/// Python wrapper for DecisionTree
#[pyclass(name = "DecisionTree")]
struct PyDecisionTree {
    inner: DecisionTree,
}

#[pymethods]
impl PyDecisionTree {
    /// Classify a (band, row, col) reflectance array; no-data pixels get 65535.
    fn classify<'py>(&self, py: Python<'py>, raster: PyReadonlyArray3<f32>) -> PyResult<&'py PyArray2<u16>> {
        let raster = Raster::new(raster.as_array().to_owned(), self.inner.feature_names().to_vec())
            .map_err(to_py_err)?;
        let classified = py
            .allow_threads(|| TreeClassifier::default().classify(&raster, &self.inner))
            .map_err(to_py_err)?;
        Ok(classified.codes().clone().into_pyarray(py))
    }

    fn predict(&self, features: Vec<f32>) -> Option<String> {
        self.inner.predict_label(&features).map(str::to_string)
    }

    #[getter]
    fn classes(&self) -> Vec<String> {
        self.inner.classes().labels().to_vec()
    }

    #[getter]
    fn feature_names(&self) -> Vec<String> {
        self.inner.feature_names().to_vec()
    }

    #[getter]
    fn feature_importances(&self) -> Vec<f64> {
        self.inner.feature_importances().to_vec()
    }

    #[getter]
    fn depth(&self) -> usize {
        self.inner.depth()
    }

    fn to_json(&self) -> PyResult<String> {
        tree_to_json(&self.inner).map_err(to_py_err)
    }

    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        Ok(PyDecisionTree {
            inner: tree_from_json(json).map_err(to_py_err)?,
        })
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn __repr__(&self) -> String {
        format!(
            "DecisionTree(classes={:?}, depth={}, leaves={})",
            self.inner.classes().labels(),
            self.inner.depth(),
            self.inner.leaf_count()
        )
    }
}
