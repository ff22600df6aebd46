//! End-to-end land-cover classification: crop, correct, extract, train, classify.
//!
//! Each stage consumes the previous stage's output and returns a new value;
//! the first failing stage's error is returned unchanged.

use crate::config::PipelineConfig;
use crate::core::accuracy::ConfusionMatrix;
use crate::core::classify::{ClassifiedRaster, TreeClassifier};
use crate::core::dataset::TrainingSet;
use crate::core::extract::{FeatureExtractor, TrainingSite};
use crate::core::mask::crop_to_geometry;
use crate::core::reflectance::{ReflectanceCorrector, ReflectanceParams};
use crate::core::train::DecisionTreeTrainer;
use crate::core::tree::DecisionTree;
use crate::types::{LandCoverResult, RawRaster, ReflectanceRaster};
use geo::Geometry;
use std::time::Instant;

/// Every artifact of a run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub corrected: ReflectanceRaster,
    pub training: TrainingSet,
    pub tree: DecisionTree,
    pub classified: ClassifiedRaster,
    /// Agreement of the tree with its own training rows
    pub resubstitution: ConfusionMatrix,
}

pub struct Pipeline {
    config: PipelineConfig,
    band_params: Option<Vec<ReflectanceParams>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> LandCoverResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            band_params: None,
        })
    }

    /// Calibrate each band with its own parameters instead of the configured default
    pub fn with_band_params(mut self, params: Vec<ReflectanceParams>) -> Self {
        self.band_params = Some(params);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn corrector(&self) -> LandCoverResult<ReflectanceCorrector> {
        match &self.band_params {
            Some(params) => ReflectanceCorrector::per_band(params.clone()),
            None => ReflectanceCorrector::new(self.config.reflectance),
        }
    }

    /// Crop (when a study area is given) and correct a raw scene.
    pub fn prepare(
        &self,
        raw: &RawRaster,
        study_area: Option<&Geometry<f64>>,
    ) -> LandCoverResult<ReflectanceRaster> {
        let cropped;
        let raw = match study_area {
            Some(area) => {
                cropped = crop_to_geometry(raw, area)?;
                &cropped
            }
            None => raw,
        };
        self.corrector()?.correct(raw)
    }

    /// Train on `sites` and classify the scene they were drawn from.
    pub fn run(
        &self,
        raw: &RawRaster,
        study_area: Option<&Geometry<f64>>,
        sites: &[TrainingSite],
    ) -> LandCoverResult<PipelineOutput> {
        let start = Instant::now();
        log::info!(
            "Starting land-cover pipeline on {} bands of {}x{} pixels",
            raw.band_count(),
            raw.rows(),
            raw.cols()
        );

        let corrected = self.prepare(raw, study_area)?;
        let training = FeatureExtractor::new(self.config.extract.clone()).extract(&corrected, sites)?;
        let tree = DecisionTreeTrainer::new(self.config.tree.clone()).fit(&training)?;
        let classified = TreeClassifier::new(self.config.classify.clone()).classify(&corrected, &tree)?;
        let resubstitution = ConfusionMatrix::evaluate(&tree, &training)?;

        log::info!("Pipeline finished in {:.2?}", start.elapsed());
        Ok(PipelineOutput {
            corrected,
            training,
            tree,
            classified,
            resubstitution,
        })
    }
}

/// Run the whole pipeline with one set of calibration parameters for every band.
pub fn run_pipeline(
    raw: &RawRaster,
    study_area: Option<&Geometry<f64>>,
    sites: &[TrainingSite],
    config: &PipelineConfig,
) -> LandCoverResult<PipelineOutput> {
    Pipeline::new(config.clone())?.run(raw, study_area, sites)
}
