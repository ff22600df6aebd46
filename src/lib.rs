//! landclass: supervised land-cover classification of multi-band satellite imagery
//!
//! Raw surface-reflectance scenes are calibrated to percent reflectance,
//! sampled at labeled training sites, used to grow a CART decision tree and
//! finally classified pixel by pixel with that tree.

pub mod config;
pub mod core;
pub mod io;
pub mod parallel;
pub mod pipeline;
pub mod render;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    ClassCode, ClassLabelMapping, GeoTransform, LandCoverError, LandCoverResult, Raster,
    RawRaster, ReflectanceRaster, CLASS_NODATA,
};

pub use crate::core::{
    crop_to_geometry, ClassifiedRaster, ConfusionMatrix, DecisionTree, DecisionTreeTrainer,
    FeatureExtractor, ReflectanceCorrector, ReflectanceParams, TrainingSet, TrainingSite,
    TreeClassifier, TreeParams,
};
pub use config::PipelineConfig;
pub use pipeline::{run_pipeline, Pipeline, PipelineOutput};
