//! Core land-cover processing modules

pub mod accuracy;
pub mod classify;
pub mod dataset;
pub mod extract;
pub mod mask;
pub mod reflectance;
pub mod train;
pub mod tree;

// Re-export main types
pub use accuracy::ConfusionMatrix;
pub use classify::{ClassArea, ClassStatistics, ClassifiedRaster, ClassifyParams, TreeClassifier};
pub use dataset::TrainingSet;
pub use extract::{ExtractParams, FeatureExtractor, TrainingSite};
pub use mask::crop_to_geometry;
pub use reflectance::{ReflectanceCorrector, ReflectanceParams};
pub use train::{DecisionTreeTrainer, SplitCriterion, TreeParams};
pub use tree::{DecisionTree, TreeNode};
