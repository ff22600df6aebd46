//! Scene, metadata, training data and model I/O

pub mod metadata;
pub mod model;
pub mod scene;
pub mod training;
pub mod writer;

pub use metadata::SceneMetadata;
pub use model::{load_tree, save_tree, tree_from_json, tree_to_json};
pub use scene::{discover_bands, load_scene, stack_bands, BandFile, BandSpec, Scene};
pub use training::{read_study_area, read_training_sites};
pub use writer::{skip_unsupported, write_classified, write_reflectance};
