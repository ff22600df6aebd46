use crate::core::classify::ClassifyParams;
use crate::core::extract::ExtractParams;
use crate::core::reflectance::ReflectanceParams;
use crate::core::train::TreeParams;
use crate::io::scene::BandSpec;
use crate::types::{LandCoverError, LandCoverResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for a full classification run. Every section falls back to its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bands to load, in feature order
    pub bands: Vec<BandSpec>,
    /// Calibration applied to every band unless scene metadata supplies per-band values
    pub reflectance: ReflectanceParams,
    /// Prefer the per-band rescaling found in the scene's MTL file
    pub use_scene_rescaling: bool,
    pub extract: ExtractParams,
    pub tree: TreeParams,
    pub classify: ClassifyParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bands: BandSpec::landsat_oli(),
            reflectance: ReflectanceParams::default(),
            use_scene_rescaling: true,
            extract: ExtractParams::default(),
            tree: TreeParams::default(),
            classify: ClassifyParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> LandCoverResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> LandCoverResult<Self> {
        log::info!("Loading configuration from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> LandCoverResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Band names in feature order
    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    pub fn validate(&self) -> LandCoverResult<()> {
        if self.bands.is_empty() {
            return Err(LandCoverError::InvalidFormat(
                "configuration lists no bands".to_string(),
            ));
        }
        let mut names = self.band_names();
        names.sort();
        names.dedup();
        if names.len() != self.bands.len() {
            return Err(LandCoverError::InvalidFormat(
                "band names must be unique".to_string(),
            ));
        }
        if self.classify.chunk_rows == 0 {
            return Err(LandCoverError::InvalidFormat(
                "classify.chunk_rows must be positive".to_string(),
            ));
        }
        self.reflectance.validate()?;
        self.tree.validate()
    }
}
