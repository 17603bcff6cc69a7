use serde::Deserialize;
use std::path::Path;

use crate::patch_grid::PatchSize;
use crate::patch_store::StoreError;

pub const PATCH_SIZE_WIDTH: u32 = 640;
pub const PATCH_SIZE_HEIGHT: u32 = 512;
pub const MOSAIC_META: &str = "mosaics.json";
pub const ANOMALY_META: &str = "anomalies.json";
pub const PATCHES_FOLDER: &str = "patches";
pub const ORTHOPHOTO_EXTENSION: &str = "tif";
pub const PATCH_EXTENSION: &str = "png";
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;
pub const ORTHOPHOTO_FILE: &str = "odm_orthophoto.tif";
pub const JOB_SUBFOLDER: &str = "odm_orthophoto";

/// Configuration shared by all pipeline stages.
///
/// Every field has a default, so a JSON config file only needs to name the values
/// it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub patch_width: u32,
    pub patch_height: u32,
    pub mosaic_meta: String,
    pub anomaly_meta: String,
    pub patches_folder: String,
    pub orthophoto_extension: String,
    pub patch_extension: String,
    pub confidence_threshold: f64,
    pub orthophoto_file: String,
    pub job_subfolder: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patch_width: PATCH_SIZE_WIDTH,
            patch_height: PATCH_SIZE_HEIGHT,
            mosaic_meta: MOSAIC_META.to_string(),
            anomaly_meta: ANOMALY_META.to_string(),
            patches_folder: PATCHES_FOLDER.to_string(),
            orthophoto_extension: ORTHOPHOTO_EXTENSION.to_string(),
            patch_extension: PATCH_EXTENSION.to_string(),
            confidence_threshold: CONFIDENCE_THRESHOLD,
            orthophoto_file: ORTHOPHOTO_FILE.to_string(),
            job_subfolder: JOB_SUBFOLDER.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Loads a config file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn patch_size(&self) -> PatchSize {
        PatchSize {
            width: self.patch_width,
            height: self.patch_height,
        }
    }
}
