use image::DynamicImage;
use log::{debug, info, warn};
use std::path::Path;

use super::{AnomalyMeta, Detection, PatchDetections};
use crate::config::PipelineConfig;
use crate::patch_store::{PatchStore, StoreError};

/// Errors an adapter reports for a single patch.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("model error: {0}")]
    Model(String),
}

/// Runs a detection model on one patch.
///
/// Implementations receive their model and compute device through their own
/// constructor. Returned geometry is patch-local and every detection carries at
/// least one contour ring.
pub trait DetectionAdapter {
    fn detect(
        &mut self,
        patch: &DynamicImage,
        confidence_threshold: f64,
    ) -> Result<Vec<Detection>, AdapterError>;
}

impl<F> DetectionAdapter for F
where
    F: FnMut(&DynamicImage, f64) -> Result<Vec<Detection>, AdapterError>,
{
    fn detect(
        &mut self,
        patch: &DynamicImage,
        confidence_threshold: f64,
    ) -> Result<Vec<Detection>, AdapterError> {
        self(patch, confidence_threshold)
    }
}

/// Runs `adapter` over every patch in the patches folder of `folder` and writes the
/// anomaly metadata next to the patches.
///
/// Only detections scoring above the threshold are kept and only patches with at
/// least one of them are recorded. A patch that fails to load or to run is logged
/// and left out. Returns the number of patches with detections.
pub fn run_detection<A: DetectionAdapter + ?Sized>(
    folder: &Path,
    adapter: &mut A,
    config: &PipelineConfig,
) -> Result<usize, StoreError> {
    let store = PatchStore::new(folder, config);
    let threshold = config.confidence_threshold;
    let mut meta = AnomalyMeta::new();

    for path in store.patch_files()? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        debug!("Processing file {name}...");

        let patch = match image::open(&path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Failed to open patch {}: {e}", path.display());
                continue;
            }
        };

        let detections = match adapter.detect(&patch, threshold) {
            Ok(v) => v,
            Err(e) => {
                warn!("Detection failed for {name}: {e}");
                continue;
            }
        };

        let kept: PatchDetections = detections
            .into_iter()
            .filter(|d| d.score > threshold)
            .collect();
        if !kept.is_empty() {
            meta.insert(name, kept);
        }
    }

    store.write_anomaly_meta(&meta)?;
    info!("Detection done. patches with anomalies={}", meta.len());
    Ok(meta.len())
}
