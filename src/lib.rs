//! Tiling, aggregation and geocoding of hot-spot detections on large orthophotos.
//!
//! The pipeline runs in three persisted stages: [`pipeline::preprocess`] cuts every
//! orthophoto of a folder into fixed-size patches, an external model runs on each
//! patch through a [`detection::DetectionAdapter`], and [`pipeline::postprocess`]
//! merges the per-patch detections back into mosaic space and attaches WGS84
//! coordinates.

pub mod aggregate;
pub mod anomaly_store;
pub mod config;
pub mod detection;
pub mod geo;
pub mod json_file;
pub mod patch_grid;
pub mod patch_store;
pub mod pipeline;

pub use aggregate::{MergedAnomalies, merge};
pub use config::PipelineConfig;
pub use detection::{Contour, Detection, Point};
pub use patch_grid::{PatchDescriptor, PatchGrid, PatchSize};
