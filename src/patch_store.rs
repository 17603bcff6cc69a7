//! Working folder of an orthophoto: patch images plus the mosaic and anomaly metadata.

use image::{RgbImage, imageops};
use log::{debug, warn};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::detection::AnomalyMeta;
use crate::json_file::{read_json_if_exists, write_json};
use crate::patch_grid::{PatchDescriptor, PatchSize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Orthophoto file name -> its patches, in the order the orthophotos were tiled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MosaicMeta {
    entries: Vec<(String, Vec<PatchDescriptor>)>,
}

impl MosaicMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the patches of an orthophoto, replacing any previous list in place.
    pub fn insert(&mut self, orthophoto: impl Into<String>, patches: Vec<PatchDescriptor>) {
        let orthophoto = orthophoto.into();
        match self.entries.iter_mut().find(|(name, _)| *name == orthophoto) {
            Some(entry) => entry.1 = patches,
            None => self.entries.push((orthophoto, patches)),
        }
    }

    pub fn get(&self, orthophoto: &str) -> Option<&[PatchDescriptor]> {
        self.entries
            .iter()
            .find(|(name, _)| name == orthophoto)
            .map(|(_, patches)| patches.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PatchDescriptor])> {
        self.entries
            .iter()
            .map(|(name, patches)| (name.as_str(), patches.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn patch_count(&self) -> usize {
        self.entries.iter().map(|(_, p)| p.len()).sum()
    }
}

impl Serialize for MosaicMeta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, patches) in &self.entries {
            map.serialize_entry(name, patches)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MosaicMeta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MosaicMetaVisitor;

        impl<'de> Visitor<'de> for MosaicMetaVisitor {
            type Value = MosaicMeta;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of orthophoto names to patch lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MosaicMeta, A::Error> {
                let mut meta = MosaicMeta::new();
                while let Some((name, patches)) =
                    access.next_entry::<String, Vec<PatchDescriptor>>()?
                {
                    meta.insert(name, patches);
                }
                Ok(meta)
            }
        }

        deserializer.deserialize_map(MosaicMetaVisitor)
    }
}

/// Clears `folder` for a new tiling run, creating it when missing.
///
/// Entries that cannot be removed are logged and skipped; only failing to create
/// or list the folder is an error.
pub fn init_working_folder(folder: &Path) -> Result<(), StoreError> {
    if !folder.exists() {
        fs::create_dir_all(folder)?;
        return Ok(());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(folder)? {
        match entry {
            Ok(e) => paths.push(e.path()),
            Err(e) => warn!("Failed to read entry of {}: {e}", folder.display()),
        }
    }
    let failed = remove_entries(paths);
    if failed > 0 {
        warn!("{failed} stale entries left in {}", folder.display());
    }
    Ok(())
}

/// Deletes files and folder trees, logging failures. Returns how many failed.
fn remove_entries(paths: impl IntoIterator<Item = PathBuf>) -> usize {
    let mut failed = 0;
    for path in paths {
        let is_dir = fs::symlink_metadata(&path)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            warn!("Failed to delete {}. Reason: {e}", path.display());
            failed += 1;
        }
    }
    failed
}

/// Cuts the descriptor's rectangle out of `source`; pixels beyond the raster are black.
pub fn crop_patch(source: &RgbImage, descriptor: &PatchDescriptor, size: PatchSize) -> RgbImage {
    let (x, y) = (descriptor.offset_x, descriptor.offset_y);
    let crop_width = size.width.min(source.width().saturating_sub(x));
    let crop_height = size.height.min(source.height().saturating_sub(y));

    if crop_width == size.width && crop_height == size.height {
        return imageops::crop_imm(source, x, y, crop_width, crop_height).to_image();
    }

    let mut patch = RgbImage::new(size.width, size.height);
    if crop_width > 0 && crop_height > 0 {
        let cropped = imageops::crop_imm(source, x, y, crop_width, crop_height).to_image();
        imageops::replace(&mut patch, &cropped, 0, 0);
    }
    patch
}

/// File layout of one orthophoto folder.
#[derive(Debug, Clone)]
pub struct PatchStore {
    folder: PathBuf,
    patches: PathBuf,
    mosaic_meta: String,
    anomaly_meta: String,
    patch_extension: String,
}

impl PatchStore {
    pub fn new(folder: &Path, config: &PipelineConfig) -> Self {
        Self {
            folder: folder.to_path_buf(),
            patches: folder.join(&config.patches_folder),
            mosaic_meta: config.mosaic_meta.clone(),
            anomaly_meta: config.anomaly_meta.clone(),
            patch_extension: config.patch_extension.clone(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn patches_folder(&self) -> &Path {
        &self.patches
    }

    pub fn mosaic_meta_path(&self) -> PathBuf {
        self.folder.join(&self.mosaic_meta)
    }

    pub fn anomaly_meta_path(&self) -> PathBuf {
        self.patches.join(&self.anomaly_meta)
    }

    pub fn init_working_folder(&self) -> Result<(), StoreError> {
        init_working_folder(&self.patches)
    }

    pub fn write_patch(
        &self,
        source: &RgbImage,
        descriptor: &PatchDescriptor,
        size: PatchSize,
    ) -> Result<PathBuf, StoreError> {
        let path = self.patches.join(&descriptor.name);
        crop_patch(source, descriptor, size).save(&path)?;
        debug!(
            "wrote {} at ({}, {})",
            descriptor.name, descriptor.offset_x, descriptor.offset_y
        );
        Ok(path)
    }

    pub fn write_mosaic_meta(&self, meta: &MosaicMeta) -> Result<(), StoreError> {
        write_json(&self.mosaic_meta_path(), meta)
    }

    pub fn read_mosaic_meta(&self) -> Result<Option<MosaicMeta>, StoreError> {
        read_json_if_exists(&self.mosaic_meta_path())
    }

    pub fn write_anomaly_meta(&self, meta: &AnomalyMeta) -> Result<(), StoreError> {
        write_json(&self.anomaly_meta_path(), meta)
    }

    /// `None` means the detection stage found nothing, not a failure.
    pub fn read_anomaly_meta(&self) -> Result<Option<AnomalyMeta>, StoreError> {
        read_json_if_exists(&self.anomaly_meta_path())
    }

    /// Patch images of the working folder, sorted by file name.
    pub fn patch_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        if !self.patches.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&self.patches)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_extension(p, &self.patch_extension))
            .collect();
        files.sort();
        Ok(files)
    }
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
