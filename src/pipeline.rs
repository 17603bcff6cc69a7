//! Stage drivers chaining the components over an orthophoto folder.
//!
//! Each stage reads what the previous one persisted, so any stage can be re-run on
//! its own. One folder must not be processed by two stages at the same time.

use image::ImageReader;
use log::info;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::aggregate::{MergedAnomalies, merge};
use crate::anomaly_store::AnomalyStore;
use crate::config::PipelineConfig;
use crate::detection::{DetectionAdapter, run_detection};
use crate::geo::{GeoError, Raster, attach_coordinates};
use crate::patch_grid::{GridError, PatchDescriptor, PatchGrid};
use crate::patch_store::{MosaicMeta, PatchStore, StoreError, has_extension};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    #[error("geo error: {0}")]
    Geo(#[from] GeoError),

    #[error("invalid job id {0:?}")]
    InvalidJobId(String),
}

/// Working folder `<root>/<job>/<job_subfolder>` of a job.
pub fn job_folder(root: &Path, job_id: &str, config: &PipelineConfig) -> Result<PathBuf, PipelineError> {
    let mut components = Path::new(job_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(PipelineError::InvalidJobId(job_id.to_string())),
    }
    Ok(root.join(job_id).join(&config.job_subfolder))
}

/// Orthophoto file names of `folder`, sorted.
pub fn find_orthophotos(folder: &Path, config: &PipelineConfig) -> Result<Vec<String>, StoreError> {
    let mut names: Vec<String> = fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, &config.orthophoto_extension))
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_owned))
        .collect();
    names.sort();
    Ok(names)
}

/// Cuts one orthophoto of the store folder into patches and returns their descriptors.
pub fn tile_orthophoto(
    store: &PatchStore,
    file_name: &str,
    config: &PipelineConfig,
) -> Result<Vec<PatchDescriptor>, PipelineError> {
    let path = store.folder().join(file_name);
    let mut reader = ImageReader::open(&path)
        .and_then(|r| r.with_guessed_format())
        .map_err(StoreError::from)?;
    reader.no_limits();
    let image = reader.decode().map_err(StoreError::from)?.to_rgb8();

    let size = config.patch_size();
    let grid = PatchGrid::new(image.width(), image.height(), size)?;
    let descriptors = grid.descriptors(file_name, &config.patch_extension);
    for descriptor in &descriptors {
        store.write_patch(&image, descriptor, size)?;
    }

    let (pw, ph) = grid.padded_size();
    info!(
        "{file_name}: {}x{} padded to {pw}x{ph}, {} patches",
        image.width(),
        image.height(),
        descriptors.len()
    );
    Ok(descriptors)
}

/// Clears the patches folder, tiles `file_names` and writes the mosaic metadata.
pub fn split_orthophotos(
    folder: &Path,
    file_names: &[String],
    config: &PipelineConfig,
) -> Result<MosaicMeta, PipelineError> {
    let store = PatchStore::new(folder, config);
    store.init_working_folder()?;

    let mut meta = MosaicMeta::new();
    for name in file_names {
        meta.insert(name.clone(), tile_orthophoto(&store, name, config)?);
    }
    store.write_mosaic_meta(&meta)?;
    Ok(meta)
}

/// Tiling stage: tiles every orthophoto of `folder`. Nothing is written when the
/// folder holds no orthophoto.
pub fn preprocess(folder: &Path, config: &PipelineConfig) -> Result<MosaicMeta, PipelineError> {
    let orthophotos = find_orthophotos(folder, config)?;
    if orthophotos.is_empty() {
        info!("no orthophotos in {}", folder.display());
        return Ok(MosaicMeta::new());
    }
    let meta = split_orthophotos(folder, &orthophotos, config)?;
    info!(
        "Preprocessing done. orthophotos={} patches={}",
        meta.len(),
        meta.patch_count()
    );
    Ok(meta)
}

/// Detection stage: runs `adapter` over the patches of `folder`.
pub fn detect<A: DetectionAdapter + ?Sized>(
    folder: &Path,
    adapter: &mut A,
    config: &PipelineConfig,
) -> Result<usize, PipelineError> {
    Ok(run_detection(folder, adapter, config)?)
}

/// Aggregation stage: merges the detections of the orthophoto's folder, attaches
/// WGS84 coordinates from the orthophoto and saves the result next to it.
///
/// Missing mosaic or anomaly metadata yields an empty result.
pub fn postprocess(orthophoto: &Path, config: &PipelineConfig) -> Result<MergedAnomalies, PipelineError> {
    let folder = match orthophoto.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let store = PatchStore::new(folder, config);

    let mosaic_meta = store.read_mosaic_meta()?.unwrap_or_else(|| {
        info!("no mosaic metadata in {}", folder.display());
        MosaicMeta::new()
    });
    let anomaly_meta = store.read_anomaly_meta()?.unwrap_or_else(|| {
        info!("no anomaly metadata in {}", store.patches_folder().display());
        Default::default()
    });

    let merged = merge(&mosaic_meta, &anomaly_meta);
    let raster = Raster::open(orthophoto)?;
    let anomalies = attach_coordinates(&raster, merged)?;

    AnomalyStore::new(folder, config).save(&anomalies)?;
    info!("Postprocessing done. num_anomalies={}", anomalies.len());
    Ok(anomalies)
}
