//! Final merged and geocoded anomaly file of an orthophoto folder.

use log::info;
use std::path::{Path, PathBuf};

use crate::aggregate::MergedAnomalies;
use crate::config::PipelineConfig;
use crate::json_file::write_json;
use crate::patch_store::StoreError;

#[derive(Debug, Clone)]
pub struct AnomalyStore {
    path: PathBuf,
}

impl AnomalyStore {
    pub fn new(folder: &Path, config: &PipelineConfig) -> Self {
        Self {
            path: folder.join(&config.anomaly_meta),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, anomalies: &MergedAnomalies) -> Result<(), StoreError> {
        write_json(&self.path, anomalies)?;
        info!(
            "saved {} anomalies to {}",
            anomalies.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Fails on a missing file and on sequences of unequal length.
    pub fn load(&self) -> Result<MergedAnomalies, StoreError> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Point};
    use crate::geo::GeoPoint;

    fn merged_with(n: usize) -> MergedAnomalies {
        let mut merged = MergedAnomalies::new();
        for i in 0..n {
            let x = i as f64 * 100.0 + 0.25;
            merged.push(Detection {
                bbox: [x, 512.0, x + 12.5, 530.0],
                class_id: i as i64 + 1,
                score: 0.875,
                contour: vec![
                    vec![Point::new(x, 512.0), Point::new(x + 12.5, 512.0), Point::new(x, 530.0)],
                    vec![Point::new(1.0, 1.0)],
                ],
                center: Point::new(x + 6.0, 521.0),
            });
        }
        merged
    }

    #[test]
    fn round_trip_with_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let latlong = vec![
            GeoPoint {
                lat: 48.125,
                lon: 11.5625,
                alt: 0.0,
            };
            2
        ];
        let merged = merged_with(2).with_latlong(latlong);
        let store = AnomalyStore::new(dir.path(), &PipelineConfig::default());
        store.save(&merged).unwrap();
        assert_eq!(store.load().unwrap(), merged);
    }

    #[test]
    fn round_trip_without_detections() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnomalyStore::new(dir.path(), &PipelineConfig::default());
        store.save(&MergedAnomalies::new()).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(!text.contains("latlong"));
        assert_eq!(store.load().unwrap(), MergedAnomalies::new());
    }

    #[test]
    fn geometry_is_written_as_plain_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnomalyStore::new(dir.path(), &PipelineConfig::default());
        store.save(&merged_with(1)).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(value["boxes"][0], serde_json::json!([0.25, 512.0, 12.75, 530.0]));
        assert_eq!(value["centers"][0], serde_json::json!([6.25, 521.0]));
        assert_eq!(value["contours"][0][0][1], serde_json::json!([12.75, 512.0]));
        assert_eq!(value["classes"][0], serde_json::json!(1));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnomalyStore::new(dir.path(), &PipelineConfig::default());
        assert!(matches!(store.load(), Err(StoreError::Io(_))));
    }

    #[test]
    fn file_name_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            anomaly_meta: "hotspots.json".to_string(),
            ..PipelineConfig::default()
        };
        let store = AnomalyStore::new(dir.path(), &config);
        store.save(&merged_with(1)).unwrap();

        assert_eq!(store.path(), dir.path().join("hotspots.json"));
        assert!(!dir.path().join("anomalies.json").exists());
        assert_eq!(AnomalyStore::new(dir.path(), &config).load().unwrap(), merged_with(1));
    }
}
