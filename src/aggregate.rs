//! Merges per-patch detections into one mosaic-space result set.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::detection::{AnomalyMeta, BoundingBox, Contour, Detection, Point};
use crate::geo::GeoPoint;
use crate::patch_store::MosaicMeta;

/// Detections of a whole mosaic as index-aligned parallel sequences.
///
/// Index `i` of every sequence describes the same detection; the order is
/// orthophoto order, then patch order, then detection order within the patch.
/// `latlong` is only present once coordinates were attached to at least one
/// detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MergedAnomaliesRepr")]
pub struct MergedAnomalies {
    boxes: Vec<BoundingBox>,
    classes: Vec<i64>,
    scores: Vec<f64>,
    contours: Vec<Contour>,
    centers: Vec<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latlong: Option<Vec<GeoPoint>>,
}

#[derive(Deserialize)]
struct MergedAnomaliesRepr {
    boxes: Vec<BoundingBox>,
    classes: Vec<i64>,
    scores: Vec<f64>,
    contours: Vec<Contour>,
    centers: Vec<Point>,
    #[serde(default)]
    latlong: Option<Vec<GeoPoint>>,
}

impl TryFrom<MergedAnomaliesRepr> for MergedAnomalies {
    type Error = String;

    fn try_from(repr: MergedAnomaliesRepr) -> Result<Self, Self::Error> {
        let n = repr.boxes.len();
        let mut lens = vec![
            ("classes", repr.classes.len()),
            ("scores", repr.scores.len()),
            ("contours", repr.contours.len()),
            ("centers", repr.centers.len()),
        ];
        if let Some(latlong) = &repr.latlong {
            lens.push(("latlong", latlong.len()));
        }
        if let Some((name, len)) = lens.into_iter().find(|(_, len)| *len != n) {
            return Err(format!("{name} has {len} entries but boxes has {n}"));
        }
        Ok(Self {
            boxes: repr.boxes,
            classes: repr.classes,
            scores: repr.scores,
            contours: repr.contours,
            centers: repr.centers,
            latlong: repr.latlong,
        })
    }
}

impl MergedAnomalies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a detection. Attached coordinates no longer cover every detection
    /// afterwards and are dropped.
    pub fn push(&mut self, detection: Detection) {
        self.latlong = None;
        self.boxes.push(detection.bbox);
        self.classes.push(detection.class_id);
        self.scores.push(detection.score);
        self.contours.push(detection.contour);
        self.centers.push(detection.center);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    pub fn centers(&self) -> &[Point] {
        &self.centers
    }

    pub fn latlong(&self) -> Option<&[GeoPoint]> {
        self.latlong.as_deref()
    }

    pub fn is_aligned(&self) -> bool {
        let n = self.boxes.len();
        self.classes.len() == n
            && self.scores.len() == n
            && self.contours.len() == n
            && self.centers.len() == n
            && self.latlong.as_ref().is_none_or(|l| l.len() == n)
    }

    /// Attaches one coordinate per detection; an empty list leaves the field absent.
    pub(crate) fn with_latlong(mut self, latlong: Vec<GeoPoint>) -> Self {
        debug_assert_eq!(latlong.len(), self.len());
        self.latlong = if latlong.is_empty() {
            None
        } else {
            Some(latlong)
        };
        self
    }
}

/// Translates the detections of every patch by the patch offset and concatenates them.
///
/// Patches without an entry in `anomaly_meta` contribute nothing.
pub fn merge(mosaic_meta: &MosaicMeta, anomaly_meta: &AnomalyMeta) -> MergedAnomalies {
    let mut merged = MergedAnomalies::new();
    for (orthophoto, patches) in mosaic_meta.iter() {
        let before = merged.len();
        for patch in patches {
            let Some(found) = anomaly_meta.get(&patch.name) else {
                continue;
            };
            let (dx, dy) = (f64::from(patch.offset_x), f64::from(patch.offset_y));
            for detection in found.detections() {
                merged.push(detection.translated(dx, dy));
            }
        }
        debug!("{orthophoto}: {} detection(s)", merged.len() - before);
    }
    debug_assert!(merged.is_aligned());
    info!(
        "merged {} detection(s) from {} orthophoto(s)",
        merged.len(),
        mosaic_meta.len()
    );
    merged
}
