//! Detection records and the per-patch metadata the detection stage writes.
//!
//! Geometry is kept in `f64` pixel units. On disk every point is a plain `[x, y]`
//! array; the OpenCV layout `[[x, y]]` produced by contour tracers is accepted on
//! input as well.

pub mod adapter;
pub mod mask;

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use adapter::{AdapterError, DetectionAdapter, run_detection};
pub use mask::{center_from_contour, contour_from_mask};

/// `[x0, y0, x1, y1]` in pixels.
pub type BoundingBox = [f64; 4];

/// Pixel position serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "PointRepr", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Flat([f64; 2]),
    Nested([[f64; 2]; 1]),
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        let [x, y] = match repr {
            PointRepr::Flat(p) => p,
            PointRepr::Nested([p]) => p,
        };
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

pub type Ring = Vec<Point>;

/// Polygon rings of one instance; the first ring is the outline.
pub type Contour = Vec<Ring>;

/// One model output instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: i64,
    pub score: f64,
    pub contour: Contour,
    pub center: Point,
}

impl Detection {
    /// Shifts the box, the first contour ring and the center by `(dx, dy)`.
    ///
    /// Rings after the first are returned untouched.
    pub fn translated(&self, dx: f64, dy: f64) -> Detection {
        let mut contour = self.contour.clone();
        if let Some(outline) = contour.first_mut() {
            for p in outline.iter_mut() {
                *p = p.translated(dx, dy);
            }
        }
        let [x0, y0, x1, y1] = self.bbox;
        Detection {
            bbox: [x0 + dx, y0 + dy, x1 + dx, y1 + dy],
            class_id: self.class_id,
            score: self.score,
            contour,
            center: self.center.translated(dx, dy),
        }
    }
}

/// Detections of one patch as five parallel sequences, the on-disk layout.
///
/// A missing sequence deserializes as empty, which drops every record that would
/// need it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchDetections {
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub classes: Vec<i64>,
    #[serde(default)]
    pub scores: Vec<f64>,
    #[serde(default)]
    pub contours: Vec<Contour>,
    #[serde(default)]
    pub centers: Vec<Point>,
}

impl PatchDetections {
    pub fn push(&mut self, detection: Detection) {
        self.boxes.push(detection.bbox);
        self.classes.push(detection.class_id);
        self.scores.push(detection.score);
        self.contours.push(detection.contour);
        self.centers.push(detection.center);
    }

    /// Number of complete records, i.e. the length of the shortest sequence.
    pub fn complete_len(&self) -> usize {
        [
            self.boxes.len(),
            self.classes.len(),
            self.scores.len(),
            self.contours.len(),
            self.centers.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
    }

    fn longest_len(&self) -> usize {
        [
            self.boxes.len(),
            self.classes.len(),
            self.scores.len(),
            self.contours.len(),
            self.centers.len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.longest_len() == 0
    }

    /// Reassembles whole records.
    ///
    /// Records missing a field or carrying a contour without rings are dropped as a
    /// whole so the remaining records stay aligned.
    pub fn detections(&self) -> Vec<Detection> {
        let incomplete = self.longest_len() - self.complete_len();
        if incomplete > 0 {
            warn!("dropping {incomplete} detection(s) with missing fields");
        }
        let mut out = Vec::with_capacity(self.complete_len());
        let records = self
            .boxes
            .iter()
            .zip(&self.classes)
            .zip(&self.scores)
            .zip(&self.contours)
            .zip(&self.centers);
        for ((((bbox, class_id), score), contour), center) in records {
            if contour.is_empty() {
                warn!("dropping detection of class {class_id} with an empty contour");
                continue;
            }
            out.push(Detection {
                bbox: *bbox,
                class_id: *class_id,
                score: *score,
                contour: contour.clone(),
                center: *center,
            });
        }
        out
    }
}

impl FromIterator<Detection> for PatchDetections {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        let mut out = PatchDetections::default();
        for d in iter {
            out.push(d);
        }
        out
    }
}

/// Patch file name -> patch-local detections of that patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnomalyMeta {
    patches: BTreeMap<String, PatchDetections>,
}

impl AnomalyMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, patch_name: impl Into<String>, detections: PatchDetections) {
        self.patches.insert(patch_name.into(), detections);
    }

    pub fn get(&self, patch_name: &str) -> Option<&PatchDetections> {
        self.patches.get(patch_name)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patch_names(&self) -> impl Iterator<Item = &str> {
        self.patches.keys().map(String::as_str)
    }
}
