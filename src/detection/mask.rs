//! Helpers for adapters whose models emit instance masks instead of polygons.

use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};

use super::{BoundingBox, Contour, Detection, Point, Ring};

/// Traces the borders of a binary mask (non-zero is foreground).
///
/// Outer borders come first, followed by hole borders, each in tracing order.
pub fn contour_from_mask(mask: &GrayImage) -> Contour {
    let traced = find_contours::<i32>(mask);
    let (outer, holes): (Vec<_>, Vec<_>) = traced
        .into_iter()
        .partition(|c| matches!(c.border_type, BorderType::Outer));
    outer
        .into_iter()
        .chain(holes)
        .map(|c| {
            c.points
                .into_iter()
                .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                .collect::<Ring>()
        })
        .filter(|ring| !ring.is_empty())
        .collect()
}

/// Centroid of the longest ring from its polygon moments, truncated to whole pixels.
///
/// Rings enclosing no area fall back to the mean of their points.
pub fn center_from_contour(contour: &Contour) -> Option<Point> {
    let ring = contour.iter().max_by_key(|r| r.len())?;
    if ring.is_empty() {
        return None;
    }

    let (mut m00, mut m10, mut m01) = (0.0, 0.0, 0.0);
    for (i, a) in ring.iter().enumerate() {
        let b = ring[(i + 1) % ring.len()];
        let cross = a.x * b.y - b.x * a.y;
        m00 += cross;
        m10 += (a.x + b.x) * cross;
        m01 += (a.y + b.y) * cross;
    }
    m00 *= 0.5;

    let (cx, cy) = if m00.abs() > f64::EPSILON {
        (m10 / (6.0 * m00), m01 / (6.0 * m00))
    } else {
        let n = ring.len() as f64;
        (
            ring.iter().map(|p| p.x).sum::<f64>() / n,
            ring.iter().map(|p| p.y).sum::<f64>() / n,
        )
    };
    Some(Point::new(cx.trunc(), cy.trunc()))
}

impl Detection {
    /// Builds a detection from a binary instance mask, or `None` if the mask is empty.
    pub fn from_mask(
        bbox: BoundingBox,
        class_id: i64,
        score: f64,
        mask: &GrayImage,
    ) -> Option<Detection> {
        let contour = contour_from_mask(mask);
        let center = center_from_contour(&contour)?;
        Some(Detection {
            bbox,
            class_id,
            score,
            contour,
            center,
        })
    }
}
